use chrono::Utc;
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::types::{GenerationMode, ReferenceSummary};

pub const STORAGE_KEY: &str = "queens-speech-history";
pub const MAX_HISTORY_ENTRIES: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationHistoryEntry {
    pub id: String,
    pub prompt: String,
    pub mode: GenerationMode,
    pub title: String,
    pub content: String,
    pub timestamp: i64,
    #[serde(default)]
    pub used_references: Vec<ReferenceSummary>,
}

/// A finished generation that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGeneration {
    pub prompt: String,
    pub mode: GenerationMode,
    pub title: String,
    pub content: String,
    pub used_references: Vec<ReferenceSummary>,
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write history: {0}")]
    Storage(String),
}

/// String key-value storage, e.g. the browser's localStorage.
pub trait KeyValueStorage {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), HistoryError>;
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.items.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), HistoryError> {
        self.items.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.items.remove(key);
    }
}

/// Most-recent-first generation log, upserted by `(prompt, mode)` and capped
/// at [`MAX_HISTORY_ENTRIES`].
pub struct HistoryStore<S: KeyValueStorage> {
    storage: S,
    entries: Vec<GenerationHistoryEntry>,
}

impl<S: KeyValueStorage> HistoryStore<S> {
    pub fn load(storage: S) -> Self {
        let entries = match storage.get(STORAGE_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Discarding unreadable generation history: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        debug!("Loaded {} history entries", entries.len());
        Self { storage, entries }
    }

    pub fn entries(&self) -> &[GenerationHistoryEntry] {
        &self.entries
    }

    pub fn get(&self, id: &str) -> Option<&GenerationHistoryEntry> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn save(&mut self, generation: NewGeneration) -> Result<GenerationHistoryEntry, HistoryError> {
        self.save_at(generation, Utc::now().timestamp_millis())
    }

    pub fn save_at(
        &mut self,
        generation: NewGeneration,
        timestamp: i64,
    ) -> Result<GenerationHistoryEntry, HistoryError> {
        let existing = self
            .entries
            .iter()
            .position(|entry| entry.prompt == generation.prompt && entry.mode == generation.mode);

        let id = match existing {
            Some(index) => self.entries.remove(index).id,
            None => uuid::Uuid::new_v4().to_string(),
        };

        let entry = GenerationHistoryEntry {
            id,
            prompt: generation.prompt,
            mode: generation.mode,
            title: generation.title,
            content: generation.content,
            timestamp,
            used_references: generation.used_references,
        };

        self.entries.insert(0, entry.clone());
        self.entries.truncate(MAX_HISTORY_ENTRIES);
        self.persist()?;

        if existing.is_some() {
            debug!("Updated existing generation: {}", entry.title);
        } else {
            debug!("Saved new generation: {}", entry.title);
        }
        Ok(entry)
    }

    /// Returns whether an entry with `id` existed.
    pub fn delete(&mut self, id: &str) -> Result<bool, HistoryError> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        if self.entries.len() == before {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.storage.remove(STORAGE_KEY);
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn persist(&mut self) -> Result<(), HistoryError> {
        let raw = serde_json::to_string(&self.entries)?;
        self.storage.set(STORAGE_KEY, raw).map_err(|e| {
            error!("Error saving generation history: {e}");
            e
        })
    }
}
