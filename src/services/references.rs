use anyhow::Context;
use log::{error, info};
use std::path::Path;
use std::sync::Arc;

use crate::types::ReferenceSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceArticle {
    pub filename: String,
    pub title: String,
    pub content: String,
}

impl ReferenceArticle {
    /// Title is the first line, or the file name when that line is blank.
    pub fn from_file_contents(filename: impl Into<String>, content: impl Into<String>) -> Self {
        let filename = filename.into();
        let content = content.into();
        let first_line = content.lines().next().unwrap_or_default().trim();
        let title = if first_line.is_empty() {
            filename.clone()
        } else {
            first_line.to_string()
        };
        Self { filename, title, content }
    }

    pub fn summary(&self) -> ReferenceSummary {
        ReferenceSummary {
            title: self.title.clone(),
            filename: self.filename.clone(),
        }
    }
}

/// Read-only style corpus shared by every request.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStore {
    articles: Arc<Vec<ReferenceArticle>>,
}

impl ReferenceStore {
    pub fn new(articles: Vec<ReferenceArticle>) -> Self {
        Self {
            articles: Arc::new(articles),
        }
    }

    /// Loads every `*.txt` file in `dir`, ordered by file name.
    pub async fn load_dir(dir: &Path) -> anyhow::Result<Self> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("failed to read reference directory {}", dir.display()))?;

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("txt") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut articles = Vec::with_capacity(paths.len());
        for path in paths {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read reference {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            articles.push(ReferenceArticle::from_file_contents(filename, content));
        }

        info!("Loaded {} reference articles from {}", articles.len(), dir.display());
        Ok(Self::new(articles))
    }

    /// Like [`ReferenceStore::load_dir`] but an unreadable corpus becomes an
    /// empty one. Requests then fail with a configuration error.
    pub async fn load_or_empty(dir: &Path) -> Self {
        match Self::load_dir(dir).await {
            Ok(store) => store,
            Err(e) => {
                error!("Error reading reference files: {e:#}");
                Self::default()
            }
        }
    }

    pub fn articles(&self) -> &[ReferenceArticle] {
        &self.articles
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_from_first_line() {
        let article = ReferenceArticle::from_file_contents(
            "boat.txt",
            "Queen Buys Boat\nShe is so happy wiht her boat.",
        );
        assert_eq!(article.title, "Queen Buys Boat");
        assert_eq!(article.summary().filename, "boat.txt");
    }

    #[test]
    fn test_blank_first_line_falls_back_to_filename() {
        let article = ReferenceArticle::from_file_contents("empty.txt", "\nbody");
        assert_eq!(article.title, "empty.txt");
    }

    #[tokio::test]
    async fn test_load_dir_reads_sorted_txt_files() {
        let dir = std::env::temp_dir().join(format!("queens-speech-refs-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("b.txt"), "Second\nbody b").await.unwrap();
        tokio::fs::write(dir.join("a.txt"), "First\nbody a").await.unwrap();
        tokio::fs::write(dir.join("notes.md"), "ignored").await.unwrap();

        let store = ReferenceStore::load_dir(&dir).await.unwrap();
        let titles: Vec<&str> = store.articles().iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_dir_loads_empty() {
        let dir = std::env::temp_dir().join(format!("queens-speech-missing-{}", uuid::Uuid::new_v4()));
        let store = ReferenceStore::load_or_empty(&dir).await;
        assert!(store.is_empty());
    }
}
