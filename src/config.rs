use anyhow::{anyhow, Context};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::services::selector::SelectionPolicy;

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub site_addr: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub streaming: bool,
    pub references_dir: PathBuf,
    pub reference_limit: usize,
    pub selection: SelectionPolicy,
    pub generation_timeout: Duration,
    pub static_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site_addr: "127.0.0.1:3000".to_string(),
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1500,
            temperature: 0.8,
            streaming: true,
            references_dir: PathBuf::from("data/clickhole"),
            reference_limit: 2,
            selection: SelectionPolicy::Keyword,
            generation_timeout: Duration::from_secs(120),
            static_dir: PathBuf::from("public"),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Unset or blank keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            site_addr: get("SITE_ADDR").unwrap_or(defaults.site_addr),
            api_key: get("ANTHROPIC_API_KEY"),
            model: get("ANTHROPIC_MODEL").unwrap_or(defaults.model),
            max_tokens: parse_or(&get, "ANTHROPIC_MAX_TOKENS", defaults.max_tokens)?,
            temperature: parse_or(&get, "ANTHROPIC_TEMPERATURE", defaults.temperature)?,
            streaming: parse_or(&get, "ANTHROPIC_STREAMING", defaults.streaming)?,
            references_dir: get("REFERENCES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.references_dir),
            reference_limit: parse_or(&get, "REFERENCE_LIMIT", defaults.reference_limit)?,
            selection: match get("REFERENCE_SELECTION") {
                Some(value) => SelectionPolicy::parse(&value)
                    .ok_or_else(|| anyhow!("REFERENCE_SELECTION must be `keyword` or `random`, got `{value}`"))?,
                None => defaults.selection,
            },
            generation_timeout: Duration::from_secs(parse_or(
                &get,
                "GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout.as_secs(),
            )?),
            static_dir: get("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: `{raw}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.site_addr, "127.0.0.1:3000");
        assert!(config.api_key.is_none());
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.reference_limit, 2);
        assert_eq!(config.selection, SelectionPolicy::Keyword);
        assert!(config.streaming);
        assert_eq!(config.generation_timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("REFERENCE_LIMIT", "3"),
            ("REFERENCE_SELECTION", "random"),
            ("ANTHROPIC_STREAMING", "false"),
            ("GENERATION_TIMEOUT_SECS", "5"),
            ("REFERENCES_DIR", "/srv/refs"),
        ])
        .unwrap();
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.reference_limit, 3);
        assert_eq!(config.selection, SelectionPolicy::Random);
        assert!(!config.streaming);
        assert_eq!(config.generation_timeout, Duration::from_secs(5));
        assert_eq!(config.references_dir, PathBuf::from("/srv/refs"));
    }

    #[test]
    fn test_blank_api_key_is_missing() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "  ")]).unwrap();
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        assert!(config_from(&[("REFERENCE_LIMIT", "two")]).is_err());
        assert!(config_from(&[("REFERENCE_SELECTION", "best")]).is_err());
        assert!(config_from(&[("ANTHROPIC_TEMPERATURE", "warm")]).is_err());
    }
}
