//! Feed configuration: timeouts, batch sizes, breaker thresholds, endpoints.
//!
//! Defaults are the production values. `FeedConfig::from_env` overlays
//! environment variables (and a `.env` file outside of tests).

use std::path::PathBuf;
use std::time::Duration;

use crate::poem::Language;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Every tunable of the acquisition / translation / explanation pipeline.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    // --- Upstream source ---
    pub source_base_url: String,
    pub source_timeout: Duration,
    pub source_fetch_delay: Duration,
    pub source_max_attempts: usize,
    pub source_abort_after_failures: usize,

    // --- Circuit breaker ---
    pub breaker_threshold: u32,
    pub breaker_cooldown: Duration,

    // --- Translation ---
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub translate_timeout: Duration,
    pub translation_l1_capacity: usize,

    // --- Explanation ---
    pub explain_base_url: String,
    pub explain_timeout: Duration,
    pub explanation_cache_cap: usize,
    pub offline: bool,

    // --- Feed ---
    pub source_language: Language,
    pub initial_language: Language,
    pub initial_batch: usize,
    pub initial_load_timeout: Duration,
    pub initial_chunk: usize,
    pub switch_chunk: usize,
    pub load_more_source: usize,
    pub load_more_translated: usize,
    pub load_more_threshold: usize,

    pub cache_path: Option<PathBuf>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source_base_url: "https://api.ganjoor.net/api/ganjoor".into(),
            source_timeout: Duration::from_secs(5),
            source_fetch_delay: Duration::from_millis(200),
            source_max_attempts: 30,
            source_abort_after_failures: 8,

            breaker_threshold: 5,
            breaker_cooldown: Duration::from_secs(10 * 60),

            llm_base_url: "https://api.openai.com".into(),
            llm_model: "gpt-4o-mini".into(),
            llm_api_key: None,
            translate_timeout: Duration::from_secs(12),
            translation_l1_capacity: 256,

            explain_base_url: "http://localhost:3001".into(),
            explain_timeout: Duration::from_secs(60),
            explanation_cache_cap: 50,
            offline: false,

            source_language: Language::Persian,
            initial_language: Language::Persian,
            initial_batch: 8,
            initial_load_timeout: Duration::from_secs(15),
            initial_chunk: 2,
            switch_chunk: 3,
            load_more_source: 10,
            load_more_translated: 5,
            load_more_threshold: 5,

            cache_path: None,
        }
    }
}

impl FeedConfig {
    /// Loads defaults, then applies `DIVAN_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let mut config = Self::default();

        if let Ok(url) = std::env::var("DIVAN_SOURCE_URL") {
            config.source_base_url = url;
        }
        if let Ok(url) = std::env::var("DIVAN_EXPLAIN_URL") {
            config.explain_base_url = url;
        }
        if let Ok(url) = std::env::var("DIVAN_LLM_URL") {
            config.llm_base_url = url;
        }
        if let Ok(model) = std::env::var("DIVAN_LLM_MODEL") {
            config.llm_model = model;
        }
        config.llm_api_key = std::env::var("DIVAN_LLM_API_KEY").ok();
        config.cache_path = std::env::var("DIVAN_CACHE_PATH").ok().map(PathBuf::from);

        if let Ok(raw) = std::env::var("DIVAN_OFFLINE") {
            config.offline = parse_bool("DIVAN_OFFLINE", &raw)?;
        }
        if let Ok(raw) = std::env::var("DIVAN_LANGUAGE") {
            config.initial_language = raw.parse::<Language>().map_err(|_| {
                ConfigError::InvalidValue(
                    "DIVAN_LANGUAGE".to_string(),
                    format!("'{raw}' is not one of fa, en"),
                )
            })?;
        }

        Ok(config)
    }

    /// Attempts `fetch_many(count)` is allowed to spend.
    pub fn attempts_for(&self, count: usize) -> usize {
        (count * 2).min(self.source_max_attempts)
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{other}' is not a boolean"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pipeline_constants() {
        let config = FeedConfig::default();
        assert_eq!(config.breaker_threshold, 5);
        assert_eq!(config.breaker_cooldown, Duration::from_secs(600));
        assert_eq!(config.source_timeout, Duration::from_secs(5));
        assert_eq!(config.translate_timeout, Duration::from_secs(12));
        assert_eq!(config.explain_timeout, Duration::from_secs(60));
        assert_eq!(config.initial_batch, 8);
    }

    #[test]
    fn attempts_are_capped_at_thirty() {
        let config = FeedConfig::default();
        assert_eq!(config.attempts_for(4), 8);
        assert_eq!(config.attempts_for(10), 20);
        assert_eq!(config.attempts_for(40), 30);
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("X", "TRUE").unwrap());
        assert!(!parse_bool("X", "off").unwrap());
        assert!(parse_bool("X", "maybe").is_err());
    }
}
