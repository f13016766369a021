//! Pipeline configuration.
//!
//! All the knobs that used to be scattered constants (timeouts, chunk
//! size, prompts, retry policy, health thresholds) live in one
//! [`PipelineConfig`] struct injected into the orchestrator at
//! construction, so tests can vary them per run. The struct loads from
//! an optional TOML file; every field has a working default, and the API
//! key supports an `"ENV"` sentinel resolved from the environment.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;

const API_KEY_ENV_VARS: [&str; 2] = ["CARDSHOW_API_KEY", "OPENAI_API_KEY"];

const DEFAULT_BASE_PROMPT: &str = "You are extracting card-show event listings from a fragment of a web page. \
Return ONLY a JSON array of objects, one per distinct show, with the fields: \
name (string, required), startDate (string), endDate (string, optional), \
venueName (string, optional), address (string, optional), \
entryFee (string or number, optional), category (string, optional), \
description (string, optional). \
Return [] if the fragment contains no show listings. Do not invent shows.";

/// Retry/backoff policy applied uniformly to the flaky external calls.
///
/// Delay grows as `base_delay * 2^(attempt-1)`, capped at `max_delay`,
/// plus a small random jitter.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Every tunable the pipeline reads, with production defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// OpenAI-compatible completion endpoint base URL.
    pub ai_endpoint: String,
    pub model: String,
    /// `"ENV"` means: resolve from CARDSHOW_API_KEY / OPENAI_API_KEY.
    pub api_key: String,
    pub base_prompt: String,
    /// Optional per-source prompt additions, keyed by source URL.
    pub prompt_hints: HashMap<String, String>,
    /// Nominatim-style search endpoint.
    pub geocode_endpoint: String,
    pub fetch_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    pub geocode_timeout_secs: u64,
    /// Chunk size cap. Larger chunks mean fewer extraction calls but a
    /// higher timeout risk per call.
    pub max_chunk_bytes: usize,
    pub source_concurrency: usize,
    pub chunk_concurrency: usize,
    /// Priority points subtracted per unit of error streak.
    pub decay_step: u8,
    /// Consecutive failures before a source is flagged for attention.
    pub attention_threshold: u32,
    /// Jaro-Winkler floor for the deduplicator's title match.
    pub title_match_threshold: f64,
    /// Nominatim importance floor below which a hit counts as not-found.
    pub min_geocode_importance: f64,
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "ENV".to_string(),
            base_prompt: DEFAULT_BASE_PROMPT.to_string(),
            prompt_hints: HashMap::new(),
            geocode_endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            fetch_timeout_secs: 25,
            extract_timeout_secs: 20,
            geocode_timeout_secs: 10,
            max_chunk_bytes: 25 * 1024,
            source_concurrency: 4,
            chunk_concurrency: 3,
            decay_step: 5,
            attention_threshold: 5,
            title_match_threshold: 0.88,
            min_geocode_importance: 0.3,
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from an optional TOML file. A missing file
    /// path yields the defaults; a present but unreadable or
    /// unparseable file is a [`ConfigError`]. The API key is resolved
    /// separately, only by the modes that actually call the model.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.sanitize();
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(Path::new(path)).map_err(|e| ConfigError::Unreadable {
            path: path.to_string(),
            source: e,
        })?;
        toml::from_str(&data).map_err(|e| ConfigError::Invalid {
            path: path.to_string(),
            source: e,
        })
    }

    /// Clamp out-of-range knobs back to usable values rather than
    /// failing the run over a typo.
    fn sanitize(&mut self) {
        if !(0.0..=1.0).contains(&self.title_match_threshold) {
            self.title_match_threshold = 0.88;
        }
        if !(0.0..=1.0).contains(&self.min_geocode_importance) {
            self.min_geocode_importance = 0.3;
        }
        if self.max_chunk_bytes < 1024 {
            self.max_chunk_bytes = 1024;
        }
        self.source_concurrency = self.source_concurrency.max(1);
        self.chunk_concurrency = self.chunk_concurrency.max(1);
        if self.retry.max_attempts == 0 {
            self.retry.max_attempts = 1;
        }
    }

    /// Settle the API key: explicit override first, then a literal key
    /// from the config file, then the environment for the `"ENV"`
    /// sentinel. Failure here is fatal: it prevents any work.
    pub fn resolve_api_key(&mut self, api_key_override: Option<String>) -> Result<(), ConfigError> {
        if let Some(key) = api_key_override {
            if !key.trim().is_empty() {
                self.api_key = key;
                return Ok(());
            }
        }
        if self.api_key.trim().is_empty() || self.api_key.trim().eq_ignore_ascii_case("env") {
            for var in API_KEY_ENV_VARS {
                if let Ok(key) = env::var(var) {
                    if !key.trim().is_empty() {
                        self.api_key = key;
                        return Ok(());
                    }
                }
            }
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    /// The extraction prompt for one source: the base prompt plus any
    /// configured per-source hint.
    pub fn prompt_for(&self, source_url: &str) -> String {
        match self.prompt_hints.get(source_url) {
            Some(hint) => format!("{}\n\nSource-specific guidance: {}", self.base_prompt, hint),
            None => self.base_prompt.clone(),
        }
    }
}
