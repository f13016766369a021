//! Data models for sources, chunks, candidates, and reviewable shows.
//!
//! The pipeline moves records through four representations:
//! - [`Source`]: a persisted seed URL with crawl priority and health state
//! - [`RawChunk`]: a bounded slice of one page's text, alive for one cycle only
//! - [`ExtractedCandidate`]: unvalidated model output for one chunk
//! - [`NormalizedShow`] inside a [`PendingShow`]: the canonical record that
//!   lands in the human review queue
//!
//! `RawChunk` and `ExtractedCandidate` are never persisted; everything else
//! round-trips through the JSON stores.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A seed URL periodically crawled for show listings.
///
/// Health fields are mutated only by the health tracker; `enabled` is an
/// administrative switch the pipeline reads but never writes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Source {
    /// Unique seed URL.
    pub url: String,
    /// Crawl-ordering scalar, 0–100. Decayed by repeated failures.
    pub priority_score: u8,
    /// Disabled sources are never fetched.
    pub enabled: bool,
    #[serde(default)]
    pub last_success_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    /// Consecutive failed cycles. Resets to 0 on any success.
    #[serde(default)]
    pub error_streak: u32,
    /// Set once the error streak crosses the attention threshold. The
    /// pipeline never disables a source on its own; it only flags it.
    #[serde(default)]
    pub needs_attention: bool,
    pub updated_at: DateTime<Utc>,
}

impl Source {
    pub fn new(url: String, priority_score: u8) -> Self {
        Self {
            url,
            priority_score: priority_score.min(100),
            enabled: true,
            last_success_at: None,
            last_error_at: None,
            error_streak: 0,
            needs_attention: false,
            updated_at: Utc::now(),
        }
    }
}

/// A bounded-size slice of one source's flattened page text, sized for
/// the extraction model. Exists only during one crawl run.
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub source_url: String,
    pub text: String,
    /// Position of this chunk in document order.
    pub sequence_index: usize,
}

/// Unvalidated model output for one chunk: a single element of the JSON
/// array the extraction call returned. Validation happens in the
/// normalizer; nothing here is trusted yet.
#[derive(Debug, Clone)]
pub struct ExtractedCandidate {
    pub source_url: String,
    pub raw_payload: serde_json::Value,
}

/// Resolved latitude/longitude for a show's address.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// A candidate mapped onto the canonical show schema.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NormalizedShow {
    pub name: String,
    pub start_date: NaiveDate,
    /// Equal to `start_date` when the listing carried a single date.
    pub end_date: NaiveDate,
    #[serde(default)]
    pub venue_name: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Parsed dollar amount; `Some(0.0)` for free admission, `None` when
    /// the listing's fee text didn't parse.
    #[serde(default)]
    pub entry_fee: Option<f64>,
    /// Controlled-vocabulary tags. Empty when no hint matched confidently.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `None` until geocoding succeeds; never blocks persistence.
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
}

/// Review state machine for a queued show. Transitions out of `Pending`
/// are made only by the external review collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// A persisted, human-reviewable show record. Retained permanently for
/// audit regardless of terminal state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PendingShow {
    pub id: String,
    pub source_url: String,
    /// The raw model output this record was built from, kept for audit.
    pub raw_payload: serde_json::Value,
    pub normalized: NormalizedShow,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
}
