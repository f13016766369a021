//! Error taxonomy for the crawl pipeline.
//!
//! Each error type maps to one containment boundary: [`ConfigError`] is
//! fatal and aborts the run before any work starts; [`FetchError`] costs
//! one source its cycle; [`ExtractionError`] costs one chunk;
//! [`GeocodeError`] costs nothing but the coordinates; [`StoreError`]
//! covers data-directory I/O. Nothing recoverable is allowed to
//! propagate past its own boundary.

use thiserror::Error;

/// Fatal configuration or credential problems. The only error family
/// that produces a non-zero exit code.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "missing AI API key: set api_key in the config file or the CARDSHOW_API_KEY / OPENAI_API_KEY environment variable"
    )]
    MissingApiKey,

    #[error("failed to read config file {path}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Invalid {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("nothing to crawl: {0}")]
    NothingToCrawl(String),
}

/// Per-source fetch failures. Recoverable: the source is skipped for
/// this cycle and the failure is reported to the health tracker.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("http status {0}")]
    Status(u16),

    #[error("fetch timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Per-chunk extraction failures. Recoverable: the chunk is skipped and
/// the remaining chunks of the same source still run.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("completion endpoint returned status {0}")]
    Api(u16),

    #[error("completion call timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed JSON in model output: {0}")]
    MalformedJson(String),

    #[error("unexpected response shape: {0}")]
    BadResponse(String),
}

/// Per-candidate geocoding failures. Callers map these to `None`
/// coordinates; a show with no coordinates is still persisted.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding endpoint returned status {0}")]
    Status(u16),

    #[error("geocoding call timed out after {0}s")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unparseable geocoder response: {0}")]
    BadResponse(String),
}

/// Data-directory I/O failures. Fatal when the stores are opened at
/// startup, logged and carried when they happen mid-cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt data file {path}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown pending show id {0}")]
    UnknownId(String),
}
