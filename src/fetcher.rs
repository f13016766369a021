//! Page fetching with a bounded timeout.
//!
//! One attempt per source per cycle; retries belong to the flakier
//! extraction layer, not here. A failed fetch costs the source its
//! cycle and is reported to the health tracker; the orchestrator moves
//! on to the next source.
//!
//! Fetched HTML is flattened to visible text before chunking: script,
//! style, and noscript subtrees are dropped and each remaining text
//! node becomes its own line, so downstream block-boundary splitting
//! has newlines to work with.

use crate::error::FetchError;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument};
use url::Url;

const USER_AGENT: &str = "cardshow_crawler/0.1 (+https://github.com/graves/cardshow_crawler)";

/// Guard against pathological pages; anything past this is truncated.
const MAX_PAGE_BYTES: usize = 2 * 1024 * 1024;

static RE_NON_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style|noscript)[^>]*>.*?</(script|style|noscript)>").unwrap());

/// Retrieves one page of HTML for a source URL.
#[allow(async_fn_in_trait)]
pub trait PageFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// reqwest-backed fetcher with a shared client and per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    timeout_secs: u64,
}

impl HttpFetcher {
    /// Create a fetcher with a shared HTTP client.
    ///
    /// # Arguments
    ///
    /// * `timeout_secs` - Hard bound on one page download
    pub fn new(timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(8))
            .build()
            .unwrap();
        Self { http, timeout_secs }
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(FetchError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let request = self.http.get(parsed).send();
        let response = match timeout(Duration::from_secs(self.timeout_secs), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) if e.is_timeout() => return Err(FetchError::Timeout(self.timeout_secs)),
            Ok(Err(e)) => return Err(FetchError::Transport(e)),
            Err(_) => return Err(FetchError::Timeout(self.timeout_secs)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let mut body = response.text().await.map_err(FetchError::Transport)?;
        if body.len() > MAX_PAGE_BYTES {
            let cut = floor_char_boundary(&body, MAX_PAGE_BYTES);
            body.truncate(cut);
        }

        let text = html_to_text(&body);
        debug!(html_bytes = body.len(), text_bytes = text.len(), "Flattened page");
        Ok(text)
    }
}

/// Flatten an HTML document to newline-separated visible text.
///
/// Non-content subtrees are stripped first; each remaining text node
/// contributes one trimmed line. The newlines double as the block
/// boundaries the chunker prefers to split on.
pub fn html_to_text(html: &str) -> String {
    let cleaned = RE_NON_CONTENT.replace_all(html, " ");
    let document = Html::parse_document(&cleaned);
    let body_selector = Selector::parse("body").unwrap();

    let lines: Vec<String> = document
        .select(&body_selector)
        .flat_map(|body| body.text())
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect();

    lines.join("\n")
}

/// Largest index `<= idx` that falls on a UTF-8 character boundary.
pub(crate) fn floor_char_boundary(s: &str, idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    let mut i = idx;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
