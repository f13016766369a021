//! Per-chunk AI extraction.
//!
//! Sends one chunk of page text plus the extraction prompt to the
//! completion endpoint and turns the response into unvalidated
//! [`ExtractedCandidate`]s. The model's output is treated as hostile:
//! markdown code fences are stripped, truncated arrays are salvaged
//! element-by-element, and non-object elements are dropped with a log
//! line. An empty array is a success, not a failure.
//!
//! Each chunk call is independent: its own timeout, its own retry
//! budget. A chunk that fails after retries is skipped; the remaining
//! chunks of the same source still run.

use crate::api::CompleteAsync;
use crate::error::ExtractionError;
use crate::models::{ExtractedCandidate, RawChunk};
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Drives one extraction call per chunk through a completion client.
#[derive(Debug)]
pub struct Extractor<C> {
    client: C,
    prompt: String,
}

impl<C> Extractor<C>
where
    C: CompleteAsync,
{
    /// `prompt` is the full extraction prompt for this source (base
    /// prompt plus any per-source hint).
    pub fn new(client: C, prompt: String) -> Self {
        Self { client, prompt }
    }

    #[instrument(level = "debug", skip_all, fields(source_url = %chunk.source_url, chunk = chunk.sequence_index))]
    pub async fn extract(&self, chunk: &RawChunk) -> Result<Vec<ExtractedCandidate>, ExtractionError> {
        let request = format!("{}\n\nPage fragment:\n{}", self.prompt, chunk.text);
        let response = self.client.complete(&request).await?;
        let candidates = parse_candidates(&response, &chunk.source_url)?;
        debug!(count = candidates.len(), "Extracted candidates from chunk");
        Ok(candidates)
    }
}

/// Parse a model response into candidates.
///
/// Accepts a bare JSON array or a `{"shows": [...]}` wrapper. On a
/// truncation-shaped parse failure, salvages the complete prefix of the
/// array before giving up.
pub fn parse_candidates(response: &str, source_url: &str) -> Result<Vec<ExtractedCandidate>, ExtractionError> {
    let body = strip_code_fences(response);

    let elements = match serde_json::from_str::<Value>(body) {
        Ok(value) => array_elements(value)
            .ok_or_else(|| ExtractionError::BadResponse("model output was not a JSON array".to_string()))?,
        Err(e) if looks_truncated(&e) => {
            let salvaged = salvage_truncated_array(body);
            if salvaged.is_empty() {
                return Err(ExtractionError::MalformedJson(e.to_string()));
            }
            warn!(
                source_url,
                salvaged = salvaged.len(),
                "Model output truncated; salvaged complete array prefix"
            );
            salvaged
        }
        Err(e) => return Err(ExtractionError::MalformedJson(e.to_string())),
    };

    let mut candidates = Vec::with_capacity(elements.len());
    for element in elements {
        if element.is_object() {
            candidates.push(ExtractedCandidate {
                source_url: source_url.to_string(),
                raw_payload: element,
            });
        } else {
            warn!(
                source_url,
                element = %truncate_for_log(&element.to_string(), 120),
                "Dropping non-object array element from model output"
            );
        }
    }
    Ok(candidates)
}

/// Unwrap the array the model was asked for, tolerating a single-key
/// object wrapper like `{"shows": [...]}`.
fn array_elements(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(mut map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            if keys.len() == 1 {
                if let Some(Value::Array(items)) = map.remove(&keys[0]) {
                    return Some(items);
                }
            }
            None
        }
        _ => None,
    }
}

/// Strip a leading/trailing markdown code fence (```json ... ```).
pub fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // skip the language tag on the opening fence line
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Collect the longest prefix of complete top-level elements from a
/// truncated JSON array, scanning with a depth counter that is
/// string-escape aware.
fn salvage_truncated_array(body: &str) -> Vec<Value> {
    let Some(start) = body.find('[') else {
        return Vec::new();
    };

    let mut elements = Vec::new();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut element_start: Option<usize> = None;

    for (i, c) in body.char_indices().skip_while(|(i, _)| *i <= start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                if depth == 0 {
                    element_start = Some(i);
                }
                depth += 1;
            }
            '}' | ']' => {
                if depth == 0 {
                    // closing bracket of the outer array
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = element_start.take() {
                        if let Ok(value) = serde_json::from_str::<Value>(&body[s..=i]) {
                            elements.push(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    elements
}

/// Detect if a serde_json error indicates truncated/incomplete JSON.
pub fn looks_truncated(e: &serde_json::Error) -> bool {
    use serde_json::error::Category;
    matches!(e.classify(), Category::Eof)
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = crate::fetcher::floor_char_boundary(s, max);
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}
