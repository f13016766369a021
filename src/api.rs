//! AI completion client with exponential backoff retry logic.
//!
//! The extraction step talks to an OpenAI-compatible chat-completions
//! endpoint. The module uses a trait-based design:
//! - [`CompleteAsync`]: core trait for a single bounded completion call
//! - [`ChatClient`]: reqwest-backed implementation
//! - [`RetryAsk`]: decorator adding retry with exponential backoff and
//!   jitter to any [`CompleteAsync`] implementation
//!
//! Every call carries its own timeout; a timeout or 5xx after the
//! retries are exhausted is a recoverable per-chunk failure, never fatal
//! to the run.

use crate::config::RetryPolicy;
use crate::error::ExtractionError;
use rand::{Rng, rng};
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{instrument, warn};

/// One bounded completion call: prompt text in, model text out.
#[allow(async_fn_in_trait)]
pub trait CompleteAsync {
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError>;
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// reqwest-backed client for an OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl ChatClient {
    /// Create a client for an OpenAI-compatible chat endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Base URL of the API, without the `/chat/completions` suffix
    /// * `api_key` - Bearer token sent with every request
    /// * `model` - Model name passed through in the request body
    /// * `timeout_secs` - Hard bound on one completion call
    pub fn new(endpoint: &str, api_key: &str, model: &str, timeout_secs: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap();
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs,
        }
    }
}

impl CompleteAsync for ChatClient {
    #[instrument(level = "debug", skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.0,
        });

        let request = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();

        // The client timeout covers the read; the outer timeout covers
        // connect stalls and keeps the bound explicit and testable.
        let response = match timeout(Duration::from_secs(self.timeout_secs), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) if e.is_timeout() => {
                return Err(ExtractionError::Timeout(self.timeout_secs));
            }
            Ok(Err(e)) => return Err(ExtractionError::Transport(e)),
            Err(_) => return Err(ExtractionError::Timeout(self.timeout_secs)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Api(status.as_u16()));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::BadResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ExtractionError::BadResponse("response carried no choices".to_string()))
    }
}

/// Wrapper that adds exponential backoff retry logic to any
/// [`CompleteAsync`] implementation.
///
/// The delay between retries follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
#[derive(Debug, Clone)]
pub struct RetryAsk<T> {
    inner: T,
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl<T> RetryAsk<T>
where
    T: CompleteAsync,
{
    /// Wrap an existing [`CompleteAsync`] implementation with retry logic.
    ///
    /// # Arguments
    ///
    /// * `inner` - The underlying completion client to wrap
    /// * `policy` - Max attempts, base delay, and delay cap
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = ChatClient::new(&endpoint, &key, &model, 20);
    /// let retry_client = RetryAsk::new(client, &config.retry);
    /// ```
    pub fn new(inner: T, policy: &RetryPolicy) -> Self {
        Self {
            inner,
            max_attempts: policy.max_attempts.max(1),
            base_delay: Duration::from_millis(policy.base_delay_ms),
            max_delay: Duration::from_millis(policy.max_delay_ms),
        }
    }
}

impl<T> CompleteAsync for RetryAsk<T>
where
    T: CompleteAsync,
{
    #[instrument(level = "debug", skip_all)]
    async fn complete(&self, prompt: &str) -> Result<String, ExtractionError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.complete(prompt).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!(
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                            error = %e,
                            "completion call exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "completion attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyClient {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl CompleteAsync for FlakyClient {
        async fn complete(&self, _prompt: &str) -> Result<String, ExtractionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(ExtractionError::Api(503))
            } else {
                Ok("[]".to_string())
            }
        }
    }

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let client = FlakyClient {
            calls: AtomicUsize::new(0),
            fail_first: 2,
        };
        let retry = RetryAsk::new(client, &fast_policy(3));
        let out = retry.complete("prompt").await.unwrap();
        assert_eq!(out, "[]");
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let client = FlakyClient {
            calls: AtomicUsize::new(0),
            fail_first: 10,
        };
        let retry = RetryAsk::new(client, &fast_policy(3));
        let err = retry.complete("prompt").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Api(503)));
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_first_success() {
        let client = FlakyClient {
            calls: AtomicUsize::new(0),
            fail_first: 0,
        };
        let retry = RetryAsk::new(client, &fast_policy(3));
        retry.complete("prompt").await.unwrap();
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 1);
    }
}
