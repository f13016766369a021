//! Source catalog and health tracking.
//!
//! The registry owns the persisted [`Source`] records and is the only
//! writer of their health fields. `record_outcome` is a single atomic
//! read-modify-write per source (the whole registry sits behind one
//! async mutex), so concurrent cycles can't lose updates. The pipeline
//! never disables a source automatically; after enough consecutive
//! failures it only flags the source for human attention.

use crate::error::StoreError;
use crate::models::Source;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

const SOURCES_FILE: &str = "sources.json";

/// Health-tracking knobs, split out so the decay math stays testable.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Priority points subtracted per unit of error streak.
    pub decay_step: u8,
    /// Consecutive failures before `needs_attention` is set.
    pub attention_threshold: u32,
}

/// Pure priority-decay rule: `max(0, score - step * streak)`.
pub fn decay_priority(score: u8, streak: u32, step: u8) -> u8 {
    let penalty = u32::from(step).saturating_mul(streak);
    u32::from(score).saturating_sub(penalty) as u8
}

/// Persisted catalog of seed URLs with priority and health state.
pub struct SourceRegistry {
    path: PathBuf,
    policy: HealthPolicy,
    inner: Mutex<Vec<Source>>,
}

impl SourceRegistry {
    /// Open the catalog under `data_dir`, starting empty when no
    /// `sources.json` exists yet.
    ///
    /// # Arguments
    ///
    /// * `data_dir` - Directory holding the catalog file
    /// * `policy` - Decay step and attention threshold for health tracking
    pub async fn open(data_dir: &Path, policy: HealthPolicy) -> Result<Self, StoreError> {
        let path = data_dir.join(SOURCES_FILE);
        let sources: Vec<Source> = super::load_json(&path).await?;
        info!(count = sources.len(), "Loaded source catalog");
        Ok(Self {
            path,
            policy,
            inner: Mutex::new(sources),
        })
    }

    /// Enabled sources ordered by priority descending, URL ascending on
    /// ties so the crawl order is stable.
    pub async fn list_enabled(&self) -> Vec<Source> {
        let sources = self.inner.lock().await;
        let mut enabled: Vec<Source> = sources.iter().filter(|s| s.enabled).cloned().collect();
        enabled.sort_by(|a, b| {
            b.priority_score
                .cmp(&a.priority_score)
                .then_with(|| a.url.cmp(&b.url))
        });
        enabled
    }

    pub async fn get(&self, url: &str) -> Option<Source> {
        let sources = self.inner.lock().await;
        sources.iter().find(|s| s.url == url).cloned()
    }

    /// Administrative registration of a new seed URL. Returns false if
    /// the URL is already cataloged.
    pub async fn add_source(&self, url: &str, priority: u8) -> Result<bool, StoreError> {
        let mut sources = self.inner.lock().await;
        if sources.iter().any(|s| s.url == url) {
            return Ok(false);
        }
        sources.push(Source::new(url.to_string(), priority));
        super::save_json(&self.path, &*sources).await?;
        info!(url, priority, "Registered new source");
        Ok(true)
    }

    /// Record one cycle's outcome for a source: reset the streak on
    /// success, decay priority and maybe flag for attention on failure.
    /// Unknown URLs (one-off crawls) are a logged no-op.
    pub async fn record_outcome(&self, url: &str, success: bool) -> Result<(), StoreError> {
        let mut sources = self.inner.lock().await;
        let Some(source) = sources.iter_mut().find(|s| s.url == url) else {
            warn!(url, "Outcome for uncataloged source; not recorded");
            return Ok(());
        };

        let now = Utc::now();
        if success {
            source.error_streak = 0;
            source.last_success_at = Some(now);
            source.needs_attention = false;
        } else {
            source.error_streak += 1;
            source.last_error_at = Some(now);
            source.priority_score =
                decay_priority(source.priority_score, source.error_streak, self.policy.decay_step);
            if source.error_streak >= self.policy.attention_threshold && !source.needs_attention {
                source.needs_attention = true;
                warn!(
                    url,
                    error_streak = source.error_streak,
                    "Source has failed repeatedly and needs human attention"
                );
            }
        }
        source.updated_at = now;

        super::save_json(&self.path, &*sources).await
    }

    /// Sources currently flagged for human attention.
    pub async fn flagged(&self) -> Vec<Source> {
        let sources = self.inner.lock().await;
        sources.iter().filter(|s| s.needs_attention).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> HealthPolicy {
        HealthPolicy {
            decay_step: 5,
            attention_threshold: 5,
        }
    }

    async fn registry(dir: &Path) -> SourceRegistry {
        SourceRegistry::open(dir, policy()).await.unwrap()
    }

    #[test]
    fn test_decay_priority_is_pure_and_floored() {
        assert_eq!(decay_priority(100, 1, 5), 95);
        assert_eq!(decay_priority(100, 3, 5), 85);
        assert_eq!(decay_priority(10, 3, 5), 0);
        assert_eq!(decay_priority(0, 100, 5), 0);
        assert_eq!(decay_priority(50, 0, 5), 50);
    }

    #[tokio::test]
    async fn test_add_source_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        assert!(reg.add_source("https://a.com", 80).await.unwrap());
        assert!(!reg.add_source("https://a.com", 90).await.unwrap());
        assert_eq!(reg.get("https://a.com").await.unwrap().priority_score, 80);
    }

    #[tokio::test]
    async fn test_list_enabled_orders_by_priority() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        reg.add_source("https://low.com", 10).await.unwrap();
        reg.add_source("https://high.com", 90).await.unwrap();
        reg.add_source("https://mid.com", 50).await.unwrap();

        let enabled = reg.list_enabled().await;
        let urls: Vec<&str> = enabled.iter().map(|s| s.url.as_str()).collect();
        assert_eq!(urls, vec!["https://high.com", "https://mid.com", "https://low.com"]);
    }

    #[tokio::test]
    async fn test_failure_decays_priority_and_success_resets_streak() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        reg.add_source("https://a.com", 100).await.unwrap();

        reg.record_outcome("https://a.com", false).await.unwrap();
        reg.record_outcome("https://a.com", false).await.unwrap();
        let source = reg.get("https://a.com").await.unwrap();
        assert_eq!(source.error_streak, 2);
        // second failure decays from the already-decayed 95 by 2*5
        assert_eq!(source.priority_score, 85);
        assert!(source.last_error_at.is_some());

        reg.record_outcome("https://a.com", true).await.unwrap();
        let source = reg.get("https://a.com").await.unwrap();
        assert_eq!(source.error_streak, 0);
        assert!(source.last_success_at.is_some());
        // priority stays decayed; only the streak resets
        assert_eq!(source.priority_score, 85);
    }

    #[tokio::test]
    async fn test_attention_flag_after_threshold_never_disables() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        reg.add_source("https://a.com", 100).await.unwrap();

        for _ in 0..5 {
            reg.record_outcome("https://a.com", false).await.unwrap();
        }
        let source = reg.get("https://a.com").await.unwrap();
        assert!(source.needs_attention);
        assert!(source.enabled, "pipeline must never disable a source");
        assert_eq!(reg.flagged().await.len(), 1);

        reg.record_outcome("https://a.com", true).await.unwrap();
        assert!(!reg.get("https://a.com").await.unwrap().needs_attention);
    }

    #[tokio::test]
    async fn test_unknown_url_outcome_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let reg = registry(dir.path()).await;
        reg.record_outcome("https://ghost.com", false).await.unwrap();
        assert!(reg.get("https://ghost.com").await.is_none());
    }

    #[tokio::test]
    async fn test_catalog_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let reg = registry(dir.path()).await;
            reg.add_source("https://a.com", 70).await.unwrap();
            reg.record_outcome("https://a.com", false).await.unwrap();
        }
        let reg = registry(dir.path()).await;
        let source = reg.get("https://a.com").await.unwrap();
        assert_eq!(source.priority_score, 65);
        assert_eq!(source.error_streak, 1);
    }
}
