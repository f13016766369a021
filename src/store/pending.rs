//! The pending-show review queue.
//!
//! Durable store with the review state machine. The pipeline inserts
//! and merges; only the external review collaborator moves a row out of
//! PENDING. All writes go through one async mutex, so two concurrent
//! cycles can't insert duplicate rows for the same candidate, and rows
//! are kept forever for audit regardless of terminal state.

use crate::dedupe;
use crate::error::StoreError;
use crate::models::{NormalizedShow, PendingShow, ReviewStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

const PENDING_FILE: &str = "pending_shows.json";

/// What `insert_or_merge` did with a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New row created with the given id.
    Inserted(String),
    /// Candidate matched a PENDING row and updated it.
    Merged(String),
    /// Candidate matched a row that needed no update, or a decided row
    /// that must not be touched.
    Unchanged(String),
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct QueueState {
    shows: Vec<PendingShow>,
    next_seq: u64,
}

/// JSON-file-backed review queue.
pub struct PendingQueue {
    path: PathBuf,
    inner: Mutex<QueueState>,
}

impl PendingQueue {
    /// Open the queue under `data_dir`, starting empty when no
    /// `pending_shows.json` exists yet.
    pub async fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let path = data_dir.join(PENDING_FILE);
        let state: QueueState = super::load_json(&path).await?;
        info!(count = state.shows.len(), "Loaded pending-show queue");
        Ok(Self {
            path,
            inner: Mutex::new(state),
        })
    }

    /// Insert a candidate or merge it into the row it duplicates.
    ///
    /// Match against a PENDING row: merge, latest field values win.
    /// Match against an APPROVED or REJECTED row: no-op; decided items
    /// are never resurrected. No match: insert with status PENDING.
    pub async fn insert_or_merge(
        &self,
        source_url: &str,
        raw_payload: serde_json::Value,
        normalized: NormalizedShow,
        title_match_threshold: f64,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut state = self.inner.lock().await;

        let matched = dedupe::find_match(&normalized, source_url, &state.shows, title_match_threshold)
            .map(|row| (row.id.clone(), row.status));

        let outcome = match matched {
            Some((id, ReviewStatus::Pending)) => {
                let row = state
                    .shows
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::UnknownId(id.clone()))?;
                if dedupe::merge_into(&mut row.normalized, &normalized) {
                    row.raw_payload = raw_payload;
                    UpsertOutcome::Merged(id)
                } else {
                    UpsertOutcome::Unchanged(id)
                }
            }
            Some((id, _)) => {
                debug!(id = %id, name = %normalized.name, "Candidate matches a decided row; leaving it alone");
                return Ok(UpsertOutcome::Unchanged(id));
            }
            None => {
                state.next_seq += 1;
                let now = Utc::now();
                let id = format!("{}-{}", now.timestamp_millis(), state.next_seq);
                state.shows.push(PendingShow {
                    id: id.clone(),
                    source_url: source_url.to_string(),
                    raw_payload,
                    normalized,
                    status: ReviewStatus::Pending,
                    created_at: now,
                    reviewed_at: None,
                    reviewer_notes: None,
                });
                UpsertOutcome::Inserted(id)
            }
        };

        super::save_json(&self.path, &*state).await?;
        Ok(outcome)
    }

    pub async fn list_by_status(&self, status: ReviewStatus) -> Vec<PendingShow> {
        let state = self.inner.lock().await;
        state.shows.iter().filter(|s| s.status == status).cloned().collect()
    }

    pub async fn all(&self) -> Vec<PendingShow> {
        let state = self.inner.lock().await;
        state.shows.clone()
    }

    /// Review-collaborator interface: move a row to a new status. The
    /// pipeline itself never calls this.
    pub async fn set_status(
        &self,
        id: &str,
        status: ReviewStatus,
        reviewer_notes: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock().await;
        let row = state
            .shows
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::UnknownId(id.to_string()))?;
        row.status = status;
        row.reviewed_at = Some(Utc::now());
        row.reviewer_notes = reviewer_notes;
        super::save_json(&self.path, &*state).await
    }

    /// Backfill coordinates for PENDING rows that have none, using the
    /// supplied resolver (exact geocode, then city centroid). Returns
    /// the number of rows updated.
    pub async fn backfill_coordinates<F>(&self, mut resolve: F) -> Result<usize, StoreError>
    where
        F: FnMut(&NormalizedShow) -> Option<crate::models::Coordinates>,
    {
        let mut state = self.inner.lock().await;
        let mut updated = 0usize;
        for row in state
            .shows
            .iter_mut()
            .filter(|s| s.status == ReviewStatus::Pending && s.normalized.coordinates.is_none())
        {
            if let Some(coords) = resolve(&row.normalized) {
                row.normalized.coordinates = Some(coords);
                updated += 1;
            }
        }
        if updated > 0 {
            super::save_json(&self.path, &*state).await?;
        }
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Coordinates;
    use chrono::NaiveDate;
    use serde_json::json;

    const URL: &str = "https://example.com/shows";
    const THRESHOLD: f64 = 0.88;

    fn show(name: &str, day: u32) -> NormalizedShow {
        NormalizedShow {
            name: name.to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            venue_name: None,
            address: None,
            city: None,
            state: None,
            entry_fee: None,
            categories: Vec::new(),
            description: None,
            coordinates: None,
        }
    }

    async fn queue(dir: &Path) -> PendingQueue {
        PendingQueue::open(dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_insert_then_rerun_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;

        let first = q
            .insert_or_merge(URL, json!({"name": "Expo"}), show("Spring Card Expo", 5), THRESHOLD)
            .await
            .unwrap();
        assert!(matches!(first, UpsertOutcome::Inserted(_)));

        let second = q
            .insert_or_merge(URL, json!({"name": "Expo"}), show("Spring Card Expo", 5), THRESHOLD)
            .await
            .unwrap();
        assert!(matches!(second, UpsertOutcome::Unchanged(_)));
        assert_eq!(q.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_merge_updates_pending_row() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;

        q.insert_or_merge(URL, json!({}), show("Spring Card Expo", 5), THRESHOLD)
            .await
            .unwrap();

        let mut richer = show("Spring Card Expo", 5);
        richer.venue_name = Some("Expo Hall".to_string());
        let outcome = q
            .insert_or_merge(URL, json!({"venueName": "Expo Hall"}), richer, THRESHOLD)
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Merged(_)));

        let rows = q.list_by_status(ReviewStatus::Pending).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].normalized.venue_name.as_deref(), Some("Expo Hall"));
    }

    #[tokio::test]
    async fn test_decided_rows_are_never_resurrected() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;

        let UpsertOutcome::Inserted(id) = q
            .insert_or_merge(URL, json!({}), show("Spring Card Expo", 5), THRESHOLD)
            .await
            .unwrap()
        else {
            panic!("expected insert");
        };
        q.set_status(&id, ReviewStatus::Approved, Some("looks real".to_string()))
            .await
            .unwrap();

        let mut richer = show("Spring Card Expo", 5);
        richer.venue_name = Some("Expo Hall".to_string());
        let outcome = q.insert_or_merge(URL, json!({}), richer, THRESHOLD).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged(id.clone()));

        let rows = q.all().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ReviewStatus::Approved);
        assert!(rows[0].normalized.venue_name.is_none(), "approved row untouched");
    }

    #[tokio::test]
    async fn test_different_shows_get_separate_rows() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;
        q.insert_or_merge(URL, json!({}), show("Spring Card Expo", 5), THRESHOLD)
            .await
            .unwrap();
        q.insert_or_merge(URL, json!({}), show("Autumn Comic Fair", 5), THRESHOLD)
            .await
            .unwrap();
        q.insert_or_merge(URL, json!({}), show("Spring Card Expo", 25), THRESHOLD)
            .await
            .unwrap();
        assert_eq!(q.all().await.len(), 3);
    }

    #[tokio::test]
    async fn test_set_status_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;
        let err = q.set_status("missing", ReviewStatus::Rejected, None).await.unwrap_err();
        assert!(matches!(err, StoreError::UnknownId(_)));
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let q = queue(dir.path()).await;
            q.insert_or_merge(URL, json!({}), show("Spring Card Expo", 5), THRESHOLD)
                .await
                .unwrap();
        }
        let q = queue(dir.path()).await;
        assert_eq!(q.list_by_status(ReviewStatus::Pending).await.len(), 1);

        // ids keep advancing after reopen
        let outcome = q
            .insert_or_merge(URL, json!({}), show("Autumn Comic Fair", 7), THRESHOLD)
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::Inserted(_)));
        assert_eq!(q.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_backfill_fills_only_missing_pending_coordinates() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path()).await;

        let mut located = show("Located Expo", 5);
        located.coordinates = Some(Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        });
        q.insert_or_merge(URL, json!({}), located, THRESHOLD).await.unwrap();
        q.insert_or_merge(URL, json!({}), show("Unlocated Expo", 12), THRESHOLD)
            .await
            .unwrap();

        let updated = q
            .backfill_coordinates(|_| {
                Some(Coordinates {
                    latitude: 39.78,
                    longitude: -89.65,
                })
            })
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let rows = q.all().await;
        let original = rows.iter().find(|r| r.normalized.name == "Located Expo").unwrap();
        assert_eq!(original.normalized.coordinates.unwrap().latitude, 1.0);
    }
}
