//! Candidate deduplication against the existing review queue.
//!
//! Two records are the same show when they come from the same source
//! URL, their normalized titles overlap fuzzily, and their date windows
//! overlap. The fuzzy title rule exists mostly to absorb listings split
//! across chunk boundaries, where two partial extractions of one show
//! carry slightly different titles.
//!
//! Merge policy: a match against a PENDING row merges with latest
//! non-empty field values winning; a match against a decided row
//! (APPROVED or REJECTED) is a no-op; decided items are never
//! resurrected.

use crate::models::{NormalizedShow, PendingShow};
use tracing::debug;

/// Normalize a title for matching: lowercase, whitespace collapsed.
pub fn normalize_title(title: &str) -> String {
    title.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Fuzzy case-insensitive title overlap: exact match, containment, or
/// Jaro-Winkler similarity at or above `threshold`.
pub fn titles_match(a: &str, b: &str, threshold: f64) -> bool {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    if a == b || a.contains(&b) || b.contains(&a) {
        return true;
    }
    strsim::jaro_winkler(&a, &b) >= threshold
}

/// Inclusive overlap of two `[start, end]` date windows.
pub fn windows_overlap(a: &NormalizedShow, b: &NormalizedShow) -> bool {
    a.start_date <= b.end_date && b.start_date <= a.end_date
}

/// Find the existing queue row this candidate duplicates, regardless of
/// that row's review status; the caller decides merge vs. no-op.
pub fn find_match<'a>(
    show: &NormalizedShow,
    source_url: &str,
    existing: &'a [PendingShow],
    threshold: f64,
) -> Option<&'a PendingShow> {
    existing.iter().find(|row| {
        row.source_url == source_url
            && titles_match(&row.normalized.name, &show.name, threshold)
            && windows_overlap(&row.normalized, show)
    })
}

/// Merge a fresh extraction into an existing normalized record, latest
/// field values winning. Fields the newer record doesn't carry keep
/// their old values; categories are unioned. Returns true if anything
/// changed.
pub fn merge_into(existing: &mut NormalizedShow, newer: &NormalizedShow) -> bool {
    let before = existing.clone();

    // The longer name is usually the less-truncated one.
    if newer.name.len() > existing.name.len() {
        existing.name = newer.name.clone();
    }
    existing.start_date = existing.start_date.min(newer.start_date);
    existing.end_date = existing.end_date.max(newer.end_date);

    merge_field(&mut existing.venue_name, &newer.venue_name);
    merge_field(&mut existing.address, &newer.address);
    merge_field(&mut existing.city, &newer.city);
    merge_field(&mut existing.state, &newer.state);
    merge_field(&mut existing.description, &newer.description);
    if newer.entry_fee.is_some() {
        existing.entry_fee = newer.entry_fee;
    }
    if newer.coordinates.is_some() {
        existing.coordinates = newer.coordinates;
    }
    for category in &newer.categories {
        if !existing.categories.contains(category) {
            existing.categories.push(category.clone());
        }
    }

    let changed = *existing != before;
    if changed {
        debug!(name = %existing.name, "Merged duplicate candidate into existing row");
    }
    changed
}

fn merge_field(existing: &mut Option<String>, newer: &Option<String>) {
    if let Some(value) = newer {
        if !value.trim().is_empty() {
            *existing = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Coordinates, ReviewStatus};
    use chrono::{NaiveDate, Utc};

    const URL: &str = "https://example.com/shows";

    fn show(name: &str, start: (i32, u32, u32), end: (i32, u32, u32)) -> NormalizedShow {
        NormalizedShow {
            name: name.to_string(),
            start_date: NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
            end_date: NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
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

    fn pending(name: &str, start: (i32, u32, u32), status: ReviewStatus) -> PendingShow {
        PendingShow {
            id: "1".to_string(),
            source_url: URL.to_string(),
            raw_payload: serde_json::json!({}),
            normalized: show(name, start, start),
            status,
            created_at: Utc::now(),
            reviewed_at: None,
            reviewer_notes: None,
        }
    }

    #[test]
    fn test_titles_match_exact_and_case_insensitive() {
        assert!(titles_match("Spring Card Expo", "spring card expo", 0.88));
        assert!(titles_match("Spring  Card Expo", "Spring Card Expo", 0.88));
    }

    #[test]
    fn test_titles_match_containment() {
        assert!(titles_match("Spring Card Expo", "Spring Card Expo 2025", 0.88));
    }

    #[test]
    fn test_titles_match_fuzzy_typo() {
        assert!(titles_match("Spring Card Expo", "Spring Card Exop", 0.88));
    }

    #[test]
    fn test_titles_no_match_different_shows() {
        assert!(!titles_match("Spring Card Expo", "Autumn Comic Fair", 0.88));
        assert!(!titles_match("", "Spring Card Expo", 0.88));
    }

    #[test]
    fn test_windows_overlap() {
        let a = show("a", (2025, 3, 5), (2025, 3, 6));
        let b = show("b", (2025, 3, 6), (2025, 3, 7));
        let c = show("c", (2025, 3, 8), (2025, 3, 9));
        assert!(windows_overlap(&a, &b));
        assert!(!windows_overlap(&a, &c));
    }

    #[test]
    fn test_find_match_requires_same_source() {
        let existing = vec![pending("Spring Card Expo", (2025, 3, 5), ReviewStatus::Pending)];
        let candidate = show("Spring Card Expo", (2025, 3, 5), (2025, 3, 5));
        assert!(find_match(&candidate, URL, &existing, 0.88).is_some());
        assert!(find_match(&candidate, "https://other.com", &existing, 0.88).is_none());
    }

    #[test]
    fn test_find_match_requires_overlapping_dates() {
        let existing = vec![pending("Spring Card Expo", (2025, 3, 5), ReviewStatus::Pending)];
        let later = show("Spring Card Expo", (2025, 9, 5), (2025, 9, 5));
        assert!(find_match(&later, URL, &existing, 0.88).is_none());
    }

    #[test]
    fn test_find_match_sees_decided_rows() {
        let existing = vec![pending("Spring Card Expo", (2025, 3, 5), ReviewStatus::Approved)];
        let candidate = show("Spring Card Expo", (2025, 3, 5), (2025, 3, 5));
        let found = find_match(&candidate, URL, &existing, 0.88).unwrap();
        assert_eq!(found.status, ReviewStatus::Approved);
    }

    #[test]
    fn test_merge_latest_fields_win() {
        let mut existing = show("Spring Card Expo", (2025, 3, 5), (2025, 3, 5));
        existing.venue_name = Some("Old Hall".to_string());
        existing.entry_fee = Some(3.0);

        let mut newer = show("Spring Card Expo", (2025, 3, 5), (2025, 3, 6));
        newer.venue_name = Some("Expo Hall".to_string());
        newer.categories = vec!["sports-cards".to_string()];

        assert!(merge_into(&mut existing, &newer));
        assert_eq!(existing.venue_name.as_deref(), Some("Expo Hall"));
        assert_eq!(existing.end_date, NaiveDate::from_ymd_opt(2025, 3, 6).unwrap());
        // newer had no fee: old value kept
        assert_eq!(existing.entry_fee, Some(3.0));
        assert_eq!(existing.categories, vec!["sports-cards"]);
    }

    #[test]
    fn test_merge_keeps_coordinates_when_newer_has_none() {
        let mut existing = show("Expo", (2025, 3, 5), (2025, 3, 5));
        existing.coordinates = Some(Coordinates {
            latitude: 1.0,
            longitude: 2.0,
        });
        let newer = show("Expo", (2025, 3, 5), (2025, 3, 5));
        assert!(!merge_into(&mut existing, &newer));
        assert!(existing.coordinates.is_some());
    }

    #[test]
    fn test_merge_unchanged_returns_false() {
        let mut existing = show("Expo", (2025, 3, 5), (2025, 3, 5));
        let newer = existing.clone();
        assert!(!merge_into(&mut existing, &newer));
    }
}
