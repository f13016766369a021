//! Mapping raw extracted candidates onto the canonical show schema.
//!
//! Canonicalization is deliberately conservative: fields are promoted to
//! structured form only when the parse is confident, and kept as raw
//! text otherwise. Candidates that fail the minimum-viable-record
//! policy (no usable name, or no parseable date) are rejected outright:
//! logged and dropped, never silently coerced into the queue.

use crate::models::{ExtractedCandidate, NormalizedShow};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use tracing::debug;

/// Controlled category vocabulary. A hint maps onto one of these only
/// on a confident keyword match; anything else stays uncategorized.
const CATEGORY_VOCAB: [(&str, &[&str]); 6] = [
    ("sports-cards", &["sport", "baseball", "football", "basketball", "hockey"]),
    ("pokemon", &["pokemon", "pokémon"]),
    ("tcg", &["tcg", "magic", "mtg", "yugioh", "yu-gi-oh", "trading card game"]),
    ("memorabilia", &["memorabilia", "collectible", "collectable"]),
    ("comics", &["comic"]),
    ("autographs", &["autograph", "signing"]),
];

static RE_ORDINAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d{1,2})(st|nd|rd|th)\b").unwrap());
static RE_DAY_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([A-Za-z]+)\.?\s+(\d{1,2})\s*[-–]\s*(\d{1,2}),?\s+(\d{4})$").unwrap()
});
static RE_CITY_STATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.*?),\s*([A-Za-z .'-]+?),\s*([A-Z]{2})\.?$").unwrap());
static RE_FEE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$?\s*(\d+(?:\.\d{1,2})?)").unwrap());

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%B %d, %Y",
    "%B %d %Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %B %Y",
];

/// Why a candidate never reached the queue.
#[derive(Debug, PartialEq, Eq)]
pub enum RejectReason {
    NotAnObject,
    MissingName,
    MissingDate,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "payload is not a JSON object"),
            Self::MissingName => write!(f, "no usable show name"),
            Self::MissingDate => write!(f, "no parseable start date"),
        }
    }
}

/// Map one unvalidated candidate onto the canonical schema.
///
/// A single date yields `end_date == start_date`; an unparseable end
/// date falls back to the start date rather than rejecting the record.
pub fn normalize(candidate: &ExtractedCandidate) -> Result<NormalizedShow, RejectReason> {
    let payload = candidate.raw_payload.as_object().ok_or(RejectReason::NotAnObject)?;

    let name = string_field(payload, &["name", "title", "showName"])
        .ok_or(RejectReason::MissingName)?;

    let start_raw = string_field(payload, &["startDate", "start_date", "date"])
        .ok_or(RejectReason::MissingDate)?;
    let (start_date, range_end) = parse_date_range(&start_raw).ok_or(RejectReason::MissingDate)?;

    let end_date = string_field(payload, &["endDate", "end_date"])
        .and_then(|raw| parse_flexible_date(&raw))
        .or(range_end)
        .unwrap_or(start_date)
        .max(start_date);

    let venue_name = string_field(payload, &["venueName", "venue_name", "venue"]);
    let raw_address = string_field(payload, &["address", "location"]);
    let (address, city, state) = match raw_address {
        Some(raw) => split_address(&raw),
        None => (None, None, None),
    };

    let entry_fee = payload
        .get("entryFee")
        .or_else(|| payload.get("entry_fee"))
        .or_else(|| payload.get("admission"))
        .or_else(|| payload.get("fee"))
        .and_then(parse_entry_fee);

    let categories = category_hints(payload)
        .iter()
        .filter_map(|hint| map_category(hint))
        .collect::<Vec<_>>();
    let categories = dedup_preserving_order(categories);

    let description = string_field(payload, &["description", "details"]);

    debug!(name = %name, start = %start_date, end = %end_date, "Normalized candidate");

    Ok(NormalizedShow {
        name,
        start_date,
        end_date,
        venue_name,
        address,
        city,
        state,
        entry_fee,
        categories,
        description,
        coordinates: None,
    })
}

fn string_field(payload: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = payload.get(*key) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Parse a free-text date, tolerating ordinal suffixes (`March 5th`).
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = RE_ORDINAL.replace_all(raw.trim(), "$1");
    let cleaned = cleaned.trim();
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(cleaned, format) {
            return Some(date);
        }
    }
    None
}

/// Parse a date string that may carry a same-month day range
/// (`March 5-6, 2025`) or a full explicit range (`March 5 to March 6, 2025`).
/// Returns the start date and, when present, the range end.
pub fn parse_date_range(raw: &str) -> Option<(NaiveDate, Option<NaiveDate>)> {
    let trimmed = raw.trim();

    // Plain date first: "03-05-2025" contains dashes but is no range.
    if let Some(date) = parse_flexible_date(trimmed) {
        return Some((date, None));
    }

    if let Some(caps) = RE_DAY_RANGE.captures(trimmed) {
        let month = &caps[1];
        let year = &caps[4];
        let start = parse_flexible_date(&format!("{} {}, {}", month, &caps[2], year));
        let end = parse_flexible_date(&format!("{} {}, {}", month, &caps[3], year));
        if let Some(start) = start {
            return Some((start, end));
        }
    }

    for separator in [" to ", " through ", " - ", "–"] {
        if let Some((left, right)) = trimmed.split_once(separator) {
            if let Some(start) = parse_flexible_date(left) {
                return Some((start, parse_flexible_date(right)));
            }
        }
    }

    None
}

/// Split `street, City, ST` into structured fields when the trailing
/// city/state pattern parses confidently; otherwise keep the raw text
/// whole in the address slot.
pub fn split_address(raw: &str) -> (Option<String>, Option<String>, Option<String>) {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return (None, None, None);
    }
    if let Some(caps) = RE_CITY_STATE.captures(trimmed) {
        let street = caps[1].trim().to_string();
        let city = caps[2].trim().to_string();
        let state = caps[3].to_string();
        if !street.is_empty() && !city.is_empty() {
            return (Some(street), Some(city), Some(state));
        }
    }
    (Some(trimmed.to_string()), None, None)
}

/// Parse an entry fee to a dollar amount. `"free"` in any form is 0.0;
/// unparseable text is `None`, not an error.
pub fn parse_entry_fee(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| *f >= 0.0),
        Value::String(s) => {
            let lowered = s.to_lowercase();
            if lowered.contains("free") {
                return Some(0.0);
            }
            RE_FEE
                .captures(&lowered)
                .and_then(|caps| caps[1].parse::<f64>().ok())
        }
        _ => None,
    }
}

fn category_hints(payload: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut hints = Vec::new();
    for key in ["category", "categories", "tags", "features"] {
        match payload.get(key) {
            Some(Value::String(s)) => hints.push(s.clone()),
            Some(Value::Array(items)) => {
                hints.extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
            }
            _ => {}
        }
    }
    hints
}

/// Map one free-text hint onto the controlled vocabulary, or nothing.
pub fn map_category(hint: &str) -> Option<String> {
    let lowered = hint.to_lowercase();
    for (canonical, keywords) in CATEGORY_VOCAB {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return Some(canonical.to_string());
        }
    }
    None
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    use itertools::Itertools;
    items.into_iter().unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(payload: Value) -> ExtractedCandidate {
        ExtractedCandidate {
            source_url: "https://example.com/shows".to_string(),
            raw_payload: payload,
        }
    }

    #[test]
    fn test_single_date_sets_end_to_start() {
        let show = normalize(&candidate(json!({
            "name": "Spring Card Expo",
            "startDate": "March 5, 2025"
        })))
        .unwrap();
        assert_eq!(show.start_date, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert_eq!(show.end_date, show.start_date);
    }

    #[test]
    fn test_missing_name_and_date_rejected() {
        let err = normalize(&candidate(json!({"venueName": "Expo Hall"}))).unwrap_err();
        assert_eq!(err, RejectReason::MissingName);
    }

    #[test]
    fn test_missing_date_rejected() {
        let err = normalize(&candidate(json!({"name": "Expo"}))).unwrap_err();
        assert_eq!(err, RejectReason::MissingDate);
        let err = normalize(&candidate(json!({"name": "Expo", "startDate": "sometime soon"})))
            .unwrap_err();
        assert_eq!(err, RejectReason::MissingDate);
    }

    #[test]
    fn test_non_object_rejected() {
        let err = normalize(&candidate(json!("just a string"))).unwrap_err();
        assert_eq!(err, RejectReason::NotAnObject);
    }

    #[test]
    fn test_date_formats() {
        for raw in [
            "2025-03-05",
            "3/5/2025",
            "03-05-2025",
            "March 5, 2025",
            "Mar 5 2025",
            "March 5th, 2025",
            "5 March 2025",
        ] {
            assert_eq!(
                parse_flexible_date(raw),
                NaiveDate::from_ymd_opt(2025, 3, 5),
                "failed on {raw}"
            );
        }
        assert_eq!(parse_flexible_date("not a date"), None);
    }

    #[test]
    fn test_same_month_day_range() {
        let (start, end) = parse_date_range("March 5-6, 2025").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 6));
    }

    #[test]
    fn test_explicit_range() {
        let (start, end) = parse_date_range("March 5, 2025 to March 7, 2025").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2025, 3, 7));
    }

    #[test]
    fn test_dashed_numeric_date_is_not_a_range() {
        let (start, end) = parse_date_range("03-05-2025").unwrap();
        assert_eq!(start, NaiveDate::from_ymd_opt(2025, 3, 5).unwrap());
        assert_eq!(end, None);
    }

    #[test]
    fn test_end_date_field_wins_over_range_end() {
        let show = normalize(&candidate(json!({
            "name": "Expo",
            "startDate": "March 5-6, 2025",
            "endDate": "March 8, 2025"
        })))
        .unwrap();
        assert_eq!(show.end_date, NaiveDate::from_ymd_opt(2025, 3, 8).unwrap());
    }

    #[test]
    fn test_end_before_start_is_clamped() {
        let show = normalize(&candidate(json!({
            "name": "Expo",
            "startDate": "2025-03-05",
            "endDate": "2025-03-01"
        })))
        .unwrap();
        assert_eq!(show.end_date, show.start_date);
    }

    #[test]
    fn test_address_split_confident() {
        let (street, city, state) = split_address("123 Main St, Springfield, IL");
        assert_eq!(street.as_deref(), Some("123 Main St"));
        assert_eq!(city.as_deref(), Some("Springfield"));
        assert_eq!(state.as_deref(), Some("IL"));
    }

    #[test]
    fn test_address_kept_raw_when_unparseable() {
        let (street, city, state) = split_address("behind the old mill on route 9");
        assert_eq!(street.as_deref(), Some("behind the old mill on route 9"));
        assert_eq!(city, None);
        assert_eq!(state, None);
    }

    #[test]
    fn test_entry_fee_parsing() {
        assert_eq!(parse_entry_fee(&json!("$5")), Some(5.0));
        assert_eq!(parse_entry_fee(&json!("5.50")), Some(5.5));
        assert_eq!(parse_entry_fee(&json!("Free admission")), Some(0.0));
        assert_eq!(parse_entry_fee(&json!("donations welcome")), None);
        assert_eq!(parse_entry_fee(&json!(3)), Some(3.0));
        assert_eq!(parse_entry_fee(&json!(null)), None);
    }

    #[test]
    fn test_category_mapping() {
        assert_eq!(map_category("Sports cards and more"), Some("sports-cards".to_string()));
        assert_eq!(map_category("Pokémon TCG"), Some("pokemon".to_string()));
        assert_eq!(map_category("weird uncategorizable thing"), None);
    }

    #[test]
    fn test_categories_deduped() {
        let show = normalize(&candidate(json!({
            "name": "Expo",
            "startDate": "2025-03-05",
            "categories": ["baseball cards", "football cards", "comic books"]
        })))
        .unwrap();
        assert_eq!(show.categories, vec!["sports-cards", "comics"]);
    }
}
