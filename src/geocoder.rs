//! Address geocoding with failure mapped to "unknown", never a guess.
//!
//! The trait returns `Option<Coordinates>`: a timeout, transport error,
//! empty result set, or low-confidence hit all come back as `None`, and
//! callers treat `None` as "pending", not as a blocking error: a show
//! with no coordinates is still persisted and reviewable. A later batch
//! pass may backfill from the city/state centroid table after repeated
//! exact-address failures.

use crate::error::GeocodeError;
use crate::models::Coordinates;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Approximate centroids for metros that show up often in listings.
/// Used only by the explicit backfill pass, never by the live path.
static CITY_CENTROIDS: Lazy<HashMap<String, Coordinates>> = Lazy::new(|| {
    let mut m = HashMap::new();
    let mut put = |city: &str, state: &str, latitude: f64, longitude: f64| {
        m.insert(format!("{city}|{state}"), Coordinates { latitude, longitude });
    };
    put("chicago", "IL", 41.8781, -87.6298);
    put("springfield", "IL", 39.7817, -89.6501);
    put("new york", "NY", 40.7128, -74.0060);
    put("los angeles", "CA", 34.0522, -118.2437);
    put("dallas", "TX", 32.7767, -96.7970);
    put("houston", "TX", 29.7604, -95.3698);
    put("atlanta", "GA", 33.7490, -84.3880);
    put("phoenix", "AZ", 33.4484, -112.0740);
    put("philadelphia", "PA", 39.9526, -75.1652);
    put("columbus", "OH", 39.9612, -82.9988);
    put("cleveland", "OH", 41.4993, -81.6944);
    put("detroit", "MI", 42.3314, -83.0458);
    put("boston", "MA", 42.3601, -71.0589);
    put("seattle", "WA", 47.6062, -122.3321);
    put("denver", "CO", 39.7392, -104.9903);
    put("minneapolis", "MN", 44.9778, -93.2650);
    put("st. louis", "MO", 38.6270, -90.1994);
    put("charlotte", "NC", 35.2271, -80.8431);
    put("tampa", "FL", 27.9506, -82.4572);
    put("las vegas", "NV", 36.1699, -115.1398);
    m
});

/// Resolve a free-text address to coordinates, or `None`.
#[allow(async_fn_in_trait)]
pub trait Geocode {
    async fn geocode(&self, address: &str) -> Option<Coordinates>;
}

#[derive(Debug, Deserialize)]
struct NominatimHit {
    lat: String,
    lon: String,
    #[serde(default)]
    importance: Option<f64>,
}

/// Nominatim-style HTTP geocoder with its own bounded timeout.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    http: reqwest::Client,
    endpoint: String,
    timeout_secs: u64,
    min_importance: f64,
}

impl NominatimGeocoder {
    /// Create a geocoder against a Nominatim-style search endpoint.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - Search URL, queried as `{endpoint}?q={address}&format=json&limit=1`
    /// * `timeout_secs` - Hard bound on one lookup
    /// * `min_importance` - Hits scoring below this count as not-found
    pub fn new(endpoint: &str, timeout_secs: u64, min_importance: f64) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("cardshow_crawler/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap();
        Self {
            http,
            endpoint: endpoint.to_string(),
            timeout_secs,
            min_importance,
        }
    }

    async fn lookup(&self, address: &str) -> Result<Option<Coordinates>, GeocodeError> {
        let url = format!(
            "{}?q={}&format=json&limit=1",
            self.endpoint,
            urlencoding::encode(address)
        );

        let request = self.http.get(&url).send();
        let response = match timeout(Duration::from_secs(self.timeout_secs), request).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) if e.is_timeout() => return Err(GeocodeError::Timeout(self.timeout_secs)),
            Ok(Err(e)) => return Err(GeocodeError::Transport(e)),
            Err(_) => return Err(GeocodeError::Timeout(self.timeout_secs)),
        };

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let hits: Vec<NominatimHit> = response
            .json()
            .await
            .map_err(|e| GeocodeError::BadResponse(e.to_string()))?;

        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        if hit.importance.is_some_and(|imp| imp < self.min_importance) {
            debug!(address, importance = ?hit.importance, "Discarding low-confidence geocode hit");
            return Ok(None);
        }

        let latitude = hit
            .lat
            .parse::<f64>()
            .map_err(|e| GeocodeError::BadResponse(format!("bad latitude: {e}")))?;
        let longitude = hit
            .lon
            .parse::<f64>()
            .map_err(|e| GeocodeError::BadResponse(format!("bad longitude: {e}")))?;

        Ok(Some(Coordinates { latitude, longitude }))
    }
}

impl Geocode for NominatimGeocoder {
    #[instrument(level = "debug", skip_all, fields(%address))]
    async fn geocode(&self, address: &str) -> Option<Coordinates> {
        match self.lookup(address).await {
            Ok(coords) => coords,
            Err(e) => {
                warn!(address, error = %e, "Geocoding failed; persisting without coordinates");
                None
            }
        }
    }
}

/// Centroid fallback for the batch backfill pass: a rough city-level
/// location for rows whose exact address has repeatedly failed.
pub fn centroid_fallback(city: &str, state: &str) -> Option<Coordinates> {
    let key = format!("{}|{}", city.trim().to_lowercase(), state.trim().to_uppercase());
    CITY_CENTROIDS.get(&key).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centroid_fallback_known_city() {
        let coords = centroid_fallback("Springfield", "il").unwrap();
        assert!((coords.latitude - 39.7817).abs() < 1e-6);
        assert!((coords.longitude + 89.6501).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_fallback_unknown_city() {
        assert!(centroid_fallback("Nowhereville", "ZZ").is_none());
    }

    #[test]
    fn test_nominatim_hit_parsing() {
        let body = r#"[{"lat": "39.78", "lon": "-89.65", "importance": 0.72}]"#;
        let hits: Vec<NominatimHit> = serde_json::from_str(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].lat, "39.78");
        assert_eq!(hits[0].importance, Some(0.72));
    }

    #[test]
    fn test_nominatim_hit_without_importance() {
        let body = r#"[{"lat": "1.0", "lon": "2.0"}]"#;
        let hits: Vec<NominatimHit> = serde_json::from_str(body).unwrap();
        assert_eq!(hits[0].importance, None);
    }
}
