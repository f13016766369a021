//! JSON-file persistence under the data directory.
//!
//! The only durable shared state in the pipeline is the source catalog
//! and the pending-show queue; both live as JSON files in `--data-dir`
//! and are rewritten atomically (write to a temp file, then rename) so
//! a crash mid-write never corrupts the previous snapshot.

pub mod pending;
pub mod sources;

use crate::error::StoreError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Load a JSON data file, yielding the default value when the file
/// doesn't exist yet. A present-but-unparseable file is an error: it
/// means a real snapshot got damaged and silently discarding it would
/// lose review state.
pub async fn load_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match fs::read_to_string(path).await {
        Ok(data) => serde_json::from_str(&data).map_err(|e| StoreError::Corrupt {
            path: path.display().to_string(),
            source: e,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(StoreError::Read {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// Atomically replace a JSON data file: write a sibling temp file, then
/// rename over the target.
pub async fn save_json<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize,
{
    let json = serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupt {
        path: path.display().to_string(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).await.map_err(|e| StoreError::Write {
        path: tmp.display().to_string(),
        source: e,
    })?;
    fs::rename(&tmp, path).await.map_err(|e| StoreError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

/// Ensure the data directory exists and is writable by creating it and
/// probing with a throwaway file.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn ensure_writable_dir(path: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(path).await.map_err(|e| StoreError::Write {
        path: path.display().to_string(),
        source: e,
    })?;

    let probe = path.join(".__probe_write__");
    match std::fs::File::create(&probe) {
        Ok(_) => {
            let _ = std::fs::remove_file(&probe);
            info!("Data directory is writable");
            Ok(())
        }
        Err(e) => Err(StoreError::Write {
            path: probe.display().to_string(),
            source: e,
        }),
    }
}
