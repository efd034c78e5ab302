//! JSON artifacts: metrics records, label lists, dataset descriptors.

use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::StoreError;

/// Pretty-print `value` to `path`, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let body = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, body).map_err(|e| StoreError::io(path, e))?;
    debug!(path = %path.display(), "saved json");
    Ok(())
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Err(StoreError::FileNotFound(path.to_path_buf()));
    }
    let body = std::fs::read_to_string(path).map_err(|e| StoreError::io(path, e))?;
    serde_json::from_str(&body).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use documind_core::ClassificationScores;

    #[test]
    fn metrics_record_is_flat_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model_evaluation/metrics.json");
        let scores = ClassificationScores {
            accuracy: 0.82,
            f1: 0.8,
            precision: 0.81,
            recall: 0.82,
        };
        save_json(&path, &scores).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["accuracy"], 0.82);
        let loaded: ClassificationScores = load_json(&path).unwrap();
        assert_eq!(loaded, scores);
    }

    #[test]
    fn malformed_json_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_json::<serde_json::Value>(&path).unwrap_err();
        assert!(err.to_string().contains("bad.json"));
    }
}
