//! File-backed experiment tracker using the MLflow file-store layout, so an
//! `mlflow ui --backend-store-uri mlruns` can browse the runs.
//!
//! ```text
//! mlruns/
//!   <experiment_id>/meta.yaml
//!   <experiment_id>/<run_id>/meta.yaml
//!   <experiment_id>/<run_id>/params/<key>      value
//!   <experiment_id>/<run_id>/metrics/<key>     "<timestamp_ms> <value> <step>" per line
//!   <experiment_id>/<run_id>/tags/<key>        value
//! ```

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use documind_core::ClassificationScores;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::StoreError;

const META_FILE: &str = "meta.yaml";

/// Run status codes as stored in run `meta.yaml`.
const RUN_RUNNING: u8 = 1;
const RUN_FINISHED: u8 = 3;
const RUN_FAILED: u8 = 4;
/// `LOCAL` source type.
const SOURCE_LOCAL: u8 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentMeta {
    artifact_location: String,
    creation_time: i64,
    experiment_id: String,
    last_update_time: i64,
    lifecycle_stage: String,
    name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMeta {
    artifact_uri: String,
    end_time: Option<i64>,
    entry_point_name: String,
    experiment_id: String,
    lifecycle_stage: String,
    run_id: String,
    run_name: String,
    run_uuid: String,
    source_name: String,
    source_type: u8,
    source_version: String,
    start_time: i64,
    status: u8,
    tags: Vec<String>,
    user_id: String,
}

/// Root of a tracking store.
#[derive(Debug, Clone)]
pub struct ExperimentTracker {
    root: PathBuf,
}

impl ExperimentTracker {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Id of the experiment named `name`, creating it when absent.
    pub fn get_or_create_experiment(&self, name: &str) -> Result<String, StoreError> {
        let mut max_id: Option<u64> = None;
        for (id, meta) in self.experiments()? {
            if meta.name == name && meta.lifecycle_stage == "active" {
                return Ok(id);
            }
            if let Ok(n) = id.parse::<u64>() {
                max_id = Some(max_id.map_or(n, |m| m.max(n)));
            }
        }

        // `0` is the store's default experiment.
        let id = max_id.map_or(1, |m| m + 1).to_string();
        let dir = self.root.join(&id);
        std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let now = now_ms();
        let meta = ExperimentMeta {
            artifact_location: file_uri(&dir),
            creation_time: now,
            experiment_id: id.clone(),
            last_update_time: now,
            lifecycle_stage: "active".into(),
            name: name.to_string(),
        };
        write_yaml(&dir.join(META_FILE), &meta)?;
        info!(experiment = name, id = %id, "created experiment");
        Ok(id)
    }

    /// Start a new run in the named experiment.
    pub fn start_run(&self, experiment_name: &str) -> Result<RunHandle, StoreError> {
        let experiment_id = self.get_or_create_experiment(experiment_name)?;
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.root.join(&experiment_id).join(&run_id);
        for sub in ["params", "metrics", "tags", "artifacts"] {
            let path = dir.join(sub);
            std::fs::create_dir_all(&path).map_err(|e| StoreError::io(&path, e))?;
        }

        let run_name = format!("evaluation-{}", &run_id[..8]);
        let meta = RunMeta {
            artifact_uri: file_uri(&dir.join("artifacts")),
            end_time: None,
            entry_point_name: String::new(),
            experiment_id: experiment_id.clone(),
            lifecycle_stage: "active".into(),
            run_id: run_id.clone(),
            run_name: run_name.clone(),
            run_uuid: run_id.clone(),
            source_name: String::new(),
            source_type: SOURCE_LOCAL,
            source_version: String::new(),
            start_time: now_ms(),
            status: RUN_RUNNING,
            tags: Vec::new(),
            user_id: std::env::var("USER").unwrap_or_default(),
        };
        write_yaml(&dir.join(META_FILE), &meta)?;

        let run = RunHandle {
            dir,
            experiment_id,
            run_id,
        };
        run.set_tag("mlflow.runName", &run_name)?;
        info!(experiment = experiment_name, run_id = %run.run_id, "started run");
        Ok(run)
    }

    fn experiments(&self) -> Result<Vec<(String, ExperimentMeta)>, StoreError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let meta_path = entry.path().join(META_FILE);
            if !meta_path.is_file() {
                continue;
            }
            let body =
                std::fs::read_to_string(&meta_path).map_err(|e| StoreError::io(&meta_path, e))?;
            let meta: ExperimentMeta = serde_yaml::from_str(&body)?;
            found.push((entry.file_name().to_string_lossy().into_owned(), meta));
        }
        Ok(found)
    }
}

/// An open run. Call [`end`](Self::end) when done.
#[derive(Debug)]
pub struct RunHandle {
    dir: PathBuf,
    experiment_id: String,
    run_id: String,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn log_param(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.dir.join("params").join(sanitize_key(key));
        std::fs::write(&path, value).map_err(|e| StoreError::io(&path, e))
    }

    pub fn log_params(&self, params: &BTreeMap<String, String>) -> Result<(), StoreError> {
        for (key, value) in params {
            self.log_param(key, value)?;
        }
        info!(run_id = %self.run_id, count = params.len(), "logged params");
        Ok(())
    }

    pub fn log_metric(&self, key: &str, value: f64, step: u64) -> Result<(), StoreError> {
        let path = self.dir.join("metrics").join(sanitize_key(key));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        writeln!(file, "{} {} {}", now_ms(), value, step).map_err(|e| StoreError::io(&path, e))
    }

    pub fn log_scores(&self, scores: &ClassificationScores) -> Result<(), StoreError> {
        for (key, value) in scores.entries() {
            self.log_metric(key, value, 0)?;
        }
        info!(run_id = %self.run_id, accuracy = scores.accuracy, f1 = scores.f1, "logged metrics");
        Ok(())
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.dir.join("tags").join(sanitize_key(key));
        std::fs::write(&path, value).map_err(|e| StoreError::io(&path, e))
    }

    /// Log `params` then `scores` and end the run. A failed write ends the
    /// run as `FAILED` and is returned; otherwise the run ends `FINISHED`.
    pub fn record(
        self,
        params: &BTreeMap<String, String>,
        scores: &ClassificationScores,
    ) -> Result<(), StoreError> {
        let logged = self
            .log_params(params)
            .and_then(|()| self.log_scores(scores));
        if let Err(e) = &logged {
            warn!(run_id = %self.run_id, error = %e, "logging failed, ending run as failed");
        }
        self.end(logged.is_ok())?;
        logged
    }

    /// Mark the run finished (or failed) and stamp its end time.
    pub fn end(self, success: bool) -> Result<(), StoreError> {
        let path = self.dir.join(META_FILE);
        let body = std::fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        let mut meta: RunMeta = serde_yaml::from_str(&body)?;
        meta.end_time = Some(now_ms());
        meta.status = if success { RUN_FINISHED } else { RUN_FAILED };
        write_yaml(&path, &meta)?;
        info!(run_id = %self.run_id, success, "ended run");
        Ok(())
    }
}

/// Flatten any serializable record into `key → value` strings. Nested
/// objects are joined with `.`.
pub fn flatten_params<T: Serialize>(record: &T) -> Result<BTreeMap<String, String>, StoreError> {
    let value = serde_json::to_value(record).map_err(|e| StoreError::Other(e.to_string()))?;
    let mut out = BTreeMap::new();
    flatten_into(String::new(), &value, &mut out);
    Ok(out)
}

fn flatten_into(prefix: String, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(key, child, out);
            }
        }
        serde_json::Value::String(s) => {
            out.insert(prefix, s.clone());
        }
        other => {
            out.insert(prefix, other.to_string());
        }
    }
}

fn sanitize_key(key: &str) -> String {
    key.replace(['/', '\\'], "_")
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = serde_yaml::to_string(value)?;
    std::fs::write(path, body).map_err(|e| StoreError::io(path, e))
}

fn file_uri(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", abs.display())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct EvalParams {
        model_path: PathBuf,
        eval_batch_size: usize,
        nested: Inner,
    }

    #[derive(Serialize)]
    struct Inner {
        seed: u64,
    }

    #[test]
    fn experiment_is_reused_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::new(tmp.path().join("mlruns")).unwrap();
        let a = tracker.get_or_create_experiment("DocuMind-Classification").unwrap();
        let b = tracker.get_or_create_experiment("DocuMind-Classification").unwrap();
        let c = tracker.get_or_create_experiment("Other").unwrap();
        assert_eq!(a, "1");
        assert_eq!(a, b);
        assert_eq!(c, "2");
    }

    #[test]
    fn run_layout_matches_file_store() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::new(tmp.path().join("mlruns")).unwrap();
        let run = tracker.start_run("DocuMind-Classification").unwrap();
        let dir = run.dir().to_path_buf();

        let mut params = BTreeMap::new();
        params.insert("eval_batch_size".to_string(), "8".to_string());
        run.log_params(&params).unwrap();
        run.log_scores(&ClassificationScores {
            accuracy: 0.5,
            f1: 0.25,
            precision: 0.5,
            recall: 0.5,
        })
        .unwrap();
        run.end(true).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.join("params/eval_batch_size")).unwrap(),
            "8"
        );
        let line = std::fs::read_to_string(dir.join("metrics/f1")).unwrap();
        let fields: Vec<&str> = line.trim().split(' ').collect();
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[1], "0.25");
        assert_eq!(fields[2], "0");

        let meta: RunMeta =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("meta.yaml")).unwrap())
                .unwrap();
        assert_eq!(meta.status, RUN_FINISHED);
        assert!(meta.end_time.is_some());
        assert!(tmp.path().join("mlruns/1/meta.yaml").exists());
    }

    fn status(dir: &Path) -> u8 {
        let meta: RunMeta =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("meta.yaml")).unwrap())
                .unwrap();
        meta.status
    }

    fn scores() -> ClassificationScores {
        ClassificationScores {
            accuracy: 0.5,
            f1: 0.25,
            precision: 0.5,
            recall: 0.5,
        }
    }

    #[test]
    fn record_ends_run_finished() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::new(tmp.path()).unwrap();
        let run = tracker.start_run("exp").unwrap();
        let dir = run.dir().to_path_buf();
        let mut params = BTreeMap::new();
        params.insert("seed".to_string(), "42".to_string());
        run.record(&params, &scores()).unwrap();
        assert_eq!(status(&dir), RUN_FINISHED);
        assert!(dir.join("metrics/accuracy").exists());
    }

    #[test]
    fn failed_metric_write_still_ends_run() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::new(tmp.path()).unwrap();
        let run = tracker.start_run("exp").unwrap();
        let dir = run.dir().to_path_buf();
        // A plain file where the metrics directory should be.
        std::fs::remove_dir_all(dir.join("metrics")).unwrap();
        std::fs::write(dir.join("metrics"), b"").unwrap();

        let err = run.record(&BTreeMap::new(), &scores()).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }), "{err:?}");
        assert_eq!(status(&dir), RUN_FAILED);
        let meta: RunMeta =
            serde_yaml::from_str(&std::fs::read_to_string(dir.join("meta.yaml")).unwrap())
                .unwrap();
        assert!(meta.end_time.is_some());
    }

    #[test]
    fn runs_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        let tracker = ExperimentTracker::new(tmp.path()).unwrap();
        let first = tracker.start_run("exp").unwrap();
        let second = tracker.start_run("exp").unwrap();
        assert_ne!(first.run_id(), second.run_id());
        assert_eq!(first.experiment_id(), second.experiment_id());
    }

    #[test]
    fn params_flatten_nested_records() {
        let params = flatten_params(&EvalParams {
            model_path: PathBuf::from("artifacts/model_trainer/bert-classifier"),
            eval_batch_size: 8,
            nested: Inner { seed: 42 },
        })
        .unwrap();
        assert_eq!(params["model_path"], "artifacts/model_trainer/bert-classifier");
        assert_eq!(params["eval_batch_size"], "8");
        assert_eq!(params["nested.seed"], "42");
    }
}
