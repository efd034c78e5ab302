//! Stage 5: score the saved model on the test split, write `metrics.json`,
//! and record the run in the experiment tracker.

use anyhow::Context;
use async_trait::async_trait;
use documind_ai::{SequenceClassifier, compute_scores};
use documind_core::{ClassificationScores, ModelEvaluationConfig, Split};
use documind_store::json::save_json;
use documind_store::tracker::flatten_params;
use documind_store::{EncodedDataset, EncodedExamples, ExperimentTracker};
use tracing::{debug, info};

use crate::stage::{Stage, StageKind};

pub struct ModelEvaluation {
    config: ModelEvaluationConfig,
}

impl ModelEvaluation {
    pub fn new(config: ModelEvaluationConfig) -> Self {
        Self { config }
    }

    pub fn evaluation(&self) -> anyhow::Result<ClassificationScores> {
        let model_path = &self.config.model_path;
        let classifier = SequenceClassifier::load(model_path)
            .with_context(|| format!("loading model from {}", model_path.display()))?;

        let dataset = EncodedDataset::load(&self.config.data_path).with_context(|| {
            format!("loading encoded dataset from {}", self.config.data_path.display())
        })?;
        let test = EncodedExamples::from_batch(dataset.split(Split::Test)?)?;
        anyhow::ensure!(!test.is_empty(), "test split is empty");
        anyhow::ensure!(
            dataset.max_length() == classifier.max_length(),
            "dataset encoded to {} tokens but model expects {}",
            dataset.max_length(),
            classifier.max_length()
        );

        let y_true = test
            .labels
            .iter()
            .map(|&l| usize::try_from(l).with_context(|| format!("negative label {l}")))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let batch_size = self.config.eval_batch_size.max(1);
        let mut y_pred = Vec::with_capacity(test.len());
        for (i, (ids, mask)) in test
            .input_ids
            .chunks(batch_size)
            .zip(test.attention_mask.chunks(batch_size))
            .enumerate()
        {
            let predictions = classifier.predict_encoded(ids, mask)?;
            y_pred.extend(predictions.into_iter().map(|p| p.label_id));
            debug!(batch = i, done = y_pred.len(), total = test.len(), "evaluated batch");
        }

        let scores = compute_scores(&y_true, &y_pred);
        info!(
            accuracy = scores.accuracy,
            f1 = scores.f1,
            precision = scores.precision,
            recall = scores.recall,
            rows = test.len(),
            "evaluation complete"
        );

        save_json(&self.config.metric_file_name, &scores)?;
        info!(path = %self.config.metric_file_name.display(), "metrics saved");
        self.track(&scores)?;
        Ok(scores)
    }

    fn track(&self, scores: &ClassificationScores) -> anyhow::Result<()> {
        let params = flatten_params(&self.config)?;
        let tracker = ExperimentTracker::new(&self.config.tracking_dir)?;
        let run = tracker.start_run(&self.config.experiment_name)?;
        run.record(&params, scores).context("recording evaluation run")?;
        Ok(())
    }
}

#[async_trait]
impl Stage for ModelEvaluation {
    fn name(&self) -> &'static str {
        StageKind::Evaluation.stage_name()
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.evaluation().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use documind_ai::testing::{toy_tokenizer, write_toy_artifact};
    use documind_store::encoded::encode_batch;
    use std::path::Path;

    /// Artifact that always answers "Governing Laws", plus a test split it
    /// gets three of four right on.
    fn setup(root: &Path) -> ModelEvaluationConfig {
        let model_path = root.join("bert-classifier");
        write_toy_artifact(&model_path, &["Notices", "Governing Laws"], &[0.0, 2.0], 8).unwrap();

        let rows = [
            ("notices in writing", 0i64),
            ("the laws of new york", 1),
            ("laws of delaware", 1),
            ("notices of termination", 1),
        ];
        let tok = toy_tokenizer(8);
        let texts: Vec<String> = rows.iter().map(|(t, _)| t.to_string()).collect();
        let labels: Vec<i64> = rows.iter().map(|(_, l)| *l).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let enc = tok.encode_batch(&refs).unwrap();
        let ids: Vec<Vec<u32>> = enc.iter().map(|e| e.input_ids.clone()).collect();
        let mask: Vec<Vec<u32>> = enc.iter().map(|e| e.attention_mask.clone()).collect();
        let mut dataset = EncodedDataset::new(8, "toy");
        dataset
            .insert(Split::Test, encode_batch(&texts, &labels, &ids, &mask, 8).unwrap())
            .unwrap();
        let data_path = root.join("encoded_dataset");
        dataset.save(&data_path).unwrap();

        let eval_root = root.join("model_evaluation");
        std::fs::create_dir_all(&eval_root).unwrap();
        ModelEvaluationConfig {
            metric_file_name: eval_root.join("metrics.json"),
            root_dir: eval_root,
            data_path,
            tokenizer_path: model_path.clone(),
            model_path,
            eval_batch_size: 3,
            tracking_dir: root.join("mlruns"),
            experiment_name: "DocuMind-Classification".into(),
        }
    }

    #[test]
    fn writes_metrics_and_tracks_run() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = setup(tmp.path());
        let scores = ModelEvaluation::new(cfg.clone()).evaluation().unwrap();

        assert!((scores.accuracy - 0.75).abs() < 1e-9);
        let saved: ClassificationScores = serde_json::from_str(
            &std::fs::read_to_string(&cfg.metric_file_name).unwrap(),
        )
        .unwrap();
        assert_eq!(saved, scores);

        let experiment = cfg.tracking_dir.join("1");
        let runs: Vec<_> = std::fs::read_dir(&experiment)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .collect();
        assert_eq!(runs.len(), 1);
        let run = runs[0].path();
        assert_eq!(
            std::fs::read_to_string(run.join("params").join("eval_batch_size")).unwrap(),
            "3"
        );
        let accuracy = std::fs::read_to_string(run.join("metrics").join("accuracy")).unwrap();
        assert!(accuracy.trim_end().ends_with(" 0.75 0"));
        let meta = std::fs::read_to_string(run.join("meta.yaml")).unwrap();
        assert!(meta.contains("status: 3"), "{meta}");
    }

    #[test]
    fn missing_model_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = setup(tmp.path());
        cfg.model_path = tmp.path().join("absent");
        assert!(ModelEvaluation::new(cfg).evaluation().is_err());
    }

    #[test]
    fn max_length_mismatch_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = setup(tmp.path());
        write_toy_artifact(&cfg.model_path, &["Notices", "Governing Laws"], &[0.0, 2.0], 16)
            .unwrap();
        let err = ModelEvaluation::new(cfg).evaluation().unwrap_err();
        assert!(err.to_string().contains("model expects 16"));
    }
}
