//! The Prediction Tool: free text in, a label from the artifact's label set out.

use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::classifier::SequenceClassifier;

/// Sentinel returned by [`PredictionTool::predict_label`] on failure.
pub const ERROR_LABEL: &str = "Error";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label_id: usize,
    pub label: String,
    /// Softmax probability of the chosen class.
    pub confidence: f32,
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("failed to load model from {path}: {source:#}")]
    Load {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),
    #[error("classifier lock poisoned by an earlier panic")]
    Poisoned,
}

/// Anything that can classify a clause. The agent and HTTP layers hold this
/// rather than the concrete tool.
pub trait Classify: Send + Sync {
    fn classify(&self, text: &str) -> Result<Prediction, PredictError>;
}

/// Shared, thread-safe wrapper around a loaded classifier. Calls are
/// serialized by an internal mutex.
pub struct PredictionTool {
    classifier: Mutex<SequenceClassifier>,
}

impl PredictionTool {
    /// Load the artifact at `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, PredictError> {
        info!(path = %model_path.display(), "loading classification model");
        let classifier = SequenceClassifier::load(model_path).map_err(|source| PredictError::Load {
            path: model_path.display().to_string(),
            source,
        })?;
        Ok(Self::new(classifier))
    }

    pub fn new(classifier: SequenceClassifier) -> Self {
        Self {
            classifier: Mutex::new(classifier),
        }
    }

    pub fn predict(&self, text: &str) -> Result<Prediction, PredictError> {
        let classifier = self.classifier.lock().map_err(|_| PredictError::Poisoned)?;
        classifier.predict(text).map_err(PredictError::Inference)
    }

    /// The label name, or `"Error"` when prediction fails.
    pub fn predict_label(&self, text: &str) -> String {
        match self.predict(text) {
            Ok(p) => p.label,
            Err(e) => {
                error!(error = %e, "prediction error");
                ERROR_LABEL.to_string()
            }
        }
    }

    pub fn num_labels(&self) -> Result<usize, PredictError> {
        let classifier = self.classifier.lock().map_err(|_| PredictError::Poisoned)?;
        Ok(classifier.labels().len())
    }
}

impl Classify for PredictionTool {
    fn classify(&self, text: &str) -> Result<Prediction, PredictError> {
        self.predict(text)
    }
}
