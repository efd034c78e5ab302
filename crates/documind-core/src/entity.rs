//! Shared records passed between the pipeline, the tracker, and the HTTP shell.

use serde::{Deserialize, Serialize};

/// Aggregate classification scores over a held-out partition.
///
/// Precision, recall and F1 are support-weighted averages over classes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationScores {
    pub accuracy: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
}

impl ClassificationScores {
    /// `(name, value)` pairs in a stable order, for flat key-value sinks.
    pub fn entries(&self) -> [(&'static str, f64); 4] {
        [
            ("accuracy", self.accuracy),
            ("f1", self.f1),
            ("precision", self.precision),
            ("recall", self.recall),
        ]
    }
}

/// Body of `POST /audit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRequest {
    pub text: String,
}

/// Response of `POST /audit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditResponse {
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_classification")]
    pub classification: String,
    pub risk_analysis: String,
    pub raw_agent_output: String,
}

fn default_filename() -> String {
    "input_text".to_string()
}

fn default_classification() -> String {
    "Unknown".to_string()
}

impl AuditResponse {
    pub fn new(classification: Option<String>, raw_agent_output: String) -> Self {
        Self {
            filename: default_filename(),
            classification: classification.unwrap_or_else(default_classification),
            risk_analysis: "Processed by Agent".to_string(),
            raw_agent_output,
        }
    }
}
