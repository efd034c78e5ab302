//! The seam between the orchestrator and the stage drivers.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;

use crate::error::PipelineError;

/// One step of the training pipeline.
#[async_trait]
pub trait Stage: Send {
    /// Name used in the `>>>>>> Stage ... <<<<<<` log lines.
    fn name(&self) -> &'static str;

    async fn run(&mut self) -> anyhow::Result<()>;
}

/// The five stages, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Ingestion,
    Validation,
    Transformation,
    Trainer,
    Evaluation,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Ingestion,
        StageKind::Validation,
        StageKind::Transformation,
        StageKind::Trainer,
        StageKind::Evaluation,
    ];

    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Ingestion => "Data Ingestion",
            Self::Validation => "Data Validation",
            Self::Transformation => "Data Transformation",
            Self::Trainer => "Model Trainer",
            Self::Evaluation => "Model Evaluation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stage_name())
    }
}

impl FromStr for StageKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ingestion" | "data_ingestion" => Ok(Self::Ingestion),
            "validation" | "data_validation" => Ok(Self::Validation),
            "transformation" | "data_transformation" => Ok(Self::Transformation),
            "trainer" | "model_trainer" => Ok(Self::Trainer),
            "evaluation" | "model_evaluation" => Ok(Self::Evaluation),
            _ => Err(PipelineError::UnknownStage(s.to_string())),
        }
    }
}
