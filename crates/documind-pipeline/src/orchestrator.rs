//! Runs the stages in fixed order, stopping at the first failure.

use documind_core::{ConfigurationManager, PipelineConfig};
use tracing::{error, info};

use crate::error::PipelineError;
use crate::evaluation::ModelEvaluation;
use crate::ingestion::DataIngestion;
use crate::stage::{Stage, StageKind};
use crate::trainer::ModelTrainer;
use crate::transformation::DataTransformation;
use crate::validation::DataValidation;

pub struct TrainingPipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl TrainingPipeline {
    /// Resolve every stage config up front, then build the five stages.
    /// Configuration errors surface here, before anything runs.
    pub fn from_manager(manager: &ConfigurationManager) -> Result<Self, PipelineError> {
        let config = manager.resolve_all()?;
        Ok(Self::from_config(&config))
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let stages = StageKind::ALL
            .iter()
            .map(|&kind| build_stage(config, kind))
            .collect();
        Self { stages }
    }

    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&mut self) -> Result<(), PipelineError> {
        for stage in &mut self.stages {
            run_stage(stage.as_mut()).await?;
        }
        Ok(())
    }
}

/// Build the driver for one stage.
pub fn build_stage(config: &PipelineConfig, kind: StageKind) -> Box<dyn Stage> {
    match kind {
        StageKind::Ingestion => Box::new(DataIngestion::new(config.ingestion.clone())),
        StageKind::Validation => Box::new(DataValidation::new(config.validation.clone())),
        StageKind::Transformation => {
            Box::new(DataTransformation::new(config.transformation.clone()))
        }
        StageKind::Trainer => Box::new(ModelTrainer::new(config.trainer.clone())),
        StageKind::Evaluation => Box::new(ModelEvaluation::new(config.evaluation.clone())),
    }
}

/// Run a single stage with the start/complete banners.
pub async fn run_stage(stage: &mut dyn Stage) -> Result<(), PipelineError> {
    let name = stage.name();
    info!(">>>>>> Stage {name} started <<<<<<");
    match stage.run().await {
        Ok(()) => {
            info!(">>>>>> Stage {name} completed <<<<<<\n\nx==========x");
            Ok(())
        }
        Err(source) => {
            error!(stage = name, "stage failed: {source:#}");
            Err(PipelineError::Stage {
                stage: name,
                source,
            })
        }
    }
}
