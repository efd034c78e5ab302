use documind_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("stage {stage} failed: {source:#}")]
    Stage {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("unknown stage `{0}`; expected one of: ingestion, validation, transformation, trainer, evaluation")]
    UnknownStage(String),
}
