pub mod config;
pub mod entity;
pub mod error;
pub mod schema;

pub use config::{
    AgentConfig, ConfigurationManager, DataIngestionConfig, DataTransformationConfig,
    DataValidationConfig, ModelEvaluationConfig, ModelTrainerConfig, PipelineConfig,
    PredictionConfig, ServerConfig, SliceSizes,
};
pub use entity::{AuditRequest, AuditResponse, ClassificationScores};
pub use error::ConfigError;
pub use schema::Split;
