//! The offline training pipeline: five stages run strictly in order, each
//! reading the previous stage's output from disk.

mod error;
pub mod evaluation;
pub mod ingestion;
pub mod orchestrator;
pub mod stage;
pub mod trainer;
pub mod transformation;
pub mod validation;

pub use error::PipelineError;
pub use evaluation::ModelEvaluation;
pub use ingestion::DataIngestion;
pub use orchestrator::TrainingPipeline;
pub use stage::{Stage, StageKind};
pub use trainer::ModelTrainer;
pub use transformation::DataTransformation;
pub use validation::{ColumnNote, DataValidation, ValidationReport};
