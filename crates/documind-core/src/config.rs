//! Configuration resolver.
//!
//! Three declarative YAML documents drive every run:
//!
//! - the pipeline document (`config/config.yaml`): paths, dataset identifiers,
//!   inference endpoints;
//! - the params document (`params.yaml`): training hyperparameters under
//!   `TrainingArguments`;
//! - the schema document (`schema.yaml`): expected columns under `COLUMNS`.
//!
//! All three are parsed into typed documents when the [`ConfigurationManager`] is
//! built, so a missing document or key fails before any stage runs. Each accessor
//! then resolves cross-document values, creates the directories its consumer
//! writes into, and returns an immutable record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;
use crate::schema::Split;

pub const CONFIG_FILE_PATH: &str = "config/config.yaml";
pub const PARAMS_FILE_PATH: &str = "params.yaml";
pub const SCHEMA_FILE_PATH: &str = "schema.yaml";

/// Directory name of the fine-tuned model inside the trainer's root.
pub const MODEL_DIR_NAME: &str = "bert-classifier";
/// Directory name of the encoded dataset inside the transformation root.
pub const ENCODED_DIR_NAME: &str = "encoded_dataset";
/// Label-name list written next to the ingested partitions.
pub const LABELS_FILE_NAME: &str = "labels.json";

// ── Declarative documents ──

#[derive(Debug, Clone, Deserialize)]
struct PipelineDocument {
    artifacts_root: PathBuf,
    data_ingestion: IngestionSection,
    data_validation: ValidationSection,
    data_transformation: TransformationSection,
    model_trainer: TrainerSection,
    model_evaluation: EvaluationSection,
    prediction: PredictionSection,
    agent: AgentSection,
    server: ServerSection,
}

#[derive(Debug, Clone, Deserialize)]
struct IngestionSection {
    root_dir: PathBuf,
    registry_url: String,
    dataset_name: String,
    subset_name: String,
    local_data_file: PathBuf,
    #[serde(default)]
    slices: SliceSizes,
}

#[derive(Debug, Clone, Deserialize)]
struct ValidationSection {
    root_dir: PathBuf,
    report_file: PathBuf,
    required_files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TransformationSection {
    root_dir: PathBuf,
    data_path: PathBuf,
    tokenizer_dir: PathBuf,
    max_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct TrainerSection {
    root_dir: PathBuf,
    data_path: PathBuf,
    model_ckpt: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct EvaluationSection {
    root_dir: PathBuf,
    data_path: PathBuf,
    model_path: PathBuf,
    metric_file_name: PathBuf,
    tracking_dir: PathBuf,
    experiment_name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct PredictionSection {
    model_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentSection {
    model_id: String,
    base_url: String,
    temperature: f32,
    max_new_tokens: u32,
    max_steps: usize,
}

#[derive(Debug, Clone, Deserialize)]
struct ServerSection {
    host: String,
    port: u16,
}

#[derive(Debug, Clone, Deserialize)]
struct ParamsDocument {
    #[serde(rename = "TrainingArguments")]
    training_arguments: TrainingArguments,
}

#[derive(Debug, Clone, Deserialize)]
struct TrainingArguments {
    epochs: usize,
    batch_size: usize,
    learning_rate: f32,
    weight_decay: f32,
    logging_steps: usize,
    seed: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaDocument {
    #[serde(rename = "COLUMNS")]
    columns: BTreeMap<String, String>,
}

// ── Stage configuration records ──

/// Number of leading rows taken from each remote partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceSizes {
    pub train: usize,
    pub test: usize,
    pub validation: usize,
}

impl SliceSizes {
    pub fn for_split(&self, split: Split) -> usize {
        match split {
            Split::Train => self.train,
            Split::Test => self.test,
            Split::Validation => self.validation,
        }
    }
}

impl Default for SliceSizes {
    fn default() -> Self {
        Self {
            train: 5000,
            test: 1000,
            validation: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataIngestionConfig {
    pub root_dir: PathBuf,
    pub registry_url: String,
    pub dataset_name: String,
    pub subset_name: String,
    pub local_data_file: PathBuf,
    pub slices: SliceSizes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataValidationConfig {
    pub root_dir: PathBuf,
    pub report_file: PathBuf,
    /// Directory holding the ingested partitions.
    pub data_dir: PathBuf,
    pub required_files: Vec<String>,
    /// Expected column name → type descriptor.
    pub all_schema: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataTransformationConfig {
    pub root_dir: PathBuf,
    pub data_path: PathBuf,
    pub tokenizer_dir: PathBuf,
    pub max_length: usize,
}

impl DataTransformationConfig {
    /// Directory the ingested CSV partitions are read from.
    pub fn data_dir(&self) -> &Path {
        self.data_path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Directory the encoded dataset is saved to.
    pub fn output_dir(&self) -> PathBuf {
        self.root_dir.join(ENCODED_DIR_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelTrainerConfig {
    pub root_dir: PathBuf,
    pub data_path: PathBuf,
    pub model_ckpt: PathBuf,
    pub labels_path: PathBuf,
    pub num_train_epochs: usize,
    pub per_device_train_batch_size: usize,
    pub weight_decay: f32,
    pub learning_rate: f32,
    pub logging_steps: usize,
    pub seed: u64,
}

impl ModelTrainerConfig {
    /// Directory the fine-tuned model and tokenizer are saved to.
    pub fn artifact_dir(&self) -> PathBuf {
        self.root_dir.join(MODEL_DIR_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelEvaluationConfig {
    pub root_dir: PathBuf,
    pub data_path: PathBuf,
    pub model_path: PathBuf,
    /// The tokenizer is saved with the model.
    pub tokenizer_path: PathBuf,
    pub metric_file_name: PathBuf,
    pub eval_batch_size: usize,
    pub tracking_dir: PathBuf,
    pub experiment_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionConfig {
    pub model_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentConfig {
    pub model_id: String,
    pub base_url: String,
    pub temperature: f32,
    pub max_new_tokens: u32,
    pub max_steps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Every stage's configuration, resolved up front.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ingestion: DataIngestionConfig,
    pub validation: DataValidationConfig,
    pub transformation: DataTransformationConfig,
    pub trainer: ModelTrainerConfig,
    pub evaluation: ModelEvaluationConfig,
}

// ── Resolver ──

/// Loads the three declarative documents and materializes stage configs.
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: PipelineDocument,
    params: ParamsDocument,
    schema: SchemaDocument,
}

impl ConfigurationManager {
    /// Load all three documents and create the artifacts root.
    pub fn new(
        config_filepath: &Path,
        params_filepath: &Path,
        schema_filepath: &Path,
    ) -> Result<Self, ConfigError> {
        let config: PipelineDocument = read_yaml(config_filepath)?;
        let params: ParamsDocument = read_yaml(params_filepath)?;
        let schema: SchemaDocument = read_yaml(schema_filepath)?;

        validate_params(&params.training_arguments)?;
        if config.data_transformation.max_length == 0 {
            return Err(invalid("data_transformation.max_length", "must be positive"));
        }

        create_directories(&[&config.artifacts_root])?;

        Ok(Self {
            config,
            params,
            schema,
        })
    }

    /// Load the documents from their default locations.
    pub fn from_default_paths() -> Result<Self, ConfigError> {
        Self::new(
            Path::new(CONFIG_FILE_PATH),
            Path::new(PARAMS_FILE_PATH),
            Path::new(SCHEMA_FILE_PATH),
        )
    }

    pub fn artifacts_root(&self) -> &Path {
        &self.config.artifacts_root
    }

    pub fn data_ingestion_config(&self) -> Result<DataIngestionConfig, ConfigError> {
        let config = &self.config.data_ingestion;
        create_directories(&[&config.root_dir])?;

        Ok(DataIngestionConfig {
            root_dir: config.root_dir.clone(),
            registry_url: config.registry_url.clone(),
            dataset_name: config.dataset_name.clone(),
            subset_name: config.subset_name.clone(),
            local_data_file: config.local_data_file.clone(),
            slices: config.slices,
        })
    }

    pub fn data_validation_config(&self) -> Result<DataValidationConfig, ConfigError> {
        let config = &self.config.data_validation;
        // Columns live in the schema document, not the pipeline document.
        let schema = self.schema.columns.clone();

        create_directories(&[&config.root_dir])?;

        Ok(DataValidationConfig {
            root_dir: config.root_dir.clone(),
            report_file: config.report_file.clone(),
            data_dir: self.config.data_ingestion.root_dir.clone(),
            required_files: config.required_files.clone(),
            all_schema: schema,
        })
    }

    pub fn data_transformation_config(&self) -> Result<DataTransformationConfig, ConfigError> {
        let config = &self.config.data_transformation;
        create_directories(&[&config.root_dir])?;

        Ok(DataTransformationConfig {
            root_dir: config.root_dir.clone(),
            data_path: config.data_path.clone(),
            tokenizer_dir: config.tokenizer_dir.clone(),
            max_length: config.max_length,
        })
    }

    pub fn model_trainer_config(&self) -> Result<ModelTrainerConfig, ConfigError> {
        let config = &self.config.model_trainer;
        let params = &self.params.training_arguments;

        create_directories(&[&config.root_dir])?;

        Ok(ModelTrainerConfig {
            root_dir: config.root_dir.clone(),
            data_path: config.data_path.clone(),
            model_ckpt: config.model_ckpt.clone(),
            labels_path: self.config.data_ingestion.root_dir.join(LABELS_FILE_NAME),
            num_train_epochs: params.epochs,
            per_device_train_batch_size: params.batch_size,
            weight_decay: params.weight_decay,
            learning_rate: params.learning_rate,
            logging_steps: params.logging_steps,
            seed: params.seed,
        })
    }

    pub fn model_evaluation_config(&self) -> Result<ModelEvaluationConfig, ConfigError> {
        let config = &self.config.model_evaluation;
        let params = &self.params.training_arguments;

        create_directories(&[&config.root_dir, &config.tracking_dir])?;

        Ok(ModelEvaluationConfig {
            root_dir: config.root_dir.clone(),
            data_path: config.data_path.clone(),
            model_path: config.model_path.clone(),
            tokenizer_path: config.model_path.clone(),
            metric_file_name: config.metric_file_name.clone(),
            eval_batch_size: params.batch_size,
            tracking_dir: config.tracking_dir.clone(),
            experiment_name: config.experiment_name.clone(),
        })
    }

    pub fn prediction_config(&self) -> PredictionConfig {
        PredictionConfig {
            model_path: self.config.prediction.model_path.clone(),
        }
    }

    pub fn agent_config(&self) -> Result<AgentConfig, ConfigError> {
        let config = &self.config.agent;
        if config.max_steps < 2 {
            return Err(invalid(
                "agent.max_steps",
                "needs at least one tool turn and one answer turn",
            ));
        }
        Ok(AgentConfig {
            model_id: config.model_id.clone(),
            base_url: config.base_url.clone(),
            temperature: config.temperature,
            max_new_tokens: config.max_new_tokens,
            max_steps: config.max_steps,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.config.server.host.clone(),
            port: self.config.server.port,
        }
    }

    /// Resolve all five stage configs, creating every stage directory.
    pub fn resolve_all(&self) -> Result<PipelineConfig, ConfigError> {
        Ok(PipelineConfig {
            ingestion: self.data_ingestion_config()?,
            validation: self.data_validation_config()?,
            transformation: self.data_transformation_config()?,
            trainer: self.model_trainer_config()?,
            evaluation: self.model_evaluation_config()?,
        })
    }
}

/// Read and deserialize a YAML document.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "yaml file loaded");
    Ok(value)
}

/// Create every directory in `paths`, including parents.
pub fn create_directories(paths: &[&Path]) -> Result<(), ConfigError> {
    for path in paths {
        std::fs::create_dir_all(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "created directory");
    }
    Ok(())
}

fn validate_params(params: &TrainingArguments) -> Result<(), ConfigError> {
    if params.epochs == 0 {
        return Err(invalid("TrainingArguments.epochs", "must be positive"));
    }
    if params.batch_size == 0 {
        return Err(invalid("TrainingArguments.batch_size", "must be positive"));
    }
    if !(params.learning_rate.is_finite() && params.learning_rate > 0.0) {
        return Err(invalid("TrainingArguments.learning_rate", "must be a positive number"));
    }
    if !(params.weight_decay.is_finite() && params.weight_decay >= 0.0) {
        return Err(invalid("TrainingArguments.weight_decay", "must be non-negative"));
    }
    Ok(())
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
