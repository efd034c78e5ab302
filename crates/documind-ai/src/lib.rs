//! Classification model layer: fixed-length tokenization, a BERT sequence
//! classifier fine-tuned end to end with AdamW in mixed precision,
//! evaluation metrics, and the Prediction Tool.

pub mod artifact;
pub mod bert;
pub mod checkpoint;
pub mod classifier;
pub mod labels;
pub mod metrics;
pub mod precision;
pub mod predict;
pub mod tokenizer;
pub mod trainer;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use bert::{BertConfig, BertForSequenceClassification};
pub use classifier::SequenceClassifier;
pub use labels::LabelMap;
pub use metrics::compute_scores;
pub use predict::{Classify, PredictError, Prediction, PredictionTool};
pub use tokenizer::{EncodedText, FixedLengthTokenizer};
pub use trainer::{EpochReport, FineTuner, LabelledSet, TrainReport, TrainingArgs};
