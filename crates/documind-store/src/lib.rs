//! Storage layer: CSV partitions, the Arrow IPC encoded dataset, JSON artifacts,
//! and a file-backed experiment tracker.

mod error;
pub use error::StoreError;

pub mod encoded;
pub mod json;
pub mod partition;
pub mod tracker;

pub use encoded::{DatasetDict, EncodedDataset, EncodedExamples};
pub use tracker::{ExperimentTracker, RunHandle};
