//! The encoded dataset: one Arrow IPC file per split plus a `dataset_dict.json`
//! descriptor, saved and loaded as a single directory.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, FixedSizeListArray, Int8Array, Int32Array, Int64Array, StringArray,
};
use arrow::compute::concat_batches;
use arrow::datatypes::{DataType, Field};
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow::record_batch::RecordBatch;
use documind_core::Split;
use documind_core::schema::{
    ATTENTION_MASK_COLUMN, INPUT_IDS_COLUMN, LABEL_COLUMN, TEXT_COLUMN, encoded_schema,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::StoreError;
use crate::json::{load_json, save_json};

pub const DATASET_DICT_FILE: &str = "dataset_dict.json";

/// Descriptor stored beside the split files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDict {
    pub splits: Vec<Split>,
    pub max_length: usize,
    /// Where the tokenizer that produced the ids was loaded from.
    pub tokenizer: String,
}

#[derive(Debug, Clone)]
pub struct EncodedDataset {
    max_length: usize,
    tokenizer: String,
    splits: BTreeMap<Split, RecordBatch>,
}

impl EncodedDataset {
    pub fn new(max_length: usize, tokenizer: impl Into<String>) -> Self {
        Self {
            max_length,
            tokenizer: tokenizer.into(),
            splits: BTreeMap::new(),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn tokenizer(&self) -> &str {
        &self.tokenizer
    }

    /// Add a split. The batch must have the encoded schema for this width.
    pub fn insert(&mut self, split: Split, batch: RecordBatch) -> Result<(), StoreError> {
        let expected = encoded_schema(self.max_length);
        if batch.schema().fields() != expected.fields() {
            return Err(StoreError::Other(format!(
                "split `{split}` does not match the encoded schema (max_length {})",
                self.max_length
            )));
        }
        self.splits.insert(split, batch);
        Ok(())
    }

    pub fn split(&self, split: Split) -> Result<&RecordBatch, StoreError> {
        self.splits
            .get(&split)
            .ok_or_else(|| StoreError::MissingSplit(split.to_string()))
    }

    pub fn splits(&self) -> impl Iterator<Item = (&Split, &RecordBatch)> {
        self.splits.iter()
    }

    pub fn info(&self) -> DatasetDict {
        DatasetDict {
            splits: self.splits.keys().copied().collect(),
            max_length: self.max_length,
            tokenizer: self.tokenizer.clone(),
        }
    }

    /// Save every split to `dir`, replacing any previous dataset there.
    ///
    /// Files are written to a sibling staging directory first and moved into
    /// place once all of them are complete.
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let staging = staging_dir(dir);
        if staging.exists() {
            std::fs::remove_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;
        }
        std::fs::create_dir_all(&staging).map_err(|e| StoreError::io(&staging, e))?;

        let schema = encoded_schema(self.max_length);
        for (split, batch) in &self.splits {
            let path = staging.join(split.ipc_file());
            let file = File::create(&path).map_err(|e| StoreError::io(&path, e))?;
            let mut writer = FileWriter::try_new(file, &schema)?;
            writer.write(batch)?;
            writer.finish()?;
            info!(split = %split, rows = batch.num_rows(), "encoded split written");
        }
        save_json(&staging.join(DATASET_DICT_FILE), &self.info())?;

        if dir.exists() {
            std::fs::remove_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        std::fs::rename(&staging, dir).map_err(|e| StoreError::io(dir, e))?;
        info!(path = %dir.display(), splits = self.splits.len(), "saved encoded dataset");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let info: DatasetDict = load_json(&dir.join(DATASET_DICT_FILE))?;
        let mut dataset = Self::new(info.max_length, info.tokenizer);
        for split in info.splits {
            let path = dir.join(split.ipc_file());
            if !path.exists() {
                return Err(StoreError::FileNotFound(path));
            }
            let file = File::open(&path).map_err(|e| StoreError::io(&path, e))?;
            let reader = FileReader::try_new(file, None)?;
            let schema = reader.schema();
            let batches = reader.collect::<Result<Vec<_>, _>>()?;
            dataset.insert(split, concat_batches(&schema, &batches)?)?;
        }
        info!(path = %dir.display(), max_length = dataset.max_length, "loaded encoded dataset");
        Ok(dataset)
    }
}

fn staging_dir(dir: &Path) -> PathBuf {
    let mut name = dir
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    dir.with_file_name(name)
}

// ── Batch conversion ──

/// Row-major view of an encoded split.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedExamples {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: Vec<i64>,
}

impl EncodedExamples {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Extract ids, masks, and labels from an encoded batch.
    pub fn from_batch(batch: &RecordBatch) -> Result<Self, StoreError> {
        let labels = column::<Int64Array>(batch, LABEL_COLUMN)?;
        let ids = column::<FixedSizeListArray>(batch, INPUT_IDS_COLUMN)?;
        let mask = column::<FixedSizeListArray>(batch, ATTENTION_MASK_COLUMN)?;

        let ids_values = ids
            .values()
            .as_any()
            .downcast_ref::<Int32Array>()
            .ok_or_else(|| StoreError::Other("input_ids items are not i32".into()))?;
        let mask_values = mask
            .values()
            .as_any()
            .downcast_ref::<Int8Array>()
            .ok_or_else(|| StoreError::Other("attention_mask items are not i8".into()))?;

        let width = ids.value_length() as usize;
        let input_ids = ids_values
            .values()
            .chunks(width.max(1))
            .map(|row| row.iter().map(|&v| v as u32).collect())
            .collect();
        let attention_mask = mask_values
            .values()
            .chunks(width.max(1))
            .map(|row| row.iter().map(|&v| v as u32).collect())
            .collect();

        Ok(Self {
            input_ids,
            attention_mask,
            labels: labels.values().to_vec(),
        })
    }
}

/// Build an encoded batch. Every id and mask row must be exactly
/// `max_length` wide.
pub fn encode_batch(
    texts: &[String],
    labels: &[i64],
    input_ids: &[Vec<u32>],
    attention_mask: &[Vec<u32>],
    max_length: usize,
) -> Result<RecordBatch, StoreError> {
    let rows = texts.len();
    if labels.len() != rows || input_ids.len() != rows || attention_mask.len() != rows {
        return Err(StoreError::Other(format!(
            "column length mismatch: {rows} texts, {} labels, {} id rows, {} mask rows",
            labels.len(),
            input_ids.len(),
            attention_mask.len()
        )));
    }
    if let Some(bad) = input_ids
        .iter()
        .chain(attention_mask)
        .find(|row| row.len() != max_length)
    {
        return Err(StoreError::Other(format!(
            "encoded row has {} tokens, expected {max_length}",
            bad.len()
        )));
    }

    let width = max_length as i32;
    let ids: Vec<i32> = input_ids.iter().flatten().map(|&v| v as i32).collect();
    let mask: Vec<i8> = attention_mask.iter().flatten().map(|&v| v as i8).collect();

    let ids = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Int32, false)),
        width,
        Arc::new(Int32Array::from(ids)),
        None,
    )?;
    let mask = FixedSizeListArray::try_new(
        Arc::new(Field::new("item", DataType::Int8, false)),
        width,
        Arc::new(Int8Array::from(mask)),
        None,
    )?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(texts)),
        Arc::new(Int64Array::from(labels.to_vec())),
        Arc::new(ids),
        Arc::new(mask),
    ];
    Ok(RecordBatch::try_new(
        Arc::new(encoded_schema(max_length)),
        columns,
    )?)
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T, StoreError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| StoreError::MissingColumn(name.to_string()))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| StoreError::Other(format!("column `{name}` has an unexpected type")))
}

/// The raw text column of an encoded batch.
pub fn texts(batch: &RecordBatch) -> Result<Vec<String>, StoreError> {
    let text = column::<StringArray>(batch, TEXT_COLUMN)?;
    Ok(text.iter().map(|v| v.unwrap_or_default().to_string()).collect())
}
