//! Tabular dataset partitions persisted as CSV with a header row.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use documind_core::schema::TEXT_COLUMN;
use tracing::{debug, info};

use crate::StoreError;

/// Write one partition as CSV, header first. Creates parent directories.
pub fn write_partition(path: &Path, batch: &RecordBatch) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = WriterBuilder::new().with_header(true).build(file);
    writer.write(batch)?;
    info!(
        rows = batch.num_rows(),
        columns = batch.num_columns(),
        path = %path.display(),
        "wrote partition"
    );
    Ok(())
}

/// Read a whole partition into a single batch. The `text` column is always
/// Utf8; other column types are inferred from the data.
pub fn read_partition(path: &Path) -> Result<RecordBatch, StoreError> {
    if !path.exists() {
        return Err(StoreError::FileNotFound(path.to_path_buf()));
    }
    let mut file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let (inferred, records) = Format::default()
        .with_header(true)
        .infer_schema(BufReader::new(&mut file), None)?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| StoreError::io(path, e))?;

    let schema = Arc::new(pin_text_column(&inferred));
    let reader = ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)?;
    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;
    debug!(records, rows = batch.num_rows(), path = %path.display(), "read partition");
    Ok(batch)
}

/// `inferred` with the text column forced to Utf8.
fn pin_text_column(inferred: &Schema) -> Schema {
    let fields: Vec<Field> = inferred
        .fields()
        .iter()
        .map(|f| {
            if f.name() == TEXT_COLUMN {
                Field::new(TEXT_COLUMN, DataType::Utf8, true)
            } else {
                f.as_ref().clone()
            }
        })
        .collect();
    Schema::new(fields)
}

/// Column names from the header row of a partition.
pub fn read_header(path: &Path) -> Result<Vec<String>, StoreError> {
    if !path.exists() {
        return Err(StoreError::FileNotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| StoreError::io(path, e))?;
    let (schema, _) = Format::default()
        .with_header(true)
        .infer_schema(BufReader::new(file), Some(1))?;
    Ok(schema.fields().iter().map(|f| f.name().clone()).collect())
}

/// Persist the class-label name list; index = label id.
pub fn write_labels(path: &Path, names: &[String]) -> Result<(), StoreError> {
    crate::json::save_json(path, &names)?;
    info!(labels = names.len(), path = %path.display(), "wrote label names");
    Ok(())
}

pub fn read_labels(path: &Path) -> Result<Vec<String>, StoreError> {
    crate::json::load_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("text", DataType::Utf8, false),
            Field::new("label", DataType::Int64, false),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![
                    "This Agreement shall be governed by the laws of New York.",
                    "Notices shall be in writing, and delivered by hand.",
                    "The parties agree:\n\"as stated\" above.",
                ])),
                Arc::new(Int64Array::from(vec![42, 61, 7])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn partition_survives_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/train.csv");
        write_partition(&path, &sample_batch()).unwrap();

        let batch = read_partition(&path).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let schema = batch.schema();
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);

        let text = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(text.value(2), "The parties agree:\n\"as stated\" above.");
        let labels = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(labels.value(0), 42);
        assert_eq!(labels.len(), 3);
    }

    #[test]
    fn text_that_looks_numeric_stays_text() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("train.csv");
        std::fs::write(&path, "text,label\n00042,3\n2021,5\n1999,3\n").unwrap();

        let batch = read_partition(&path).unwrap();
        assert_eq!(batch.schema().field(0).data_type(), &DataType::Utf8);
        assert_eq!(batch.schema().field(1).data_type(), &DataType::Int64);
        let text = batch
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(text.value(0), "00042");
        assert_eq!(text.value(1), "2021");
    }

    #[test]
    fn writes_are_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.csv");
        let b = tmp.path().join("b.csv");
        write_partition(&a, &sample_batch()).unwrap();
        write_partition(&b, &sample_batch()).unwrap();
        assert_eq!(std::fs::read(&a).unwrap(), std::fs::read(&b).unwrap());
    }

    #[test]
    fn header_lists_columns_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("test.csv");
        write_partition(&path, &sample_batch()).unwrap();
        assert_eq!(read_header(&path).unwrap(), vec!["text", "label"]);
    }

    #[test]
    fn missing_partition_errors() {
        let result = read_header(Path::new("/nonexistent/train.csv"));
        assert!(matches!(result, Err(StoreError::FileNotFound(_))));
    }

    #[test]
    fn label_names_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("labels.json");
        let names = vec!["Adjustments".to_string(), "Governing Laws".to_string()];
        write_labels(&path, &names).unwrap();
        assert_eq!(read_labels(&path).unwrap(), names);
    }
}
