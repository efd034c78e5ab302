//! Response payloads of the `/rows` endpoint and their conversion to Arrow.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RowsPage {
    pub features: Vec<Feature>,
    pub rows: Vec<RowEntry>,
    pub num_rows_total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Feature {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FeatureType,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct FeatureType {
    #[serde(rename = "_type")]
    pub type_name: String,
    #[serde(default)]
    pub dtype: Option<String>,
    /// Class names, present on `ClassLabel` features.
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RowEntry {
    pub row: serde_json::Map<String, Value>,
}

impl FeatureType {
    fn arrow_type(&self) -> DataType {
        if self.type_name == "ClassLabel" {
            return DataType::Int64;
        }
        match self.dtype.as_deref() {
            Some("string" | "large_string") => DataType::Utf8,
            Some(d) if d.starts_with("int") || d.starts_with("uint") => DataType::Int64,
            Some(d) if d.starts_with("float") => DataType::Float64,
            Some("bool") => DataType::Boolean,
            // Nested and media features are kept as their JSON text.
            _ => DataType::Utf8,
        }
    }
}

enum ColumnBuilder {
    Text(StringBuilder),
    Int(Int64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int64 => Self::Int(Int64Builder::new()),
            DataType::Float64 => Self::Float(Float64Builder::new()),
            DataType::Boolean => Self::Bool(BooleanBuilder::new()),
            _ => Self::Text(StringBuilder::new()),
        }
    }

    fn append(&mut self, value: Option<&Value>) {
        let value = value.filter(|v| !v.is_null());
        match self {
            Self::Text(b) => match value {
                Some(Value::String(s)) => b.append_value(s),
                Some(other) => b.append_value(other.to_string()),
                None => b.append_null(),
            },
            Self::Int(b) => b.append_option(value.and_then(Value::as_i64)),
            Self::Float(b) => b.append_option(value.and_then(Value::as_f64)),
            Self::Bool(b) => b.append_option(value.and_then(Value::as_bool)),
        }
    }

    fn finish(self) -> ArrayRef {
        match self {
            Self::Text(mut b) => Arc::new(b.finish()),
            Self::Int(mut b) => Arc::new(b.finish()),
            Self::Float(mut b) => Arc::new(b.finish()),
            Self::Bool(mut b) => Arc::new(b.finish()),
        }
    }
}

/// Build one record batch from the features and the accumulated rows.
/// Columns follow the feature order.
pub(crate) fn rows_to_batch(features: &[Feature], rows: &[RowEntry]) -> Result<RecordBatch, ArrowError> {
    let fields: Vec<Field> = features
        .iter()
        .map(|f| Field::new(&f.name, f.kind.arrow_type(), true))
        .collect();
    let mut builders: Vec<ColumnBuilder> = fields
        .iter()
        .map(|f| ColumnBuilder::for_type(f.data_type()))
        .collect();

    for entry in rows {
        for (feature, builder) in features.iter().zip(builders.iter_mut()) {
            builder.append(entry.row.get(&feature.name));
        }
    }

    let columns: Vec<ArrayRef> = builders.into_iter().map(ColumnBuilder::finish).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

/// Class names of the first `ClassLabel` feature.
pub(crate) fn class_names(features: &[Feature]) -> Vec<String> {
    features
        .iter()
        .find_map(|f| f.kind.names.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Int64Array, StringArray};

    const PAGE: &str = r#"{
        "features": [
            {"feature_idx": 0, "name": "text", "type": {"dtype": "string", "_type": "Value"}},
            {"feature_idx": 1, "name": "label", "type": {"names": ["Adjustments", "Governing Laws"], "_type": "ClassLabel"}}
        ],
        "rows": [
            {"row_idx": 0, "row": {"text": "This Agreement shall be governed by Delaware law.", "label": 1}, "truncated_cells": []},
            {"row_idx": 1, "row": {"text": "Adjustments to price.", "label": 0}, "truncated_cells": []},
            {"row_idx": 2, "row": {"text": null, "label": 0}, "truncated_cells": []}
        ],
        "num_rows_total": 3,
        "num_rows_per_page": 100,
        "partial": false
    }"#;

    #[test]
    fn page_converts_to_typed_batch() {
        let page: RowsPage = serde_json::from_str(PAGE).unwrap();
        let batch = rows_to_batch(&page.features, &page.rows).unwrap();
        assert_eq!(batch.num_rows(), 3);
        let schema = batch.schema();
        assert_eq!(schema.field(0).data_type(), &DataType::Utf8);
        assert_eq!(schema.field(1).data_type(), &DataType::Int64);

        let text = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert!(text.value(0).contains("Delaware"));
        assert!(text.is_null(2));
        let label = batch.column(1).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(label.value(0), 1);
    }

    #[test]
    fn class_names_come_from_class_label_feature() {
        let page: RowsPage = serde_json::from_str(PAGE).unwrap();
        assert_eq!(class_names(&page.features), vec!["Adjustments", "Governing Laws"]);
    }

    #[test]
    fn unknown_feature_types_keep_json_text() {
        let features: Vec<Feature> = serde_json::from_str(
            r#"[{"name": "meta", "type": {"_type": "Sequence"}}]"#,
        )
        .unwrap();
        let rows: Vec<RowEntry> =
            serde_json::from_str(r#"[{"row": {"meta": [1, 2]}}]"#).unwrap();
        let batch = rows_to_batch(&features, &rows).unwrap();
        let meta = batch.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(meta.value(0), "[1,2]");
    }
}
