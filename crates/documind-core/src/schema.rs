//! Dataset partitions and the Arrow schemas of the encoded dataset.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};

/// Column holding the clause text.
pub const TEXT_COLUMN: &str = "text";
/// Column holding the integer class id.
pub const LABEL_COLUMN: &str = "label";
/// Fixed-length token ids produced by the transformation stage.
pub const INPUT_IDS_COLUMN: &str = "input_ids";
/// Fixed-length attention mask produced by the transformation stage.
pub const ATTENTION_MASK_COLUMN: &str = "attention_mask";

/// One partition of the labelled dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Test,
    Validation,
}

impl Split {
    /// All partitions, in the order they are ingested and encoded.
    pub const ALL: [Split; 3] = [Split::Train, Split::Test, Split::Validation];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Test => "test",
            Self::Validation => "validation",
        }
    }

    /// File name of the ingested tabular partition (`train.csv`, ...).
    pub fn csv_file(&self) -> String {
        format!("{}.csv", self.as_str())
    }

    /// File name of the encoded partition (`train.arrow`, ...).
    pub fn ipc_file(&self) -> String {
        format!("{}.arrow", self.as_str())
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Self::Train),
            "test" => Ok(Self::Test),
            "validation" => Ok(Self::Validation),
            other => Err(format!("unknown split: {other}")),
        }
    }
}

/// Schema of an encoded partition: the raw `text`/`label` pair plus
/// `input_ids` and `attention_mask`, both exactly `max_length` wide.
pub fn encoded_schema(max_length: usize) -> Schema {
    let width = max_length as i32;
    Schema::new(vec![
        Field::new(TEXT_COLUMN, DataType::Utf8, false),
        Field::new(LABEL_COLUMN, DataType::Int64, false),
        Field::new(
            INPUT_IDS_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Int32, false)), width),
            false,
        ),
        Field::new(
            ATTENTION_MASK_COLUMN,
            DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Int8, false)), width),
            false,
        ),
    ])
}
