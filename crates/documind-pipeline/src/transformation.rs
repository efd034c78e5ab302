//! Stage 3: tokenize every partition to fixed-length ids and save the encoded
//! dataset as one directory.

use anyhow::Context;
use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Int64Type};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use documind_ai::FixedLengthTokenizer;
use documind_core::schema::{LABEL_COLUMN, TEXT_COLUMN};
use documind_core::{DataTransformationConfig, Split};
use documind_store::EncodedDataset;
use documind_store::encoded::encode_batch;
use documind_store::partition::read_partition;
use tracing::{debug, info};

use crate::stage::{Stage, StageKind};

/// Rows tokenized per call into the tokenizer.
const TOKENIZE_BATCH_SIZE: usize = 1000;

pub struct DataTransformation {
    config: DataTransformationConfig,
}

impl DataTransformation {
    pub fn new(config: DataTransformationConfig) -> Self {
        Self { config }
    }

    pub fn convert(&self) -> anyhow::Result<()> {
        let tokenizer =
            FixedLengthTokenizer::from_dir(&self.config.tokenizer_dir, self.config.max_length)
                .with_context(|| {
                    format!("loading tokenizer from {}", self.config.tokenizer_dir.display())
                })?;

        let mut dataset = EncodedDataset::new(
            self.config.max_length,
            self.config.tokenizer_dir.display().to_string(),
        );
        for split in Split::ALL {
            let path = self.config.data_dir().join(split.csv_file());
            let batch = read_partition(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let encoded = self.encode_partition(&tokenizer, &batch)?;
            info!(split = %split, rows = encoded.num_rows(), "split tokenized");
            dataset.insert(split, encoded)?;
        }

        let output = self.config.output_dir();
        dataset
            .save(&output)
            .with_context(|| format!("saving encoded dataset to {}", output.display()))?;
        Ok(())
    }

    fn encode_partition(
        &self,
        tokenizer: &FixedLengthTokenizer,
        batch: &RecordBatch,
    ) -> anyhow::Result<RecordBatch> {
        let (texts, labels) = text_and_labels(batch)?;

        let mut input_ids = Vec::with_capacity(texts.len());
        let mut attention_mask = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(TOKENIZE_BATCH_SIZE).enumerate() {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            for encoding in tokenizer.encode_batch(&refs)? {
                input_ids.push(encoding.input_ids);
                attention_mask.push(encoding.attention_mask);
            }
            debug!(chunk = i, rows = chunk.len(), "tokenized chunk");
        }

        Ok(encode_batch(
            &texts,
            &labels,
            &input_ids,
            &attention_mask,
            self.config.max_length,
        )?)
    }
}

/// The `text` and `label` columns of an ingested partition. CSV type
/// inference may read either as another type, so both are cast.
fn text_and_labels(batch: &RecordBatch) -> anyhow::Result<(Vec<String>, Vec<i64>)> {
    let text = batch
        .column_by_name(TEXT_COLUMN)
        .with_context(|| format!("partition has no `{TEXT_COLUMN}` column"))?;
    let label = batch
        .column_by_name(LABEL_COLUMN)
        .with_context(|| format!("partition has no `{LABEL_COLUMN}` column"))?;

    let text = cast(text, &DataType::Utf8)?;
    let texts = text
        .as_string::<i32>()
        .iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect();

    let label = cast(label, &DataType::Int64)?;
    anyhow::ensure!(label.null_count() == 0, "partition has rows without a label");
    let labels = label.as_primitive::<Int64Type>().values().to_vec();

    Ok((texts, labels))
}

#[async_trait]
impl Stage for DataTransformation {
    fn name(&self) -> &'static str {
        StageKind::Transformation.stage_name()
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.convert()
    }
}
