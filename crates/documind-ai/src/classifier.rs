//! Sequence classifier assembled from a saved artifact: tokenizer, BERT
//! encoder with its classification head, and label map.

use std::path::Path;

use candle_core::{D, DType, Device};
use candle_nn::VarBuilder;
use tracing::info;

use crate::artifact;
use crate::bert::{self, BertForSequenceClassification};
use crate::labels::LabelMap;
use crate::predict::Prediction;
use crate::tokenizer::FixedLengthTokenizer;

pub struct SequenceClassifier {
    model: BertForSequenceClassification,
    tokenizer: FixedLengthTokenizer,
    labels: LabelMap,
    device: Device,
}

impl SequenceClassifier {
    pub fn new(
        model: BertForSequenceClassification,
        tokenizer: FixedLengthTokenizer,
        labels: LabelMap,
        device: Device,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            labels.len() == model.num_labels(),
            "{} label names for a model with {} classes",
            labels.len(),
            model.num_labels()
        );
        Ok(Self {
            model,
            tokenizer,
            labels,
            device,
        })
    }

    /// Load an artifact directory onto the default device.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        Self::load_on(dir, bert::default_device()?)
    }

    pub fn load_on(dir: &Path, device: Device) -> anyhow::Result<Self> {
        let config = artifact::load_config(dir)?;
        anyhow::ensure!(
            config.max_length <= config.encoder.max_position_embeddings,
            "max_length {} exceeds the encoder's {} positions",
            config.max_length,
            config.encoder.max_position_embeddings
        );
        let tokenizer = FixedLengthTokenizer::from_dir(dir, config.max_length)?;
        let labels = config.labels()?;
        let weights = artifact::load_weights(dir, &device)?;
        // f16 on disk, f32 in memory.
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = BertForSequenceClassification::load(vb, &config.encoder, config.num_labels)?;
        let classifier = Self::new(model, tokenizer, labels, device)?;
        info!(
            path = %dir.display(),
            num_labels = classifier.labels.len(),
            max_length = config.max_length,
            "loaded sequence classifier"
        );
        Ok(classifier)
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn max_length(&self) -> usize {
        self.tokenizer.max_length()
    }

    pub fn predict(&self, text: &str) -> anyhow::Result<Prediction> {
        self.predict_batch(&[text])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no prediction returned"))
    }

    pub fn predict_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Prediction>> {
        let encodings = self.tokenizer.encode_batch(texts)?;
        let (ids, mask): (Vec<_>, Vec<_>) = encodings
            .into_iter()
            .map(|e| (e.input_ids, e.attention_mask))
            .unzip();
        self.predict_encoded(&ids, &mask)
    }

    /// Classify already-tokenized rows.
    pub fn predict_encoded(
        &self,
        input_ids: &[Vec<u32>],
        attention_mask: &[Vec<u32>],
    ) -> anyhow::Result<Vec<Prediction>> {
        if input_ids.is_empty() {
            return Ok(vec![]);
        }
        let (ids, mask) = bert::batch_tensors(input_ids, attention_mask, &self.device)?;
        let logits = self.model.forward(&ids, &mask, false)?;
        let probs: Vec<Vec<f32>> = candle_nn::ops::softmax(&logits, D::Minus1)?.to_vec2()?;
        probs
            .iter()
            .map(|row| {
                let (label_id, confidence) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, p)| if p > best.1 { (i, p) } else { best });
                let label = self
                    .labels
                    .name(label_id)
                    .ok_or_else(|| anyhow::anyhow!("class id {label_id} has no label name"))?
                    .to_string();
                Ok(Prediction {
                    label_id,
                    label,
                    confidence,
                })
            })
            .collect()
    }
}
