//! The fine-tuned model artifact directory.
//!
//! ```text
//! bert-classifier/
//!   model.safetensors   encoder and classifier weights, f16
//!   tokenizer.json
//!   config.json         ModelConfig: encoder config plus the label map
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::bert::{ARCHITECTURE, BertConfig};
use crate::checkpoint;
use crate::labels::LabelMap;
use crate::tokenizer::FixedLengthTokenizer;

pub const CONFIG_FILE: &str = checkpoint::CONFIG_FILE;
pub const WEIGHTS_FILE: &str = checkpoint::WEIGHTS_FILE;
/// Weights are stored in half precision.
pub const SAVED_DTYPE: DType = DType::F16;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub architectures: Vec<String>,
    pub num_labels: usize,
    pub max_length: usize,
    pub torch_dtype: String,
    pub id2label: BTreeMap<usize, String>,
    pub label2id: BTreeMap<String, usize>,
    pub encoder: BertConfig,
}

impl ModelConfig {
    pub fn new(encoder: BertConfig, max_length: usize, labels: &LabelMap) -> Self {
        Self {
            architectures: vec![ARCHITECTURE.to_string()],
            num_labels: labels.len(),
            max_length,
            torch_dtype: "float16".into(),
            id2label: labels.id2label().clone(),
            label2id: labels.label2id().clone(),
            encoder,
        }
    }

    pub fn labels(&self) -> anyhow::Result<LabelMap> {
        let labels = LabelMap::from_id2label(self.id2label.clone())?;
        anyhow::ensure!(
            labels.len() == self.num_labels,
            "config.json declares {} labels but maps {}",
            self.num_labels,
            labels.len()
        );
        Ok(labels)
    }
}

/// Save the model artifact. `weights` must hold a classifier sized for the
/// config's labels.
pub fn save(
    dir: &Path,
    config: &ModelConfig,
    weights: &HashMap<String, Tensor>,
    tokenizer: &FixedLengthTokenizer,
) -> anyhow::Result<()> {
    let head = weights
        .get("classifier.weight")
        .context("weights have no classifier.weight")?;
    anyhow::ensure!(
        head.dims() == [config.num_labels, config.encoder.hidden_size],
        "classifier shape {:?} does not match {} labels over {} features",
        head.dims(),
        config.num_labels,
        config.encoder.hidden_size
    );
    anyhow::ensure!(
        tokenizer.max_length() == config.max_length,
        "tokenizer pads to {} tokens, config says {}",
        tokenizer.max_length(),
        config.max_length
    );
    std::fs::create_dir_all(dir)?;

    let weights_path = dir.join(WEIGHTS_FILE);
    candle_core::safetensors::save(weights, &weights_path)
        .with_context(|| format!("writing {}", weights_path.display()))?;
    tokenizer.save(dir)?;
    std::fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(config)?)?;

    info!(
        path = %dir.display(),
        num_labels = config.num_labels,
        tensors = weights.len(),
        "saved model artifact"
    );
    Ok(())
}

pub fn load_config(dir: &Path) -> anyhow::Result<ModelConfig> {
    let path = dir.join(CONFIG_FILE);
    anyhow::ensure!(path.exists(), "config.json not found in {dir:?}");
    let body = std::fs::read_to_string(&path)?;
    let config: ModelConfig =
        serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))?;
    config.encoder.validate()?;
    Ok(config)
}

pub fn load_weights(dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    checkpoint::load_weights(dir, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_base_weights, toy_bert_config, toy_tokenizer};

    fn weights(num_labels: usize) -> HashMap<String, Tensor> {
        let mut weights = toy_base_weights(1).unwrap();
        weights.insert(
            "classifier.weight".into(),
            Tensor::zeros((num_labels, 16), DType::F32, &Device::Cpu).unwrap(),
        );
        weights.insert(
            "classifier.bias".into(),
            Tensor::zeros(num_labels, DType::F32, &Device::Cpu).unwrap(),
        );
        weights
    }

    #[test]
    fn artifact_persists_label_map_and_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("bert-classifier");
        let labels = LabelMap::from_names(&["Notices".into(), "Governing Laws".into()]);
        let config = ModelConfig::new(toy_bert_config(), 16, &labels);

        save(&dir, &config, &weights(2), &toy_tokenizer(16)).unwrap();

        let loaded = load_config(&dir).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.labels().unwrap().name(1), Some("Governing Laws"));
        assert!(dir.join("tokenizer.json").exists());
        let tensors = load_weights(&dir, &Device::Cpu).unwrap();
        assert_eq!(tensors["classifier.weight"].dims(), &[2, 16]);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join(CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(raw["id2label"]["0"], "Notices");
        assert_eq!(raw["label2id"]["Governing Laws"], 1);
        assert_eq!(raw["architectures"][0], ARCHITECTURE);
        assert_eq!(raw["encoder"]["hidden_size"], 16);
    }

    #[test]
    fn saved_dtype_is_kept_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let half: HashMap<String, Tensor> = weights(2)
            .into_iter()
            .map(|(k, t)| (k, t.to_dtype(SAVED_DTYPE).unwrap()))
            .collect();
        let config = ModelConfig::new(toy_bert_config(), 8, &LabelMap::numbered(2));
        save(tmp.path(), &config, &half, &toy_tokenizer(8)).unwrap();
        let tensors = load_weights(tmp.path(), &Device::Cpu).unwrap();
        assert!(tensors.values().all(|t| t.dtype() == DType::F16));
    }

    #[test]
    fn mismatched_classifier_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ModelConfig::new(toy_bert_config(), 16, &LabelMap::numbered(3));
        assert!(save(tmp.path(), &config, &weights(2), &toy_tokenizer(16)).is_err());
        assert!(!tmp.path().join(WEIGHTS_FILE).exists());
    }

    #[test]
    fn missing_classifier_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ModelConfig::new(toy_bert_config(), 16, &LabelMap::numbered(2));
        let base = toy_base_weights(1).unwrap();
        let err = save(tmp.path(), &config, &base, &toy_tokenizer(16)).unwrap_err();
        assert!(err.to_string().contains("classifier.weight"));
    }

    #[test]
    fn tokenizer_length_must_match_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = ModelConfig::new(toy_bert_config(), 16, &LabelMap::numbered(2));
        assert!(save(tmp.path(), &config, &weights(2), &toy_tokenizer(8)).is_err());
    }
}
