//! Toy tokenizer, checkpoint and artifact for tests that must run without
//! model downloads.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::artifact::{self, ModelConfig};
use crate::bert::{BertConfig, BertModel, HiddenAct};
use crate::checkpoint;
use crate::labels::LabelMap;
use crate::tokenizer::FixedLengthTokenizer;

/// Word-level vocabulary covering the clauses used across the test suites.
pub const TOY_VOCAB: &[&str] = &[
    "[PAD]", "[UNK]", "this", "agreement", "is", "governed", "shall", "be", "by", "the", "laws",
    "of", "new", "york", "delaware", "state", "notices", "notice", "in", "writing", "delivered",
    "hand", "parties", "agree", "to", "arbitration", "city", "today", "terminate", "termination",
    "either", "party", "may", "upon", "days", "confidential", "information", "not", "disclose",
    "payment", "due", "within", "invoice", "a", "and", "clause",
];

/// `tokenizer.json` contents for [`TOY_VOCAB`]: lowercase, whitespace split,
/// word-level lookup, `[PAD]` = 0.
pub fn toy_tokenizer_json() -> String {
    let vocab: serde_json::Map<String, serde_json::Value> = TOY_VOCAB
        .iter()
        .enumerate()
        .map(|(i, w)| (w.to_string(), serde_json::Value::from(i)))
        .collect();
    let special = |id: usize, content: &str| {
        serde_json::json!({
            "id": id,
            "content": content,
            "single_word": false,
            "lstrip": false,
            "rstrip": false,
            "normalized": false,
            "special": true
        })
    };
    serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [special(0, "[PAD]"), special(1, "[UNK]")],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "[UNK]"}
    })
    .to_string()
}

pub fn toy_tokenizer(max_length: usize) -> FixedLengthTokenizer {
    FixedLengthTokenizer::from_bytes(toy_tokenizer_json().as_bytes(), max_length)
        .expect("toy tokenizer.json is valid")
}

/// Write the toy `tokenizer.json` into `dir`.
pub fn write_toy_tokenizer(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(crate::tokenizer::TOKENIZER_FILE), toy_tokenizer_json())
}

/// A two-layer encoder over [`TOY_VOCAB`], small enough to fine-tune in
/// a unit test. Dropout is off so training is deterministic.
pub fn toy_bert_config() -> BertConfig {
    BertConfig {
        vocab_size: TOY_VOCAB.len(),
        hidden_size: 16,
        num_hidden_layers: 2,
        num_attention_heads: 2,
        intermediate_size: 32,
        hidden_act: HiddenAct::Gelu,
        hidden_dropout_prob: 0.0,
        attention_probs_dropout_prob: 0.0,
        max_position_embeddings: 64,
        type_vocab_size: 2,
        initializer_range: 0.02,
        layer_norm_eps: 1e-12,
        classifier_dropout: None,
    }
}

/// Seeded encoder weights for [`toy_bert_config`], named as in a base
/// checkpoint: `bert.*` only, no classifier.
pub fn toy_base_weights(seed: u64) -> anyhow::Result<HashMap<String, Tensor>> {
    let config = toy_bert_config();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BertModel::load(vb.pp("bert"), &config)?;
    checkpoint::init_from_pretrained(&varmap, &HashMap::new(), config.initializer_range, seed)?;
    checkpoint::snapshot(&varmap, DType::F32)
}

/// Write a base checkpoint (`config.json`, `model.safetensors`,
/// `tokenizer.json`) into `dir`.
pub fn write_toy_checkpoint(dir: &Path) -> anyhow::Result<()> {
    write_toy_tokenizer(dir)?;
    std::fs::write(
        dir.join(checkpoint::CONFIG_FILE),
        serde_json::to_string_pretty(&toy_bert_config())?,
    )?;
    candle_core::safetensors::save(&toy_base_weights(7)?, dir.join(checkpoint::WEIGHTS_FILE))?;
    Ok(())
}

/// Write a model artifact whose classifier ignores the text: zero weights
/// plus `bias`, so every prediction is `argmax(bias)`.
pub fn write_toy_artifact(
    dir: &Path,
    labels: &[&str],
    bias: &[f32],
    max_length: usize,
) -> anyhow::Result<()> {
    anyhow::ensure!(labels.len() == bias.len(), "one bias per label");
    let config = toy_bert_config();
    let mut weights = toy_base_weights(7)?;
    weights.insert(
        "classifier.weight".into(),
        Tensor::zeros((labels.len(), config.hidden_size), DType::F32, &Device::Cpu)?,
    );
    weights.insert(
        "classifier.bias".into(),
        Tensor::from_slice(bias, bias.len(), &Device::Cpu)?,
    );
    let weights = weights
        .into_iter()
        .map(|(name, t)| -> anyhow::Result<(String, Tensor)> {
            Ok((name, t.to_dtype(artifact::SAVED_DTYPE)?))
        })
        .collect::<anyhow::Result<HashMap<_, _>>>()?;
    let names: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
    let model_config = ModelConfig::new(config, max_length, &LabelMap::from_names(&names));
    artifact::save(dir, &model_config, &weights, &toy_tokenizer(max_length))
}
