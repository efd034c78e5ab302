//! Pretrained checkpoints: a Hugging Face style directory holding
//! `config.json`, `model.safetensors` and `tokenizer.json`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::bert::BertConfig;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

pub fn load_config(dir: &Path) -> anyhow::Result<BertConfig> {
    let path = dir.join(CONFIG_FILE);
    let body = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: BertConfig =
        serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

pub fn load_weights(dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let path = dir.join(WEIGHTS_FILE);
    anyhow::ensure!(path.exists(), "{} not found", path.display());
    let weights = candle_core::safetensors::load(&path, device)
        .with_context(|| format!("reading {}", path.display()))?;
    debug!(path = %path.display(), tensors = weights.len(), "loaded weights");
    Ok(weights)
}

/// How [`init_from_pretrained`] filled a parameter map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitSummary {
    pub loaded: usize,
    pub initialized: usize,
}

/// Names a parameter may carry in a checkpoint. Encoder-only exports drop
/// the `bert.` prefix, and older ones call LayerNorm parameters
/// `gamma`/`beta`.
fn candidate_keys(name: &str) -> Vec<String> {
    let mut keys = vec![name.to_string()];
    if let Some(bare) = name.strip_prefix("bert.") {
        keys.push(bare.to_string());
    }
    let legacy: Vec<String> = keys
        .iter()
        .filter(|k| k.contains("LayerNorm."))
        .filter_map(|k| {
            k.strip_suffix(".weight")
                .map(|stem| format!("{stem}.gamma"))
                .or_else(|| k.strip_suffix(".bias").map(|stem| format!("{stem}.beta")))
        })
        .collect();
    keys.extend(legacy);
    keys
}

/// Copy pretrained tensors into every parameter of `varmap`. Parameters the
/// checkpoint lacks (the classification head, usually) get a seeded init:
/// uniform in `±initializer_range` for weights, zeros for biases, ones for
/// LayerNorm scales.
pub fn init_from_pretrained(
    varmap: &VarMap,
    pretrained: &HashMap<String, Tensor>,
    initializer_range: f64,
    seed: u64,
) -> anyhow::Result<InitSummary> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut summary = InitSummary {
        loaded: 0,
        initialized: 0,
    };
    for name in names {
        let var = &data[name];
        let source = candidate_keys(name)
            .into_iter()
            .find_map(|key| pretrained.get(&key));
        let value = match source {
            Some(tensor) => {
                anyhow::ensure!(
                    tensor.dims() == var.dims(),
                    "checkpoint tensor for {name} has shape {:?}, model expects {:?}",
                    tensor.dims(),
                    var.dims()
                );
                summary.loaded += 1;
                tensor.to_dtype(var.dtype())?.to_device(var.device())?
            }
            None => {
                debug!(name = %name, "parameter not in checkpoint, initializing");
                summary.initialized += 1;
                fresh_value(name, var, initializer_range, &mut rng)?
            }
        };
        var.set(&value).with_context(|| format!("setting {name}"))?;
    }
    info!(
        loaded = summary.loaded,
        initialized = summary.initialized,
        "parameters ready"
    );
    Ok(summary)
}

fn fresh_value(name: &str, var: &Var, range: f64, rng: &mut StdRng) -> anyhow::Result<Tensor> {
    let count = var.elem_count();
    let values: Vec<f32> = if name.contains("LayerNorm") && name.ends_with(".weight") {
        vec![1.0; count]
    } else if name.ends_with(".bias") {
        vec![0.0; count]
    } else {
        let range = range as f32;
        (0..count).map(|_| rng.gen_range(-range..=range)).collect()
    };
    Ok(Tensor::from_vec(values, var.dims(), var.device())?.to_dtype(var.dtype())?)
}

/// Deep copies of every parameter, cast to `dtype`.
pub fn snapshot(varmap: &VarMap, dtype: DType) -> anyhow::Result<HashMap<String, Tensor>> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
    data.iter()
        .map(|(name, var)| -> anyhow::Result<(String, Tensor)> {
            // A same-dtype cast shares storage with the live parameter.
            let tensor = var.as_tensor().to_dtype(dtype)?.copy()?;
            Ok((name.clone(), tensor))
        })
        .collect()
}
