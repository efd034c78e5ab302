//! BERT encoder with a sequence-classification head, built from candle
//! tensor ops so every parameter is trainable.
//!
//! Parameter names follow the Hugging Face `BertForSequenceClassification`
//! layout (`bert.embeddings.*`, `bert.encoder.layer.<i>.*`, `bert.pooler.*`,
//! `classifier.*`), so a pretrained `model.safetensors` maps onto the model
//! name for name.

use candle_core::{D, DType, Device, IndexOp, Module, Tensor, bail};
use candle_nn::{Embedding, Linear, VarBuilder, embedding, linear};
use serde::{Deserialize, Serialize};

pub type Result<T> = candle_core::Result<T>;

/// Architecture name recorded in saved configs.
pub const ARCHITECTURE: &str = "BertForSequenceClassification";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenAct {
    #[default]
    Gelu,
    GeluNew,
    Relu,
}

impl HiddenAct {
    fn apply(self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Gelu => xs.gelu_erf(),
            Self::GeluNew => xs.gelu(),
            Self::Relu => xs.relu(),
        }
    }
}

/// Encoder hyper-parameters, read from a checkpoint's `config.json`.
/// Keys this model does not use are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BertConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    #[serde(default)]
    pub hidden_act: HiddenAct,
    #[serde(default = "default_dropout")]
    pub hidden_dropout_prob: f32,
    #[serde(default = "default_dropout")]
    pub attention_probs_dropout_prob: f32,
    pub max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    pub type_vocab_size: usize,
    #[serde(default = "default_initializer_range")]
    pub initializer_range: f64,
    #[serde(default = "default_layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_dropout: Option<f32>,
}

fn default_dropout() -> f32 {
    0.1
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_initializer_range() -> f64 {
    0.02
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl BertConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.num_attention_heads > 0 && self.hidden_size % self.num_attention_heads == 0,
            "hidden_size {} is not divisible by {} attention heads",
            self.hidden_size,
            self.num_attention_heads
        );
        anyhow::ensure!(self.num_hidden_layers > 0, "config has no hidden layers");
        anyhow::ensure!(self.vocab_size > 0, "config has an empty vocabulary");
        Ok(())
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

/// Run on the first CUDA device when built with `cuda`, else the CPU.
pub fn default_device() -> Result<Device> {
    Device::cuda_if_available(0)
}

/// Stack fixed-length rows into `(batch, length)` u32 tensors.
pub fn batch_tensors(
    input_ids: &[Vec<u32>],
    attention_mask: &[Vec<u32>],
    device: &Device,
) -> Result<(Tensor, Tensor)> {
    let rows = input_ids.len();
    let width = input_ids.first().map_or(0, Vec::len);
    let ids: Vec<u32> = input_ids.iter().flatten().copied().collect();
    let mask: Vec<u32> = attention_mask.iter().flatten().copied().collect();
    if rows == 0 || attention_mask.len() != rows {
        bail!("batch has {rows} id rows and {} mask rows", attention_mask.len());
    }
    if ids.len() != rows * width || mask.len() != rows * width {
        bail!("rows in a batch must all be {width} tokens long");
    }
    Ok((
        Tensor::from_vec(ids, (rows, width), device)?,
        Tensor::from_vec(mask, (rows, width), device)?,
    ))
}

fn dropout(xs: Tensor, p: f32, train: bool) -> Result<Tensor> {
    if train && p > 0.0 {
        candle_nn::ops::dropout(&xs, p)
    } else {
        Ok(xs)
    }
}

// ── Layers ──

/// Layer norm evaluated in f32 whatever the compute dtype.
struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", candle_nn::Init::Const(1.0))?,
            bias: vb.get_with_hints(size, "bias", candle_nn::Init::Const(0.0))?,
            eps,
        })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let dtype = xs.dtype();
        let xs = xs.to_dtype(DType::F32)?;
        let centered = xs.broadcast_sub(&xs.mean_keepdim(D::Minus1)?)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(variance + self.eps)?.sqrt()?)?;
        normed
            .broadcast_mul(&self.weight.to_dtype(DType::F32)?)?
            .broadcast_add(&self.bias.to_dtype(DType::F32)?)?
            .to_dtype(dtype)
    }
}

struct Embeddings {
    word: Embedding,
    position: Embedding,
    token_type: Embedding,
    norm: LayerNorm,
    max_positions: usize,
    dropout: f32,
}

impl Embeddings {
    fn load(vb: VarBuilder, cfg: &BertConfig) -> Result<Self> {
        let h = cfg.hidden_size;
        Ok(Self {
            word: embedding(cfg.vocab_size, h, vb.pp("word_embeddings"))?,
            position: embedding(cfg.max_position_embeddings, h, vb.pp("position_embeddings"))?,
            token_type: embedding(cfg.type_vocab_size, h, vb.pp("token_type_embeddings"))?,
            norm: LayerNorm::load(h, cfg.layer_norm_eps, vb.pp("LayerNorm"))?,
            max_positions: cfg.max_position_embeddings,
            dropout: cfg.hidden_dropout_prob,
        })
    }

    fn forward(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len > self.max_positions {
            bail!(
                "sequence of {seq_len} tokens exceeds {} position embeddings",
                self.max_positions
            );
        }
        let positions = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
        // Single-segment input: every token type is 0.
        let token_types = input_ids.zeros_like()?;
        let xs = self
            .word
            .forward(input_ids)?
            .broadcast_add(&self.position.forward(&positions)?)?
            .add(&self.token_type.forward(&token_types)?)?;
        dropout(self.norm.forward(&xs)?, self.dropout, train)
    }
}

struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    num_heads: usize,
    head_dim: usize,
    attention_dropout: f32,
    dropout: f32,
}

impl Attention {
    fn load(vb: VarBuilder, cfg: &BertConfig) -> Result<Self> {
        let h = cfg.hidden_size;
        let this = vb.pp("self");
        let out = vb.pp("output");
        Ok(Self {
            query: linear(h, h, this.pp("query"))?,
            key: linear(h, h, this.pp("key"))?,
            value: linear(h, h, this.pp("value"))?,
            output: linear(h, h, out.pp("dense"))?,
            norm: LayerNorm::load(h, cfg.layer_norm_eps, out.pp("LayerNorm"))?,
            num_heads: cfg.num_attention_heads,
            head_dim: cfg.head_dim(),
            attention_dropout: cfg.attention_probs_dropout_prob,
            dropout: cfg.hidden_dropout_prob,
        })
    }

    /// `mask` is the additive `(batch, 1, 1, seq)` f32 mask.
    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let (b, s, h) = xs.dims3()?;
        let split = |t: Tensor| -> Result<Tensor> {
            t.reshape((b, s, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(self.query.forward(xs)?)?;
        let k = split(self.key.forward(xs)?)?;
        let v = split(self.value.forward(xs)?)?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? / (self.head_dim as f64).sqrt())?;
        let scores = scores.to_dtype(DType::F32)?.broadcast_add(mask)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?.to_dtype(xs.dtype())?;
        let probs = dropout(probs, self.attention_dropout, train)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, s, h))?;
        let out = dropout(self.output.forward(&context)?, self.dropout, train)?;
        self.norm.forward(&(out + xs)?)
    }
}

struct Layer {
    attention: Attention,
    intermediate: Linear,
    output: Linear,
    norm: LayerNorm,
    act: HiddenAct,
    dropout: f32,
}

impl Layer {
    fn load(vb: VarBuilder, cfg: &BertConfig) -> Result<Self> {
        let (h, i) = (cfg.hidden_size, cfg.intermediate_size);
        Ok(Self {
            attention: Attention::load(vb.pp("attention"), cfg)?,
            intermediate: linear(h, i, vb.pp("intermediate").pp("dense"))?,
            output: linear(i, h, vb.pp("output").pp("dense"))?,
            norm: LayerNorm::load(h, cfg.layer_norm_eps, vb.pp("output").pp("LayerNorm"))?,
            act: cfg.hidden_act,
            dropout: cfg.hidden_dropout_prob,
        })
    }

    fn forward(&self, xs: &Tensor, mask: &Tensor, train: bool) -> Result<Tensor> {
        let attended = self.attention.forward(xs, mask, train)?;
        let hidden = self.act.apply(&self.intermediate.forward(&attended)?)?;
        let out = dropout(self.output.forward(&hidden)?, self.dropout, train)?;
        self.norm.forward(&(out + attended)?)
    }
}

// ── Models ──

/// The bare encoder plus pooler. `forward` returns the pooled `[CLS]`
/// representation, `(batch, hidden)`.
pub struct BertModel {
    embeddings: Embeddings,
    layers: Vec<Layer>,
    pooler: Linear,
}

impl BertModel {
    pub fn load(vb: VarBuilder, cfg: &BertConfig) -> Result<Self> {
        let layers = (0..cfg.num_hidden_layers)
            .map(|i| Layer::load(vb.pp("encoder").pp("layer").pp(i), cfg))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            embeddings: Embeddings::load(vb.pp("embeddings"), cfg)?,
            layers,
            pooler: linear(cfg.hidden_size, cfg.hidden_size, vb.pp("pooler").pp("dense"))?,
        })
    }

    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let mask = extended_mask(attention_mask)?;
        let mut xs = self.embeddings.forward(input_ids, train)?;
        for layer in &self.layers {
            xs = layer.forward(&xs, &mask, train)?;
        }
        self.pooler.forward(&xs.i((.., 0))?)?.tanh()
    }
}

/// `1` (attend) becomes `0.0`, `0` (padding) becomes `-10000.0`.
fn extended_mask(attention_mask: &Tensor) -> Result<Tensor> {
    let (b, s) = attention_mask.dims2()?;
    attention_mask
        .to_dtype(DType::F32)?
        .affine(10_000.0, -10_000.0)?
        .reshape((b, 1, 1, s))
}

pub struct BertForSequenceClassification {
    bert: BertModel,
    classifier: Linear,
    dropout: f32,
    num_labels: usize,
}

impl BertForSequenceClassification {
    pub fn load(vb: VarBuilder, cfg: &BertConfig, num_labels: usize) -> Result<Self> {
        Ok(Self {
            bert: BertModel::load(vb.pp("bert"), cfg)?,
            classifier: linear(cfg.hidden_size, num_labels, vb.pp("classifier"))?,
            dropout: cfg.classifier_dropout.unwrap_or(cfg.hidden_dropout_prob),
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Logits, `(batch, num_labels)`, in the compute dtype.
    pub fn forward(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        let pooled = self.bert.forward(input_ids, attention_mask, train)?;
        self.classifier.forward(&dropout(pooled, self.dropout, train)?)
    }
}
