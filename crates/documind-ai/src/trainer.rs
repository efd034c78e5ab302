//! Fine-tuning loop for the BERT sequence classifier.
//!
//! Every parameter trains, encoder included: seeded shuffling each epoch,
//! mini-batches of `batch_size`, cross-entropy loss, and AdamW on f32 master
//! weights. Biases and LayerNorm parameters are exempt from weight decay. On
//! an accelerator each step runs its forward and backward passes on an f16
//! view of the weights under dynamic loss scaling.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use candle_core::{D, DType, Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use documind_core::ModelTrainerConfig;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, warn};

use crate::bert::{self, BertConfig, BertForSequenceClassification};
use crate::checkpoint;
use crate::precision::{self, LossScaler};

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingArgs {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub weight_decay: f32,
    pub logging_steps: usize,
    pub seed: u64,
}

impl From<&ModelTrainerConfig> for TrainingArgs {
    fn from(config: &ModelTrainerConfig) -> Self {
        Self {
            epochs: config.num_train_epochs,
            batch_size: config.per_device_train_batch_size,
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            logging_steps: config.logging_steps,
            seed: config.seed,
        }
    }
}

/// Token ids and masks with their class ids.
#[derive(Debug, Clone, Default)]
pub struct LabelledSet {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: Vec<u32>,
}

impl LabelledSet {
    /// Pair encoded rows with labels, checking every label is a valid class id.
    pub fn new(
        input_ids: Vec<Vec<u32>>,
        attention_mask: Vec<Vec<u32>>,
        labels: &[i64],
        num_labels: usize,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            input_ids.len() == labels.len() && attention_mask.len() == labels.len(),
            "{} id rows and {} mask rows but {} labels",
            input_ids.len(),
            attention_mask.len(),
            labels.len()
        );
        let labels = labels
            .iter()
            .map(|&l| {
                anyhow::ensure!(
                    l >= 0 && (l as usize) < num_labels,
                    "label {l} outside 0..{num_labels}"
                );
                Ok(l as u32)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            input_ids,
            attention_mask,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn batch(&self, rows: &[usize], device: &Device) -> candle_core::Result<(Tensor, Tensor, Tensor)> {
        let ids: Vec<Vec<u32>> = rows.iter().map(|&i| self.input_ids[i].clone()).collect();
        let mask: Vec<Vec<u32>> = rows.iter().map(|&i| self.attention_mask[i].clone()).collect();
        let targets: Vec<u32> = rows.iter().map(|&i| self.labels[i]).collect();
        let (ids, mask) = bert::batch_tensors(&ids, &mask, device)?;
        Ok((ids, mask, Tensor::from_vec(targets, rows.len(), device)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    pub epoch: usize,
    pub train_loss: f32,
    pub eval_loss: Option<f32>,
    pub eval_accuracy: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainReport {
    pub global_steps: u64,
    pub skipped_steps: u64,
    pub epochs: Vec<EpochReport>,
}

/// A sequence classifier under training. Holds the f32 master weights.
pub struct FineTuner {
    varmap: VarMap,
    config: BertConfig,
    num_labels: usize,
    device: Device,
    compute_dtype: DType,
}

impl FineTuner {
    /// Start from the checkpoint in `dir`. The classification head, absent
    /// from a base checkpoint, is initialized from `seed`.
    pub fn from_pretrained(dir: &Path, num_labels: usize, seed: u64) -> anyhow::Result<Self> {
        let config = checkpoint::load_config(dir)?;
        let device = bert::default_device()?;
        let weights = checkpoint::load_weights(dir, &device)?;
        info!(path = %dir.display(), device = ?device, "loaded pretrained checkpoint");
        Self::from_weights(config, &weights, num_labels, seed, device)
    }

    pub fn from_weights(
        config: BertConfig,
        weights: &HashMap<String, Tensor>,
        num_labels: usize,
        seed: u64,
        device: Device,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        anyhow::ensure!(num_labels > 0, "a classifier needs at least one label");
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        BertForSequenceClassification::load(vb, &config, num_labels)
            .context("building classifier parameters")?;
        checkpoint::init_from_pretrained(&varmap, weights, config.initializer_range, seed)?;

        let compute_dtype = precision::compute_dtype(&device);
        if compute_dtype == DType::F32 {
            info!("no accelerator, training in f32");
        }
        Ok(Self {
            varmap,
            config,
            num_labels,
            device,
            compute_dtype,
        })
    }

    pub fn config(&self) -> &BertConfig {
        &self.config
    }

    pub fn compute_dtype(&self) -> DType {
        self.compute_dtype
    }

    /// A copy of one master weight.
    pub fn parameter(&self, name: &str) -> anyhow::Result<Tensor> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
        let var = data
            .get(name)
            .with_context(|| format!("no parameter named {name}"))?;
        Ok(var.as_tensor().copy()?)
    }

    /// Every weight, cast to `dtype`, keyed by parameter name.
    pub fn weights(&self, dtype: DType) -> anyhow::Result<HashMap<String, Tensor>> {
        checkpoint::snapshot(&self.varmap, dtype)
    }

    /// Train on `train`, reporting loss and accuracy on `eval` after each
    /// epoch.
    pub fn train(
        &mut self,
        train: &LabelledSet,
        eval: Option<&LabelledSet>,
        args: &TrainingArgs,
    ) -> anyhow::Result<TrainReport> {
        anyhow::ensure!(args.batch_size > 0, "batch_size must be positive");
        anyhow::ensure!(!train.is_empty(), "training split is empty");

        let (decay, no_decay) = self.parameter_groups()?;
        let vars: Vec<Var> = decay.iter().chain(&no_decay).cloned().collect();
        let lr = f64::from(args.learning_rate);
        let mut decay_opt = AdamW::new(
            decay,
            ParamsAdamW {
                lr,
                weight_decay: f64::from(args.weight_decay),
                ..Default::default()
            },
        )?;
        let mut no_decay_opt = AdamW::new(
            no_decay,
            ParamsAdamW {
                lr,
                weight_decay: 0.0,
                ..Default::default()
            },
        )?;

        let mut scaler = LossScaler::new(self.compute_dtype != DType::F32);
        let mut rng = StdRng::seed_from_u64(args.seed);
        let mut report = TrainReport::default();
        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut window_loss = 0.0f32;
        let mut window_steps = 0usize;

        info!(
            examples = train.len(),
            epochs = args.epochs,
            batch_size = args.batch_size,
            learning_rate = args.learning_rate,
            parameters = vars.len(),
            compute_dtype = ?self.compute_dtype,
            "training started"
        );

        for epoch in 1..=args.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0f32;
            let mut epoch_batches = 0usize;

            for batch in order.chunks(args.batch_size) {
                let (ids, mask, targets) = train.batch(batch, &self.device)?;
                let model = self.compute_model()?;
                let logits = model.forward(&ids, &mask, true)?.to_dtype(DType::F32)?;
                let loss = candle_nn::loss::cross_entropy(&logits, &targets)?;
                let loss_value = loss.to_scalar::<f32>()?;

                let mut grads = scaler.scale_loss(&loss)?.backward()?;
                let finite = scaler.unscale(&mut grads, &vars)? && loss_value.is_finite();
                scaler.update(finite);
                if !finite {
                    report.skipped_steps += 1;
                    warn!(epoch, loss_scale = scaler.scale(), "non-finite gradients, step skipped");
                    continue;
                }
                decay_opt.step(&grads)?;
                no_decay_opt.step(&grads)?;

                report.global_steps += 1;
                epoch_loss += loss_value;
                epoch_batches += 1;
                window_loss += loss_value;
                window_steps += 1;

                if args.logging_steps > 0 && report.global_steps % args.logging_steps as u64 == 0 {
                    info!(
                        step = report.global_steps,
                        epoch,
                        loss = window_loss / window_steps as f32,
                        "training loss"
                    );
                    window_loss = 0.0;
                    window_steps = 0;
                }
            }

            let train_loss = if epoch_batches > 0 {
                epoch_loss / epoch_batches as f32
            } else {
                f32::NAN
            };
            let (eval_loss, eval_accuracy) = match eval.filter(|e| !e.is_empty()) {
                Some(set) => {
                    let (loss, acc) = self.evaluate(set, args.batch_size)?;
                    info!(epoch, eval_loss = loss, eval_accuracy = acc, "epoch evaluation");
                    (Some(loss), Some(acc))
                }
                None => (None, None),
            };
            info!(epoch, train_loss, "epoch complete");
            report.epochs.push(EpochReport {
                epoch,
                train_loss,
                eval_loss,
                eval_accuracy,
            });
        }

        info!(
            steps = report.global_steps,
            skipped = report.skipped_steps,
            "training finished"
        );
        Ok(report)
    }

    /// The model over compute-dtype views of the master weights.
    fn compute_model(&self) -> anyhow::Result<BertForSequenceClassification> {
        let weights = precision::compute_weights(&self.varmap, self.compute_dtype)?;
        let vb = VarBuilder::from_tensors(weights, self.compute_dtype, &self.device);
        Ok(BertForSequenceClassification::load(vb, &self.config, self.num_labels)?)
    }

    /// Mean loss and accuracy over `set`, no dropout, on the master weights.
    fn evaluate(&self, set: &LabelledSet, batch_size: usize) -> anyhow::Result<(f32, f64)> {
        let vb = VarBuilder::from_varmap(&self.varmap, DType::F32, &self.device);
        let model = BertForSequenceClassification::load(vb, &self.config, self.num_labels)?;
        let rows: Vec<usize> = (0..set.len()).collect();
        let mut loss = 0.0f32;
        let mut correct = 0usize;
        for batch in rows.chunks(batch_size) {
            let (ids, mask, targets) = set.batch(batch, &self.device)?;
            let logits = model.forward(&ids, &mask, false)?.detach();
            let batch_loss = candle_nn::loss::cross_entropy(&logits, &targets)?.to_scalar::<f32>()?;
            loss += batch_loss * batch.len() as f32;
            let predicted: Vec<u32> = logits.argmax(D::Minus1)?.to_vec1()?;
            correct += predicted
                .iter()
                .zip(batch)
                .filter(|&(&p, &i)| p == set.labels[i])
                .count();
        }
        Ok((loss / set.len() as f32, correct as f64 / set.len() as f64))
    }

    /// `(decayed, exempt)` parameters, each in name order.
    fn parameter_groups(&self) -> anyhow::Result<(Vec<Var>, Vec<Var>)> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| anyhow::anyhow!("parameter map lock poisoned"))?;
        let mut names: Vec<&String> = data.keys().collect();
        names.sort();
        let (exempt, decayed): (Vec<&String>, Vec<&String>) =
            names.into_iter().partition(|name| exempt_from_decay(name));
        Ok((
            decayed.into_iter().map(|n| data[n].clone()).collect(),
            exempt.into_iter().map(|n| data[n].clone()).collect(),
        ))
    }
}

fn exempt_from_decay(name: &str) -> bool {
    name.ends_with(".bias") || name.contains("LayerNorm")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toy_base_weights, toy_bert_config, toy_tokenizer, write_toy_checkpoint};

    const QUERY: &str = "bert.encoder.layer.0.attention.self.query.weight";

    fn args(epochs: usize) -> TrainingArgs {
        TrainingArgs {
            epochs,
            batch_size: 2,
            learning_rate: 1e-3,
            weight_decay: 0.01,
            logging_steps: 1,
            seed: 42,
        }
    }

    /// Notices clauses against governing-law clauses.
    fn clauses() -> LabelledSet {
        let texts = [
            "notices in writing",
            "notices of termination",
            "notice of breach",
            "the laws of delaware",
            "governed by the laws of new york",
            "governing law",
        ];
        let enc = toy_tokenizer(8).encode_batch(&texts).unwrap();
        LabelledSet::new(
            enc.iter().map(|e| e.input_ids.clone()).collect(),
            enc.iter().map(|e| e.attention_mask.clone()).collect(),
            &[0, 0, 0, 1, 1, 1],
            2,
        )
        .unwrap()
    }

    fn tuner(seed: u64) -> FineTuner {
        let base = toy_base_weights(3).unwrap();
        FineTuner::from_weights(toy_bert_config(), &base, 2, seed, Device::Cpu).unwrap()
    }

    fn values(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1().unwrap()
    }

    #[test]
    fn fine_tuning_updates_encoder_weights() {
        let tmp = tempfile::tempdir().unwrap();
        write_toy_checkpoint(tmp.path()).unwrap();
        let mut tuner = FineTuner::from_pretrained(tmp.path(), 2, 42).unwrap();
        let query = tuner.parameter(QUERY).unwrap();
        let words = tuner.parameter("bert.embeddings.word_embeddings.weight").unwrap();
        let norm = tuner.parameter("bert.embeddings.LayerNorm.weight").unwrap();

        let data = clauses();
        let report = tuner.train(&data, None, &args(3)).unwrap();
        assert_eq!(report.global_steps, 9);
        assert_eq!(report.skipped_steps, 0);

        for (name, before) in [
            (QUERY, query),
            ("bert.embeddings.word_embeddings.weight", words),
            ("bert.embeddings.LayerNorm.weight", norm),
        ] {
            let after = tuner.parameter(name).unwrap();
            assert_ne!(values(&before), values(&after), "{name} did not train");
        }
    }

    #[test]
    fn loss_falls_on_separable_clauses() {
        let data = clauses();
        let mut tuner = tuner(42);
        let report = tuner.train(&data, Some(&data), &args(25)).unwrap();
        assert_eq!(report.epochs.len(), 25);
        assert_eq!(report.global_steps, 75);
        let first = &report.epochs[0];
        let last = report.epochs.last().unwrap();
        assert!(last.train_loss < first.train_loss);
        assert!(last.eval_loss.unwrap() < first.eval_loss.unwrap());
        assert!(last.eval_accuracy.is_some());
    }

    #[test]
    fn training_is_reproducible_for_a_seed() {
        let data = clauses();
        let mut a = tuner(1);
        let mut b = tuner(1);
        a.train(&data, None, &args(2)).unwrap();
        b.train(&data, None, &args(2)).unwrap();
        for name in ["classifier.weight", QUERY] {
            let (a, b) = (values(&a.parameter(name).unwrap()), values(&b.parameter(name).unwrap()));
            for (x, y) in a.iter().zip(&b) {
                assert!((x - y).abs() < 1e-6, "{name} diverged");
            }
        }
    }

    #[test]
    fn weights_export_in_half_precision() {
        let tuner = tuner(1);
        let weights = tuner.weights(DType::F16).unwrap();
        assert_eq!(weights[QUERY].dtype(), DType::F16);
        assert_eq!(weights["classifier.weight"].dims(), &[2, 16]);
    }

    #[test]
    fn decay_groups_exempt_biases_and_layer_norm() {
        assert!(exempt_from_decay("classifier.bias"));
        assert!(exempt_from_decay("bert.embeddings.LayerNorm.weight"));
        assert!(!exempt_from_decay(QUERY));
        let (decay, no_decay) = tuner(1).parameter_groups().unwrap();
        assert!(!decay.is_empty() && !no_decay.is_empty());
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        assert!(LabelledSet::new(vec![vec![1]], vec![vec![1]], &[3], 2).is_err());
        assert!(LabelledSet::new(vec![vec![1]], vec![vec![1]], &[-1], 2).is_err());
        assert!(LabelledSet::new(vec![vec![1]], vec![], &[0], 2).is_err());
    }

    #[test]
    fn empty_training_split_errors() {
        let empty = LabelledSet::default();
        assert!(tuner(0).train(&empty, None, &args(1)).is_err());
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        assert!(tuner(0).parameter("bert.decoder.weight").is_err());
    }
}
