//! Stage 4: fine-tune the BERT sequence classifier, encoder included, and
//! save the model artifact.

use anyhow::Context;
use async_trait::async_trait;
use documind_ai::artifact::{self, ModelConfig};
use documind_ai::{FineTuner, FixedLengthTokenizer, LabelMap, LabelledSet, TrainReport, TrainingArgs};
use documind_core::{ModelTrainerConfig, Split};
use documind_store::partition::read_labels;
use documind_store::{EncodedDataset, EncodedExamples};
use tracing::{info, warn};

use crate::stage::{Stage, StageKind};

pub struct ModelTrainer {
    config: ModelTrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: ModelTrainerConfig) -> Self {
        Self { config }
    }

    pub fn train(&self) -> anyhow::Result<TrainReport> {
        let args = TrainingArgs::from(&self.config);
        let dataset = EncodedDataset::load(&self.config.data_path).with_context(|| {
            format!("loading encoded dataset from {}", self.config.data_path.display())
        })?;
        let train = EncodedExamples::from_batch(dataset.split(Split::Train)?)?;
        let eval = EncodedExamples::from_batch(dataset.split(Split::Test)?)?;
        let labels = self.label_map(&train)?;

        let train_set =
            LabelledSet::new(train.input_ids, train.attention_mask, &train.labels, labels.len())?;
        let eval_set =
            LabelledSet::new(eval.input_ids, eval.attention_mask, &eval.labels, labels.len())?;

        let ckpt = &self.config.model_ckpt;
        let mut tuner = FineTuner::from_pretrained(ckpt, labels.len(), args.seed)
            .with_context(|| format!("loading checkpoint from {}", ckpt.display()))?;
        anyhow::ensure!(
            dataset.max_length() <= tuner.config().max_position_embeddings,
            "dataset encoded to {} tokens but the encoder has {} positions",
            dataset.max_length(),
            tuner.config().max_position_embeddings
        );
        info!(
            train_rows = train_set.len(),
            eval_rows = eval_set.len(),
            num_labels = labels.len(),
            hidden_size = tuner.config().hidden_size,
            layers = tuner.config().num_hidden_layers,
            "fine-tuning sequence classifier"
        );
        let report = tuner.train(&train_set, Some(&eval_set), &args)?;

        let tokenizer = FixedLengthTokenizer::from_dir(ckpt, dataset.max_length())
            .with_context(|| format!("loading tokenizer from {}", ckpt.display()))?;
        let model_config = ModelConfig::new(tuner.config().clone(), dataset.max_length(), &labels);
        artifact::save(
            &self.config.artifact_dir(),
            &model_config,
            &tuner.weights(artifact::SAVED_DTYPE)?,
            &tokenizer,
        )?;
        Ok(report)
    }

    /// Label names from ingestion, or `LABEL_<i>` names covering every id in
    /// the training split when none were published.
    fn label_map(&self, train: &EncodedExamples) -> anyhow::Result<LabelMap> {
        let names = if self.config.labels_path.exists() {
            read_labels(&self.config.labels_path)?
        } else {
            Vec::new()
        };
        if !names.is_empty() {
            return Ok(LabelMap::from_names(&names));
        }
        let max = train.labels.iter().copied().max().unwrap_or(0);
        anyhow::ensure!(max >= 0, "training split has negative label ids");
        warn!(path = %self.config.labels_path.display(), "no label names found, using numbered labels");
        Ok(LabelMap::numbered(max as usize + 1))
    }
}

#[async_trait]
impl Stage for ModelTrainer {
    fn name(&self) -> &'static str {
        StageKind::Trainer.stage_name()
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.train().map(|_| ())
    }
}
