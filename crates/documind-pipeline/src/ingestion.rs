//! Stage 1: pull fixed-size slices of each partition from the dataset
//! registry and persist them as CSV, plus the class-label names.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use documind_core::config::LABELS_FILE_NAME;
use documind_core::{DataIngestionConfig, Split};
use documind_hub::{DatasetSource, HubClient};
use documind_store::partition::{write_labels, write_partition};
use tracing::{info, warn};

use crate::stage::{Stage, StageKind};

pub struct DataIngestion {
    config: DataIngestionConfig,
    source: Arc<dyn DatasetSource>,
}

impl DataIngestion {
    /// Ingest from the registry named in the config.
    pub fn new(config: DataIngestionConfig) -> Self {
        let client = HubClient::new(
            &config.registry_url,
            &config.dataset_name,
            &config.subset_name,
        );
        Self::with_source(config, Arc::new(client))
    }

    pub fn with_source(config: DataIngestionConfig, source: Arc<dyn DatasetSource>) -> Self {
        Self { config, source }
    }

    pub async fn download_data(&self) -> anyhow::Result<()> {
        info!(
            dataset = %self.config.dataset_name,
            subset = %self.config.subset_name,
            "downloading dataset slices"
        );

        let mut label_names: Vec<String> = Vec::new();
        for split in Split::ALL {
            let length = self.config.slices.for_split(split);
            let slice = self
                .source
                .fetch_slice(split, length)
                .await
                .with_context(|| format!("fetching {split} split"))?;

            if slice.batch.num_rows() < length {
                warn!(
                    split = %split,
                    requested = length,
                    available = slice.num_rows_total,
                    "split shorter than requested slice"
                );
            }
            if label_names.is_empty() {
                label_names = slice.label_names.clone();
            }

            let path = self.config.root_dir.join(split.csv_file());
            write_partition(&path, &slice.batch)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(split = %split, shape = ?(slice.batch.num_rows(), slice.batch.num_columns()), "split saved");
        }

        let labels_path = self.config.root_dir.join(LABELS_FILE_NAME);
        write_labels(&labels_path, &label_names)?;
        info!(path = %self.config.root_dir.display(), "data saved");
        Ok(())
    }
}

#[async_trait]
impl Stage for DataIngestion {
    fn name(&self) -> &'static str {
        StageKind::Ingestion.stage_name()
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.download_data().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{ArrayRef, Int64Array, StringArray};
    use arrow::record_batch::RecordBatch;
    use documind_core::SliceSizes;
    use documind_hub::{DatasetSlice, HubError};
    use documind_store::partition::{read_labels, read_partition};
    use std::path::Path;

    /// Serves `rows` rows per split: "clause 0", "clause 1", ...
    struct FakeRegistry {
        rows: usize,
    }

    #[async_trait]
    impl DatasetSource for FakeRegistry {
        async fn fetch_slice(&self, split: Split, length: usize) -> Result<DatasetSlice, HubError> {
            let n = length.min(self.rows);
            let texts: Vec<String> = (0..n).map(|i| format!("{split} clause, \"{i}\"")).collect();
            let labels: Vec<i64> = (0..n as i64).map(|i| i % 2).collect();
            let batch = RecordBatch::try_from_iter(vec![
                ("text", std::sync::Arc::new(StringArray::from(texts)) as ArrayRef),
                ("label", std::sync::Arc::new(Int64Array::from(labels)) as ArrayRef),
            ])?;
            Ok(DatasetSlice {
                split,
                batch,
                label_names: vec!["Notices".into(), "Governing Laws".into()],
                num_rows_total: self.rows,
            })
        }
    }

    fn config(root: &Path) -> DataIngestionConfig {
        DataIngestionConfig {
            root_dir: root.to_path_buf(),
            registry_url: "http://unused".into(),
            dataset_name: "coastalcph/lex_glue".into(),
            subset_name: "ledgar".into(),
            local_data_file: root.join("train.csv"),
            slices: SliceSizes {
                train: 6,
                test: 3,
                validation: 3,
            },
        }
    }

    #[tokio::test]
    async fn writes_all_partitions_and_labels() {
        let tmp = tempfile::tempdir().unwrap();
        let stage = DataIngestion::with_source(config(tmp.path()), Arc::new(FakeRegistry { rows: 10 }));
        stage.download_data().await.unwrap();

        assert_eq!(read_partition(&tmp.path().join("train.csv")).unwrap().num_rows(), 6);
        assert_eq!(read_partition(&tmp.path().join("test.csv")).unwrap().num_rows(), 3);
        assert_eq!(read_partition(&tmp.path().join("validation.csv")).unwrap().num_rows(), 3);
        assert_eq!(
            read_labels(&tmp.path().join("labels.json")).unwrap(),
            vec!["Notices", "Governing Laws"]
        );
    }

    #[tokio::test]
    async fn short_splits_are_clamped() {
        let tmp = tempfile::tempdir().unwrap();
        let stage = DataIngestion::with_source(config(tmp.path()), Arc::new(FakeRegistry { rows: 2 }));
        stage.download_data().await.unwrap();
        assert_eq!(read_partition(&tmp.path().join("train.csv")).unwrap().num_rows(), 2);
    }

    #[tokio::test]
    async fn ingestion_is_deterministic() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        for dir in [a.path(), b.path()] {
            DataIngestion::with_source(config(dir), Arc::new(FakeRegistry { rows: 10 }))
                .download_data()
                .await
                .unwrap();
        }
        for file in ["train.csv", "test.csv", "validation.csv", "labels.json"] {
            assert_eq!(
                std::fs::read(a.path().join(file)).unwrap(),
                std::fs::read(b.path().join(file)).unwrap(),
                "{file} differs"
            );
        }
    }
}
