//! Stage 2: check every ingested column is declared in the schema document.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use documind_core::DataValidationConfig;
use documind_store::json::save_json;
use documind_store::partition::read_header;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::stage::{Stage, StageKind};

/// File written beside the status file with one entry per offending column.
pub const NOTES_FILE_NAME: &str = "notes.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNote {
    pub file: String,
    pub column: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: bool,
    pub notes: Vec<ColumnNote>,
}

impl ValidationReport {
    /// Exact contents of the status file.
    pub fn status_line(&self) -> String {
        format!("Validation status: {}", self.status)
    }
}

pub struct DataValidation {
    config: DataValidationConfig,
}

impl DataValidation {
    pub fn new(config: DataValidationConfig) -> Self {
        Self { config }
    }

    /// Compare the header of each required file against the schema. An
    /// undeclared column makes the status `false`; extra schema keys are fine.
    pub fn validate_all_columns(&self) -> anyhow::Result<ValidationReport> {
        let declared = &self.config.all_schema;
        info!(
            expected = ?declared.keys().collect::<Vec<_>>(),
            files = self.config.required_files.len(),
            "validating columns"
        );

        let mut notes = Vec::new();
        for file in &self.config.required_files {
            let path = self.config.data_dir.join(file);
            let columns =
                read_header(&path).with_context(|| format!("reading header of {}", path.display()))?;
            for column in columns {
                if declared.contains_key(&column) {
                    info!(file = %file, column = %column, "column validated");
                } else {
                    error!(file = %file, column = %column, "column is not defined in schema.yaml");
                    notes.push(ColumnNote {
                        file: file.clone(),
                        message: format!("column '{column}' is not defined in schema.yaml"),
                        column,
                    });
                }
            }
        }

        let report = ValidationReport {
            status: notes.is_empty(),
            notes,
        };
        self.write_report(&report)?;

        if report.status {
            info!("data validation successful");
        } else {
            error!(offending = report.notes.len(), "data validation failed");
        }
        Ok(report)
    }

    fn write_report(&self, report: &ValidationReport) -> anyhow::Result<()> {
        let status_path = &self.config.report_file;
        if let Some(parent) = status_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(status_path, report.status_line())
            .with_context(|| format!("writing {}", status_path.display()))?;
        save_json(&notes_path(status_path), &report.notes)?;
        Ok(())
    }
}

fn notes_path(status_path: &Path) -> std::path::PathBuf {
    status_path.with_file_name(NOTES_FILE_NAME)
}

#[async_trait]
impl Stage for DataValidation {
    fn name(&self) -> &'static str {
        StageKind::Validation.stage_name()
    }

    async fn run(&mut self) -> anyhow::Result<()> {
        self.validate_all_columns().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn config(dir: &Path, schema: &[&str]) -> DataValidationConfig {
        DataValidationConfig {
            root_dir: dir.join("data_validation"),
            report_file: dir.join("data_validation").join("status.txt"),
            data_dir: dir.to_path_buf(),
            required_files: vec!["train.csv".into(), "test.csv".into()],
            all_schema: schema
                .iter()
                .map(|c| (c.to_string(), "str".to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn write_csvs(dir: &Path, header: &str) {
        for file in ["train.csv", "test.csv"] {
            std::fs::write(dir.join(file), format!("{header}\nsome clause,1\n")).unwrap();
        }
    }

    #[test]
    fn declared_columns_pass() {
        let tmp = tempfile::tempdir().unwrap();
        write_csvs(tmp.path(), "text,label");
        let cfg = config(tmp.path(), &["text", "label", "source"]);
        let report = DataValidation::new(cfg.clone()).validate_all_columns().unwrap();

        assert!(report.status);
        assert!(report.notes.is_empty());
        assert_eq!(
            std::fs::read_to_string(&cfg.report_file).unwrap(),
            "Validation status: true"
        );
    }

    #[test]
    fn undeclared_column_fails_with_note() {
        let tmp = tempfile::tempdir().unwrap();
        write_csvs(tmp.path(), "text,category");
        let cfg = config(tmp.path(), &["text", "label"]);
        let report = DataValidation::new(cfg.clone()).validate_all_columns().unwrap();

        assert!(!report.status);
        assert_eq!(report.notes.len(), 2);
        assert!(report.notes.iter().all(|n| n.column == "category"));
        assert_eq!(
            std::fs::read_to_string(&cfg.report_file).unwrap(),
            "Validation status: false"
        );
        let notes: Vec<ColumnNote> = serde_json::from_str(
            &std::fs::read_to_string(cfg.root_dir.join(NOTES_FILE_NAME)).unwrap(),
        )
        .unwrap();
        assert_eq!(notes, report.notes);
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("train.csv"), "text,label\na,1\n").unwrap();
        let result = DataValidation::new(config(tmp.path(), &["text", "label"])).validate_all_columns();
        assert!(result.is_err());
    }
}
