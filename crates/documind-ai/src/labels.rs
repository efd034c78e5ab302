//! Class id ↔ label name mapping, persisted inside the model artifact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Bidirectional label map. Ids are dense: `0..len()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    id2label: BTreeMap<usize, String>,
    label2id: BTreeMap<String, usize>,
}

impl LabelMap {
    /// Build from the registry's class-name list; index = class id.
    pub fn from_names(names: &[String]) -> Self {
        let id2label: BTreeMap<usize, String> = names.iter().cloned().enumerate().collect();
        let label2id = id2label.iter().map(|(id, name)| (name.clone(), *id)).collect();
        Self { id2label, label2id }
    }

    /// Synthetic names `LABEL_0..LABEL_{n-1}` for datasets without class names.
    pub fn numbered(num_labels: usize) -> Self {
        let names: Vec<String> = (0..num_labels).map(|i| format!("LABEL_{i}")).collect();
        Self::from_names(&names)
    }

    /// Rebuild from a persisted `id2label` table, checking ids are dense.
    pub fn from_id2label(id2label: BTreeMap<usize, String>) -> anyhow::Result<Self> {
        for (expected, id) in id2label.keys().enumerate() {
            anyhow::ensure!(*id == expected, "label ids are not dense: missing id {expected}");
        }
        let label2id = id2label.iter().map(|(id, name)| (name.clone(), *id)).collect();
        Ok(Self { id2label, label2id })
    }

    pub fn len(&self) -> usize {
        self.id2label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2label.is_empty()
    }

    pub fn name(&self, id: usize) -> Option<&str> {
        self.id2label.get(&id).map(String::as_str)
    }

    pub fn id(&self, name: &str) -> Option<usize> {
        self.label2id.get(name).copied()
    }

    pub fn id2label(&self) -> &BTreeMap<usize, String> {
        &self.id2label
    }

    pub fn label2id(&self) -> &BTreeMap<String, usize> {
        &self.label2id
    }
}
