use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Audit record for one completed plan step or applied refactoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub operation_type: String,
    pub description: String,
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl OperationRecord {
    pub fn new(operation_type: &str, description: &str, files_modified: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation_type: operation_type.to_string(),
            description: description.to_string(),
            files_modified,
            metadata: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Append-only ledger under `<project>/.grok/operations/`, one JSON file per
/// record. Read back for undo-style inspection by the UI collaborator.
pub struct OperationHistory {
    dir: PathBuf,
}

impl OperationHistory {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: grok_config::state_dir(project_root).join("operations"),
        }
    }

    pub fn record(&self, record: &OperationRecord) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).context("failed to create operations directory")?;
        let path = self.dir.join(format!(
            "{}-{}.json",
            record.timestamp.format("%Y%m%dT%H%M%S%.3f"),
            &record.id[..8.min(record.id.len())]
        ));
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json).context("failed to write operation record")?;
        Ok(path)
    }

    pub fn list(&self) -> Vec<OperationRecord> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut records: Vec<OperationRecord> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| {
                let content = std::fs::read_to_string(e.path()).ok()?;
                serde_json::from_str(&content).ok()
            })
            .collect();
        records.sort_by_key(|r| r.timestamp);
        records
    }
}
