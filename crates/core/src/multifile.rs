use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::edit::{replace_in_content, ReplaceFailure};
use crate::outcome::SelfCorrectError;
use crate::pools::Pools;

/// One operation in a batched transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileOperation {
    Edit {
        file_path: String,
        old_str: String,
        new_str: String,
        #[serde(default)]
        replace_all: bool,
    },
    Create {
        file_path: String,
        content: String,
        #[serde(default)]
        overwrite: bool,
    },
    Delete {
        file_path: String,
    },
    Move {
        file_path: String,
        target_path: String,
    },
}

impl FileOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            FileOperation::Edit { .. } => "edit",
            FileOperation::Create { .. } => "create",
            FileOperation::Delete { .. } => "delete",
            FileOperation::Move { .. } => "move",
        }
    }

    pub fn file_path(&self) -> &str {
        match self {
            FileOperation::Edit { file_path, .. }
            | FileOperation::Create { file_path, .. }
            | FileOperation::Delete { file_path }
            | FileOperation::Move { file_path, .. } => file_path,
        }
    }

    fn touched_paths(&self) -> Vec<&str> {
        match self {
            FileOperation::Move {
                file_path,
                target_path,
            } => vec![file_path, target_path],
            other => vec![other.file_path()],
        }
    }
}

/// Pre-transaction content per path; `None` records that the path did not
/// exist so rollback can delete it.
pub type SnapshotMap = HashMap<PathBuf, Option<String>>;

#[derive(Debug)]
pub struct TransactionResult {
    pub success: bool,
    pub applied: Vec<String>,
    pub error: Option<SelfCorrectError>,
}

/// Applies a batched set of operations with per-file snapshot rollback.
/// Snapshots are read in parallel through the read pool; writes are strictly
/// sequential so a mid-transaction observer sees a consistent prefix.
pub struct MultiFileEditor {
    pools: Arc<Pools>,
}

impl MultiFileEditor {
    pub fn new(pools: Arc<Pools>) -> Self {
        Self { pools }
    }

    pub async fn apply(&self, operations: &[FileOperation], base: &Path) -> TransactionResult {
        let snapshots = self.snapshot(operations, base).await;

        let mut applied = Vec::new();
        for (i, op) in operations.iter().enumerate() {
            let _write = self.pools.write().await;
            match apply_one(op, base) {
                Ok(description) => applied.push(description),
                Err(e) => {
                    drop(_write);
                    self.rollback(&snapshots).await;
                    let error = SelfCorrectError::new(
                        format!(
                            "operation {} of {} failed on {}: {e}",
                            i + 1,
                            operations.len(),
                            op.file_path()
                        ),
                        "multi_file_edit",
                        &["view_file", "str_replace_editor", "code_analysis"],
                        "A file operation failed and all applied changes were rolled back. \
                         Inspect the failing file and retry with smaller operations.",
                    )
                    .with_metadata(json!({
                        "failedOperation": i + 1,
                        "totalOperations": operations.len(),
                        "failedFile": op.file_path(),
                        "operationType": op.kind(),
                    }));
                    return TransactionResult {
                        success: false,
                        applied: Vec::new(),
                        error: Some(error),
                    };
                }
            }
        }

        TransactionResult {
            success: true,
            applied,
            error: None,
        }
    }

    /// Capture current content of every referenced existing path, reads
    /// bounded by the read pool.
    pub async fn snapshot(&self, operations: &[FileOperation], base: &Path) -> SnapshotMap {
        let mut paths: Vec<PathBuf> = Vec::new();
        for op in operations {
            for raw in op.touched_paths() {
                let path = resolve(raw, base);
                if !paths.contains(&path) {
                    paths.push(path);
                }
            }
        }

        let reads = paths.into_iter().map(|path| async move {
            let _permit = self.pools.read().await;
            let content = tokio::fs::read_to_string(&path).await.ok();
            (path, content)
        });
        join_all(reads).await.into_iter().collect()
    }

    /// Restore every snapshot in parallel (bounded by the write pool).
    pub async fn rollback(&self, snapshots: &SnapshotMap) {
        let restores = snapshots.iter().map(|(path, prior)| async move {
            let _permit = self.pools.write().await;
            match prior {
                Some(content) => {
                    if let Err(e) = tokio::fs::write(path, content).await {
                        tracing::error!("rollback failed for {}: {e}", path.display());
                    }
                }
                None => {
                    if path.exists() {
                        if let Err(e) = tokio::fs::remove_file(path).await {
                            tracing::error!("rollback removal failed for {}: {e}", path.display());
                        }
                    }
                }
            }
        });
        join_all(restores).await;
    }
}

fn resolve(raw: &str, base: &Path) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn apply_one(op: &FileOperation, base: &Path) -> anyhow::Result<String> {
    match op {
        FileOperation::Edit {
            file_path,
            old_str,
            new_str,
            replace_all,
        } => {
            let path = resolve(file_path, base);
            let content = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
            let result = replace_in_content(&content, old_str, new_str, *replace_all).map_err(
                |failure| match failure {
                    ReplaceFailure::NoMatch => {
                        anyhow::anyhow!("old_str not found (even with fuzzy matching)")
                    }
                    ReplaceFailure::Ambiguous { count } => {
                        anyhow::anyhow!("old_str matches {count} locations; pass replace_all or add context")
                    }
                },
            )?;
            std::fs::write(&path, &result.content)?;
            Ok(format!("edited {file_path}"))
        }
        FileOperation::Create {
            file_path,
            content,
            overwrite,
        } => {
            let path = resolve(file_path, base);
            if path.exists() && !overwrite {
                anyhow::bail!("file already exists (pass overwrite to replace it)");
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
            Ok(format!("created {file_path}"))
        }
        FileOperation::Delete { file_path } => {
            let path = resolve(file_path, base);
            std::fs::remove_file(&path)
                .map_err(|e| anyhow::anyhow!("cannot delete {}: {e}", path.display()))?;
            Ok(format!("deleted {file_path}"))
        }
        FileOperation::Move {
            file_path,
            target_path,
        } => {
            let from = resolve(file_path, base);
            let to = resolve(target_path, base);
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&from, &to)
                .map_err(|e| anyhow::anyhow!("cannot move {}: {e}", from.display()))?;
            Ok(format!("moved {file_path} -> {target_path}"))
        }
    }
}
