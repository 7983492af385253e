use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::history::{OperationHistory, OperationRecord};
use crate::outcome::ToolOutcome;

use super::{PlanStatus, RollbackPoint, StepStatus, StepType, TaskPlan};

#[derive(Debug, Clone)]
pub enum PlanEvent {
    Progress {
        completed: usize,
        total: usize,
        estimated_remaining_ms: u64,
        current_step: String,
    },
    StepStarted {
        step_id: String,
        description: String,
    },
    StepCompleted {
        step_id: String,
        duration_ms: u64,
        files_modified: Vec<String>,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    Completed {
        status: PlanStatus,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub auto_rollback_on_failure: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            auto_rollback_on_failure: true,
        }
    }
}

/// Run a validated plan in dependency order. Before each step, every file
/// its args mention is snapshotted; on failure the snapshots of the failed
/// step and all completed steps are restored in reverse order (when
/// auto-rollback is on).
pub async fn execute_plan<F, Fut>(
    plan: &mut TaskPlan,
    base: &Path,
    runner: F,
    mut on_event: impl FnMut(PlanEvent),
    history: Option<&OperationHistory>,
    options: &ExecutorOptions,
    cancel: Option<&CancellationToken>,
) -> Result<()>
where
    F: Fn(String, Value) -> Fut,
    Fut: Future<Output = ToolOutcome>,
{
    plan.status = PlanStatus::Executing;
    plan.started_at = Some(Utc::now());
    let started = std::time::Instant::now();

    let order = execution_order(plan)?;
    let total = order.len();
    let mut rollback_points: Vec<RollbackPoint> = Vec::new();
    let mut completed_ids: Vec<String> = Vec::new();

    for (position, step_id) in order.iter().enumerate() {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            for remaining in &order[position..] {
                if let Some(step) = plan.step_mut(remaining) {
                    step.status = StepStatus::Skipped;
                }
            }
            plan.status = PlanStatus::Failed;
            plan.completed_at = Some(Utc::now());
            on_event(PlanEvent::Completed {
                status: plan.status,
            });
            return Ok(());
        }

        let (description, tool, args) = {
            let step = plan.step(step_id).expect("ordered step exists");
            (
                step.description.clone(),
                step.tool.clone(),
                step.args.clone(),
            )
        };

        let estimated_remaining_ms = if position == 0 {
            plan.total_estimated_duration_ms
        } else {
            let elapsed = started.elapsed().as_millis() as u64;
            (elapsed / position as u64).saturating_mul((total - position) as u64)
        };
        on_event(PlanEvent::Progress {
            completed: position,
            total,
            estimated_remaining_ms,
            current_step: description.clone(),
        });
        on_event(PlanEvent::StepStarted {
            step_id: step_id.clone(),
            description: description.clone(),
        });

        let rollback_point = capture_rollback_point(step_id, &args, base);

        {
            let step = plan.step_mut(step_id).expect("ordered step exists");
            step.status = StepStatus::Running;
            step.start_time = Some(Utc::now());
        }

        let step_started = std::time::Instant::now();
        let outcome = runner(tool.clone(), args).await;
        let duration_ms = step_started.elapsed().as_millis() as u64;

        if outcome.success {
            let files_modified = extract_files_modified(&outcome);
            {
                let step = plan.step_mut(step_id).expect("ordered step exists");
                step.status = StepStatus::Completed;
                step.end_time = Some(Utc::now());
                step.result = Some(
                    serde_json::to_value(&outcome).unwrap_or(Value::Null),
                );
            }
            if let Some(history) = history {
                let step = plan.step(step_id).expect("ordered step exists");
                let record = OperationRecord::new(
                    history_operation_type(step.step_type),
                    &description,
                    files_modified.clone(),
                )
                .with_metadata(serde_json::json!({
                    "planId": plan.id,
                    "stepId": step_id,
                    "tool": tool,
                }));
                if let Err(e) = history.record(&record) {
                    tracing::warn!("failed to record operation history: {e}");
                }
            }
            rollback_points.push(rollback_point);
            completed_ids.push(step_id.clone());
            on_event(PlanEvent::StepCompleted {
                step_id: step_id.clone(),
                duration_ms,
                files_modified,
            });
        } else {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "tool reported failure".to_string());
            {
                let step = plan.step_mut(step_id).expect("ordered step exists");
                step.status = StepStatus::Failed;
                step.end_time = Some(Utc::now());
                step.error = Some(error.clone());
            }
            on_event(PlanEvent::StepFailed {
                step_id: step_id.clone(),
                error,
            });

            if options.auto_rollback_on_failure {
                // The failed step may have partially written before dying;
                // restore it first, then unwind the completed steps.
                restore_rollback_point(&rollback_point);
                for point in rollback_points.iter().rev() {
                    restore_rollback_point(point);
                }
                for id in &completed_ids {
                    if let Some(step) = plan.step_mut(id) {
                        step.status = StepStatus::RolledBack;
                    }
                }
                plan.status = PlanStatus::RolledBack;
            } else {
                plan.status = PlanStatus::Failed;
            }
            plan.completed_at = Some(Utc::now());
            on_event(PlanEvent::Completed {
                status: plan.status,
            });
            return Ok(());
        }
    }

    plan.status = PlanStatus::Completed;
    plan.completed_at = Some(Utc::now());
    on_event(PlanEvent::Completed {
        status: plan.status,
    });
    Ok(())
}

/// Repeatedly take steps whose dependencies are all completed; bail if
/// nothing is runnable while steps remain (cycle or missing dependency).
fn execution_order(plan: &TaskPlan) -> Result<Vec<String>> {
    let mut order = Vec::with_capacity(plan.steps.len());
    let mut done: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&super::TaskStep> = plan.steps.iter().collect();

    while !remaining.is_empty() {
        let runnable: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, s)| s.dependencies.iter().all(|d| done.contains(d.as_str())))
            .map(|(i, _)| i)
            .collect();
        if runnable.is_empty() {
            anyhow::bail!("no runnable step: circular or missing dependencies");
        }
        for i in runnable.into_iter().rev() {
            let step = remaining.remove(i);
            done.insert(step.id.as_str());
            order.push(step.id.clone());
        }
    }
    // Removal in reverse index order reverses each wave; restore plan order
    // within waves for deterministic execution.
    order.sort_by_key(|id| plan.steps.iter().position(|s| &s.id == id));
    Ok(order)
}

const PATH_KEYS: [&str; 8] = [
    "filePath",
    "file_path",
    "path",
    "targetFile",
    "target_file",
    "sourceFile",
    "source_file",
    "target_path",
];

/// Snapshot every existing file the step's args reference.
fn capture_rollback_point(step_id: &str, args: &Value, base: &Path) -> RollbackPoint {
    let mut paths: Vec<PathBuf> = Vec::new();
    collect_paths(args, base, &mut paths);

    let mut file_snapshots = HashMap::new();
    for path in paths {
        if let Ok(content) = std::fs::read_to_string(&path) {
            file_snapshots.insert(path, content);
        }
    }

    RollbackPoint {
        step_id: step_id.to_string(),
        timestamp: Utc::now(),
        file_snapshots,
        metadata: args.clone(),
    }
}

fn collect_paths(args: &Value, base: &Path, out: &mut Vec<PathBuf>) {
    let Value::Object(map) = args else { return };

    for key in PATH_KEYS {
        if let Some(Value::String(raw)) = map.get(key) {
            push_path(raw, base, out);
        }
    }
    if let Some(Value::Array(files)) = map.get("files") {
        for file in files {
            match file {
                Value::String(raw) => push_path(raw, base, out),
                Value::Object(_) => collect_paths(file, base, out),
                _ => {}
            }
        }
    }
    if let Some(Value::Array(ops)) = map.get("operations") {
        for op in ops {
            collect_paths(op, base, out);
        }
    }
}

fn push_path(raw: &str, base: &Path, out: &mut Vec<PathBuf>) {
    let path = Path::new(raw);
    let resolved = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    if !out.contains(&resolved) {
        out.push(resolved);
    }
}

fn restore_rollback_point(point: &RollbackPoint) {
    for (path, content) in &point.file_snapshots {
        if let Err(e) = std::fs::write(path, content) {
            tracing::error!("rollback write failed for {}: {e}", path.display());
        }
    }
}

fn extract_files_modified(outcome: &ToolOutcome) -> Vec<String> {
    let mut files = Vec::new();
    let meta = &outcome.metadata;
    for key in ["filesModified", "files"] {
        if let Some(Value::Array(list)) = meta.get(key) {
            for item in list {
                if let Value::String(s) = item {
                    if !files.contains(s) {
                        files.push(s.clone());
                    }
                }
            }
        }
    }
    for key in ["filePath", "file_path", "path"] {
        if let Some(Value::String(s)) = meta.get(key) {
            if !files.contains(s) {
                files.push(s.clone());
            }
        }
    }
    files
}

fn history_operation_type(step_type: StepType) -> &'static str {
    match step_type {
        StepType::Analyze => "analyze",
        StepType::Refactor => "refactor",
        StepType::Move => "move",
        StepType::Create => "create",
        StepType::Delete => "delete",
        StepType::Test => "test",
        StepType::Validate => "validate",
        StepType::Document => "document",
    }
}
