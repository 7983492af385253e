pub mod analyzer;
pub mod executor;
pub mod plan_builder;
pub mod risk;
pub mod validation;

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::refactor::RiskLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Draft,
    Validated,
    Executing,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Analyze,
    Refactor,
    Move,
    Create,
    Delete,
    Test,
    Validate,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: String,
    pub step_type: StepType,
    pub description: String,
    pub tool: String,
    pub args: Value,
    pub dependencies: Vec<String>,
    pub estimated_duration_ms: u64,
    pub risk_level: RiskLevel,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskStep {
    pub fn new(
        id: impl Into<String>,
        step_type: StepType,
        description: impl Into<String>,
        tool: impl Into<String>,
        args: Value,
    ) -> Self {
        Self {
            id: id.into(),
            step_type,
            description: description.into(),
            tool: tool.into(),
            args,
            dependencies: Vec::new(),
            estimated_duration_ms: 0,
            risk_level: RiskLevel::Low,
            status: StepStatus::Pending,
            result: None,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn depends_on(mut self, ids: &[&str]) -> Self {
        self.dependencies = ids.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub files_affected: Vec<String>,
    pub tools_used: Vec<String>,
    pub dependencies_analyzed: bool,
    pub risks_assessed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPlan {
    pub id: String,
    pub user_intent: String,
    pub description: String,
    pub steps: Vec<TaskStep>,
    pub total_estimated_duration_ms: u64,
    pub overall_risk: RiskLevel,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: PlanStatus,
    pub metadata: PlanMetadata,
}

impl TaskPlan {
    pub fn step(&self, id: &str) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut TaskStep> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// Human-readable preview for the confirmation prompt.
    pub fn render_preview(&self) -> String {
        let mut out = format!(
            "Plan: {} ({} steps, ~{}s, risk: {})\n",
            self.description,
            self.steps.len(),
            self.total_estimated_duration_ms / 1000,
            self.overall_risk
        );
        for (i, step) in self.steps.iter().enumerate() {
            let deps = if step.dependencies.is_empty() {
                String::new()
            } else {
                format!(" [after {}]", step.dependencies.join(", "))
            };
            out.push_str(&format!(
                "  {}. {} ({}, {}){}\n",
                i + 1,
                step.description,
                step.tool,
                step.risk_level,
                deps
            ));
        }
        out
    }
}

/// Pre-step snapshot of every file the step's args mention; non-existent
/// files are omitted (rollback deletes nothing it did not capture).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackPoint {
    pub step_id: String,
    pub timestamp: DateTime<Utc>,
    pub file_snapshots: HashMap<PathBuf, String>,
    pub metadata: Value,
}
