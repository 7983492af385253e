pub mod bash;
pub mod code_analysis;
pub mod code_context;
pub mod create_file;
pub mod dependency_analyzer;
pub mod multi_file_edit;
pub mod refactoring;
pub mod search;
pub mod str_replace;
pub mod symbol_search;
pub mod task_planner;
pub mod view_file;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;

use grok_engine::CodeIntelligenceEngine;

use crate::history::OperationHistory;
use crate::metrics::MetricsRecorder;
use crate::outcome::ToolOutcome;
use crate::pools::Pools;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    /// Write-class tools are serialized when parallel tool calls are off.
    fn writes(&self) -> bool {
        false
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome>;
}

#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub project_root: PathBuf,
    pub engine: Option<Arc<CodeIntelligenceEngine>>,
    pub pools: Arc<Pools>,
    pub metrics: Arc<MetricsRecorder>,
    pub history: Arc<OperationHistory>,
}

impl ToolContext {
    pub fn resolve(&self, raw: &str) -> PathBuf {
        let path = std::path::Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// One call from an LLM batch, in emission order.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Value,
}

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<grok_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .map(|t| grok_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one call. Never returns `Err`: unknown tools, invalid
    /// arguments and thrown handler errors all become failure envelopes, and
    /// every call is bracketed by a metrics operation.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolOutcome {
        let Some(tool) = self.get(name) else {
            return ToolOutcome::fail(format!("unknown tool: {name}"));
        };

        let mut args = args;
        if let Err(message) = validate_args(&tool.parameters_schema(), &mut args) {
            return ToolOutcome::fail(format!("invalid arguments for {name}: {message}"));
        }

        let timer = ctx.metrics.begin(name);
        let outcome = match tool.execute(args, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("tool {name} raised: {e:#}");
                ToolOutcome::fail(e.to_string())
            }
        };
        let fallback_used = outcome
            .metadata
            .get("fallbackUsed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        ctx.metrics.finish(
            timer,
            outcome.success,
            outcome.error.clone(),
            0,
            fallback_used,
            outcome.metadata.clone(),
        );
        outcome
    }

    /// Execute an LLM-emitted batch. Calls launch concurrently bounded by
    /// `max_concurrent`; results come back in emission order regardless of
    /// completion order. With `parallel` off the whole batch is sequential.
    pub async fn execute_batch(
        &self,
        calls: &[ToolCallRequest],
        ctx: &ToolContext,
        max_concurrent: usize,
        parallel: bool,
    ) -> Vec<ToolOutcome> {
        if !parallel {
            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                results.push(self.execute(&call.name, call.args.clone(), ctx).await);
            }
            return results;
        }

        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let futures = calls.iter().enumerate().map(|(i, call)| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("batch semaphore");
                (i, self.execute(&call.name, call.args.clone(), ctx).await)
            }
        });

        let mut indexed = join_all(futures).await;
        indexed.sort_by_key(|(i, _)| *i);
        indexed.into_iter().map(|(_, outcome)| outcome).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lenient schema validation: fill declared defaults, then require the
/// `required` keys.
fn validate_args(schema: &Value, args: &mut Value) -> Result<(), String> {
    if !args.is_object() {
        *args = Value::Object(serde_json::Map::new());
    }
    let map = args.as_object_mut().expect("object ensured");

    if let Some(Value::Object(properties)) = schema.get("properties") {
        for (key, prop) in properties {
            if !map.contains_key(key) {
                if let Some(default) = prop.get("default") {
                    map.insert(key.clone(), default.clone());
                }
            }
        }
    }
    if let Some(Value::Array(required)) = schema.get("required") {
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !map.contains_key(key) {
                return Err(format!("missing required parameter: {key}"));
            }
        }
    }
    Ok(())
}

/// The full tool surface of the agent.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(view_file::ViewFileTool));
    registry.register(Box::new(create_file::CreateFileTool));
    registry.register(Box::new(str_replace::StrReplaceEditorTool));
    registry.register(Box::new(bash::BashTool));
    registry.register(Box::new(search::SearchTool));
    registry.register(Box::new(search::AdvancedSearchTool));
    registry.register(Box::new(symbol_search::SymbolSearchTool));
    registry.register(Box::new(dependency_analyzer::DependencyAnalyzerTool));
    registry.register(Box::new(code_context::CodeContextTool));
    registry.register(Box::new(code_analysis::CodeAnalysisTool));
    registry.register(Box::new(refactoring::RefactoringAssistantTool));
    registry.register(Box::new(multi_file_edit::MultiFileEditTool));
    registry.register(Box::new(task_planner::TaskPlannerTool));
    registry
}

#[cfg(test)]
pub(crate) fn test_context(dir: &std::path::Path) -> ToolContext {
    ToolContext {
        session_id: "test-session".into(),
        cwd: dir.to_path_buf(),
        project_root: dir.to_path_buf(),
        engine: None,
        pools: Pools::initialize(),
        metrics: Arc::new(MetricsRecorder::new()),
        history: Arc::new(OperationHistory::new(dir)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unknown_tool_returns_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let registry = default_registry();
        let outcome = registry.execute("no_such_tool", json!({}), &ctx).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn missing_required_parameter_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let registry = default_registry();
        let outcome = registry.execute("view_file", json!({}), &ctx).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("missing required parameter"));
    }

    #[test]
    fn defaults_are_filled() {
        let schema = json!({
            "properties": {
                "path": {"type": "string"},
                "overwrite": {"type": "boolean", "default": false}
            },
            "required": ["path"]
        });
        let mut args = json!({"path": "a.ts"});
        validate_args(&schema, &mut args).unwrap();
        assert_eq!(args["overwrite"], json!(false));
    }

    #[tokio::test]
    async fn batch_results_preserve_emission_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "beta\n").unwrap();
        let ctx = test_context(dir.path());
        let registry = default_registry();

        let calls = vec![
            ToolCallRequest {
                id: "1".into(),
                name: "bash".into(),
                args: json!({"command": "sleep 0.2 && echo slow"}),
            },
            ToolCallRequest {
                id: "2".into(),
                name: "view_file".into(),
                args: json!({"path": "a.txt"}),
            },
            ToolCallRequest {
                id: "3".into(),
                name: "view_file".into(),
                args: json!({"path": "b.txt"}),
            },
        ];

        let started = std::time::Instant::now();
        let results = registry.execute_batch(&calls, &ctx, 3, true).await;
        let elapsed = started.elapsed();

        assert_eq!(results.len(), 3);
        assert!(results[0].output.as_deref().unwrap_or("").contains("slow"));
        assert!(results[1].output.as_deref().unwrap_or("").contains("alpha"));
        assert!(results[2].output.as_deref().unwrap_or("").contains("beta"));
        // The batch runs concurrently: total ≈ the slowest call, not the sum.
        assert!(elapsed.as_millis() < 600, "batch took {elapsed:?}");
    }

    #[tokio::test]
    async fn metrics_record_every_call() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = test_context(dir.path());
        let registry = default_registry();

        registry
            .execute("view_file", json!({"path": "a.txt"}), &ctx)
            .await;
        registry.execute("nope", json!({}), &ctx).await;

        let summary = ctx.metrics.summary();
        // Unknown tools short-circuit before metrics; the known call records.
        assert_eq!(summary.total_operations, 1);
        assert_eq!(summary.per_tool["view_file"].count, 1);
    }
}
