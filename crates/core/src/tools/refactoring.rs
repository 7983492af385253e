use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::multifile::MultiFileEditor;
use crate::outcome::ToolOutcome;
use crate::refactor::extract::{extract_function, extract_variable};
use crate::refactor::inline::inline_function;
use crate::refactor::move_symbol::{move_symbol, MoveRequest};
use crate::refactor::rename::{rename, RenameScope};
use crate::refactor::RefactoringOperation;

use super::{Tool, ToolContext};

pub struct RefactoringAssistantTool;

#[async_trait]
impl Tool for RefactoringAssistantTool {
    fn name(&self) -> &str {
        "refactoring_assistant"
    }

    fn description(&self) -> &str {
        "Plan a refactoring (rename, extract_function, extract_variable, move_function, \
         move_class, inline_function). Produces a reviewable plan; pass apply:true to \
         execute it transactionally."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["rename", "extract_function", "extract_variable", "move_function", "move_class", "inline_function"]
                },
                "symbolName": { "type": "string" },
                "newName": { "type": "string", "description": "rename: the new identifier" },
                "scope": { "type": "string", "enum": ["file", "project", "global"], "default": "project" },
                "filePath": { "type": "string" },
                "sourceFile": { "type": "string", "description": "move: file currently holding the symbol" },
                "targetFile": { "type": "string", "description": "move: destination file" },
                "createTarget": { "type": "boolean", "default": true },
                "startLine": { "type": "integer", "description": "extract: first selected line, 1-based" },
                "endLine": { "type": "integer", "description": "extract: last selected line, 1-based" },
                "startColumn": { "type": "integer" },
                "endColumn": { "type": "integer" },
                "functionName": { "type": "string" },
                "variableName": { "type": "string" },
                "includeComments": { "type": "boolean", "default": false },
                "includeStrings": { "type": "boolean", "default": false },
                "apply": { "type": "boolean", "default": false }
            },
            "required": ["operation"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let Some(engine) = ctx.engine.as_ref().filter(|e| e.is_ready()) else {
            return Ok(ToolOutcome::fail(
                "code intelligence engine is not ready; refactoring needs the symbol index",
            ));
        };

        let operation = args
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let plan: RefactoringOperation = match operation {
            "rename" => {
                let symbol = require_str(&args, "symbolName")?;
                let new_name = require_str(&args, "newName")?;
                let scope = match args.get("scope").and_then(|v| v.as_str()) {
                    Some("file") => {
                        let file = require_str(&args, "filePath")?;
                        RenameScope::File(ctx.resolve(&file))
                    }
                    Some("global") => RenameScope::Global,
                    _ => RenameScope::Project,
                };
                let include_comments = bool_arg(&args, "includeComments", false);
                let include_strings = bool_arg(&args, "includeStrings", false);
                match rename(engine, &symbol, &new_name, scope, include_comments, include_strings) {
                    Ok(plan) => plan,
                    Err(e) => return Ok(ToolOutcome::fail(e.to_string())),
                }
            }
            "extract_function" => {
                let file = require_str(&args, "filePath")?;
                let path = ctx.resolve(&file);
                let Some(source) = engine.file_source(&path) else {
                    return Ok(ToolOutcome::fail(format!("{file} is not indexed")));
                };
                let symbols: Vec<String> = engine
                    .get_file_symbols(&path)
                    .into_iter()
                    .map(|s| s.name)
                    .collect();
                let start = usize_arg(&args, "startLine")?.saturating_sub(1);
                let end = usize_arg(&args, "endLine")?.saturating_sub(1);
                let name = args
                    .get("functionName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("extracted")
                    .to_string();
                match extract_function(&path, &source, &symbols, start, end, &name, None, None) {
                    Ok(result) => {
                        let mut plan = result.operation;
                        plan.preview = format!(
                            "confidence {:.2}, return type {}\n{}",
                            result.confidence, result.return_type, plan.preview
                        );
                        plan
                    }
                    Err(e) => return Ok(ToolOutcome::fail(e.to_string())),
                }
            }
            "extract_variable" => {
                let file = require_str(&args, "filePath")?;
                let path = ctx.resolve(&file);
                let Some(source) = engine.file_source(&path) else {
                    return Ok(ToolOutcome::fail(format!("{file} is not indexed")));
                };
                let line = usize_arg(&args, "startLine")?.saturating_sub(1);
                let start_col = usize_arg(&args, "startColumn")?;
                let end_col = usize_arg(&args, "endColumn")?;
                let name = args
                    .get("variableName")
                    .and_then(|v| v.as_str())
                    .unwrap_or("extracted")
                    .to_string();
                match extract_variable(&path, &source, line, start_col, end_col, &name) {
                    Ok(plan) => plan,
                    Err(e) => return Ok(ToolOutcome::fail(e.to_string())),
                }
            }
            "move_function" | "move_class" => {
                let symbol = require_str(&args, "symbolName")?;
                let source_file = require_str(&args, "sourceFile")?;
                let target_file = require_str(&args, "targetFile")?;
                let request = MoveRequest {
                    symbol_name: symbol,
                    source_file: ctx.resolve(&source_file),
                    target_file: ctx.resolve(&target_file),
                    create_target: bool_arg(&args, "createTarget", true),
                };
                match move_symbol(engine, &request) {
                    Ok(plan) => plan,
                    Err(e) => return Ok(ToolOutcome::fail(e.to_string())),
                }
            }
            "inline_function" => {
                let symbol = require_str(&args, "symbolName")?;
                let preserve = bool_arg(&args, "includeComments", false);
                match inline_function(engine, &symbol, preserve) {
                    Ok(plan) => plan,
                    Err(e) => return Ok(ToolOutcome::fail(e.to_string())),
                }
            }
            other => {
                return Ok(ToolOutcome::fail(format!(
                    "unknown refactoring operation: {other}"
                )))
            }
        };

        let apply = bool_arg(&args, "apply", false);
        let plan_json = serde_json::to_value(&plan).unwrap_or(Value::Null);

        if !apply {
            return Ok(ToolOutcome::ok_with(
                format!(
                    "{} plan ({} file(s), risk {}):\n{}\n\nwarnings:\n{}",
                    plan.operation,
                    plan.files.len(),
                    plan.safety.risk,
                    plan.preview,
                    if plan.safety.warnings.is_empty() {
                        "(none)".to_string()
                    } else {
                        plan.safety.warnings.join("\n")
                    }
                ),
                json!({ "plan": plan_json, "applied": false }),
            ));
        }

        let operations = match plan.to_file_operations(&ctx.cwd) {
            Ok(ops) => ops,
            Err(e) => return Ok(ToolOutcome::fail(format!("could not lower plan: {e}"))),
        };
        let editor = MultiFileEditor::new(ctx.pools.clone());
        let result = editor.apply(&operations, &ctx.cwd).await;

        if result.success {
            let files: Vec<String> = plan
                .files
                .iter()
                .map(|f| f.file_path.to_string_lossy().into_owned())
                .collect();
            // Refresh the index for every file the plan touched.
            for file in &plan.files {
                let absolute: PathBuf = if file.file_path.is_absolute() {
                    file.file_path.clone()
                } else {
                    ctx.cwd.join(&file.file_path)
                };
                if absolute.exists() {
                    engine.apply_change(&absolute);
                } else {
                    engine.apply_unlink(&absolute);
                }
            }
            Ok(ToolOutcome::ok_with(
                format!("applied {} ({} file(s))", plan.operation, files.len()),
                json!({ "plan": plan_json, "applied": true, "filesModified": files }),
            ))
        } else {
            let error = result
                .error
                .expect("failed transactions carry a self-correct error");
            Ok(error.into_outcome())
        }
    }
}

fn require_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
}

fn bool_arg(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
}

fn usize_arg(args: &Value, key: &str) -> Result<usize> {
    args.get(key)
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .ok_or_else(|| anyhow::anyhow!("missing required parameter: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;
    use grok_engine::{CodeIntelligenceEngine, EngineConfig};
    use std::sync::Arc;

    async fn ctx_with_engine(dir: &std::path::Path) -> super::super::ToolContext {
        let mut config = EngineConfig::new(dir);
        config.watch = false;
        let engine = Arc::new(CodeIntelligenceEngine::new(config).unwrap());
        engine.initialize().await.unwrap();
        let mut ctx = test_context(dir);
        ctx.engine = Some(engine);
        ctx
    }

    #[tokio::test]
    async fn move_function_plan_matches_expected_shape() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/u")).unwrap();
        std::fs::write(
            dir.path().join("src/u/math.ts"),
            "export function calculateTotal(items: number[]): number {\n  return items.length;\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/cart.ts"),
            "import { calculateTotal } from './u/math';\nconst t = calculateTotal([]);\n",
        )
        .unwrap();
        let ctx = ctx_with_engine(dir.path()).await;

        let outcome = RefactoringAssistantTool
            .execute(
                json!({
                    "operation": "move_function",
                    "symbolName": "calculateTotal",
                    "sourceFile": "src/u/math.ts",
                    "targetFile": "src/u/calc.ts"
                }),
                &ctx,
            )
            .await
            .unwrap();

        assert!(outcome.success, "{:?}", outcome.error);
        assert_eq!(outcome.metadata["applied"], json!(false));
        let plan = &outcome.metadata["plan"];
        assert_eq!(plan["operation"], json!("move_function"));
        assert_eq!(plan["safety"]["risk"], json!("low"));
        // delete span + target append + one import rewrite
        assert_eq!(plan["files"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rename_apply_rewrites_files_and_reindexes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.ts"), "export function total() {}\n").unwrap();
        std::fs::write(
            dir.path().join("u.ts"),
            "import { total } from './m';\nconst x = total();\n",
        )
        .unwrap();
        let ctx = ctx_with_engine(dir.path()).await;

        let outcome = RefactoringAssistantTool
            .execute(
                json!({
                    "operation": "rename",
                    "symbolName": "total",
                    "newName": "sum",
                    "includeStrings": true,
                    "apply": true
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.error);

        let m = std::fs::read_to_string(dir.path().join("m.ts")).unwrap();
        let u = std::fs::read_to_string(dir.path().join("u.ts")).unwrap();
        assert!(m.contains("function sum"));
        assert!(u.contains("{ sum }"));
        assert!(u.contains("sum()"));

        // The index was refreshed in place.
        let engine = ctx.engine.as_ref().unwrap();
        assert!(engine.find_symbol("total").is_empty());
        assert_eq!(engine.find_symbol("sum").len(), 1);
    }

    #[tokio::test]
    async fn unknown_operation_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_with_engine(dir.path()).await;
        let outcome = RefactoringAssistantTool
            .execute(json!({"operation": "transmogrify"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
