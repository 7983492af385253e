use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::multifile::{FileOperation, MultiFileEditor};
use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct MultiFileEditTool;

#[async_trait]
impl Tool for MultiFileEditTool {
    fn name(&self) -> &str {
        "multi_file_edit"
    }

    fn description(&self) -> &str {
        "Apply a batch of file operations (edit/create/delete/move) as one transaction. \
         On any failure all applied operations are rolled back."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operations": {
                    "type": "array",
                    "description": "Ordered operations; each has `type` (edit|create|delete|move) plus its fields",
                    "items": {
                        "type": "object",
                        "properties": {
                            "type": { "type": "string", "enum": ["edit", "create", "delete", "move"] },
                            "file_path": { "type": "string" },
                            "old_str": { "type": "string" },
                            "new_str": { "type": "string" },
                            "replace_all": { "type": "boolean" },
                            "content": { "type": "string" },
                            "overwrite": { "type": "boolean" },
                            "target_path": { "type": "string" }
                        },
                        "required": ["type", "file_path"]
                    }
                },
                "dryRun": { "type": "boolean", "default": false }
            },
            "required": ["operations"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let raw_ops = args
            .get("operations")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        let operations: Vec<FileOperation> = match serde_json::from_value(raw_ops) {
            Ok(ops) => ops,
            Err(e) => {
                return Ok(ToolOutcome::fail(format!(
                    "could not parse operations: {e}"
                )))
            }
        };
        if operations.is_empty() {
            return Ok(ToolOutcome::fail("operations must not be empty"));
        }

        let dry_run = args
            .get("dryRun")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if dry_run {
            let preview = operations
                .iter()
                .map(|op| format!("{} {}", op.kind(), op.file_path()))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(ToolOutcome::ok_with(
                format!("dry run, {} operation(s):\n{preview}", operations.len()),
                json!({ "dryRun": true, "operationCount": operations.len() }),
            ));
        }

        let editor = MultiFileEditor::new(ctx.pools.clone());
        let result = editor.apply(&operations, &ctx.cwd).await;

        if result.success {
            let files: Vec<String> = operations
                .iter()
                .map(|op| op.file_path().to_string())
                .collect();
            Ok(ToolOutcome::ok_with(
                format!("applied {} operation(s):\n{}", result.applied.len(), result.applied.join("\n")),
                json!({ "filesModified": files, "operationCount": operations.len() }),
            ))
        } else {
            let error = result
                .error
                .expect("failed transactions carry a self-correct error");
            Ok(error.into_outcome())
        }
    }
}
