use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::edit::{replace_in_content, MatchStrategy, ReplaceFailure};
use crate::outcome::{SelfCorrectError, ToolOutcome};

use super::{Tool, ToolContext};

const ERROR_SNIPPET_LEN: usize = 200;

pub struct StrReplaceEditorTool;

#[async_trait]
impl Tool for StrReplaceEditorTool {
    fn name(&self) -> &str {
        "str_replace_editor"
    }

    fn description(&self) -> &str {
        "Replace text in a file. Falls back to whitespace-normalized and structural matching when \
         old_str does not match exactly, so minor formatting differences are tolerated."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to edit" },
                "old_str": { "type": "string", "description": "Text to find" },
                "new_str": { "type": "string", "description": "Replacement text, written verbatim" },
                "replace_all": { "type": "boolean", "default": false }
            },
            "required": ["path", "old_str", "new_str"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
        let old_str = args
            .get("old_str")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let new_str = args
            .get("new_str")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let path = ctx.resolve(raw);
        if !path.exists() {
            return Ok(SelfCorrectError::new(
                format!("file not found: {raw}"),
                "str_replace_editor",
                &["search", "view_file"],
                "The path does not exist. Search for the file first.",
            )
            .into_outcome());
        }

        let _read = ctx.pools.read().await;
        let content = tokio::fs::read_to_string(&path).await?;
        drop(_read);

        match replace_in_content(&content, old_str, new_str, replace_all) {
            Ok(result) => {
                let _write = ctx.pools.write().await;
                tokio::fs::write(&path, &result.content).await?;
                Ok(ToolOutcome::ok_with(
                    format!(
                        "replaced {} occurrence(s) in {raw} ({} match)",
                        result.replacements,
                        result.strategy.name()
                    ),
                    json!({
                        "filePath": raw,
                        "filesModified": [raw],
                        "replacements": result.replacements,
                        "matchStrategy": result.strategy.name(),
                        "fallbackUsed": result.strategy != MatchStrategy::Exact,
                    }),
                ))
            }
            Err(failure) => {
                let snippet: String = old_str.chars().take(ERROR_SNIPPET_LEN).collect();
                let message = match failure {
                    ReplaceFailure::NoMatch => {
                        format!("old_str not found in {raw}: {snippet}")
                    }
                    ReplaceFailure::Ambiguous { count } => format!(
                        "old_str matches {count} locations in {raw}; add surrounding context or pass replace_all: {snippet}"
                    ),
                };
                Ok(SelfCorrectError::new(
                    message,
                    "str_replace_editor",
                    &["view_file", "multi_file_edit", "code_analysis"],
                    "The text to replace likely differs in whitespace or line endings from the \
                     file. View the exact file content and retry with the text as it appears.",
                )
                .into_outcome())
            }
        }
    }
}
