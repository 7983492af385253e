use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::{SelfCorrectError, ToolOutcome};

use super::{Tool, ToolContext};

const MAX_LINES: usize = 2_000;

pub struct ViewFileTool;

#[async_trait]
impl Tool for ViewFileTool {
    fn name(&self) -> &str {
        "view_file"
    }

    fn description(&self) -> &str {
        "View the contents of a file, optionally a line range. Line numbers in the output are 1-based."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path (relative to the working directory or absolute)" },
                "startLine": { "type": "integer", "description": "First line to show, 1-based" },
                "endLine": { "type": "integer", "description": "Last line to show, 1-based inclusive" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
        let path = ctx.resolve(raw);

        if !path.exists() {
            return Ok(SelfCorrectError::new(
                format!("file not found: {raw}"),
                "view_file",
                &["search", "advanced_search"],
                "The path does not exist. Search for the file name first to locate it.",
            )
            .into_outcome());
        }

        let _permit = ctx.pools.read().await;
        let content = tokio::fs::read_to_string(&path).await?;
        drop(_permit);

        let start = args
            .get("startLine")
            .and_then(|v| v.as_u64())
            .map(|n| (n.max(1) - 1) as usize)
            .unwrap_or(0);
        let end = args
            .get("endLine")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);

        let total = content.lines().count();
        let mut shown = 0usize;
        let mut out = String::new();
        for (i, line) in content.lines().enumerate() {
            if i < start {
                continue;
            }
            if let Some(end) = end {
                if i >= end {
                    break;
                }
            }
            if shown >= MAX_LINES {
                out.push_str("… (truncated)\n");
                break;
            }
            out.push_str(&format!("{:>5} | {line}\n", i + 1));
            shown += 1;
        }

        Ok(ToolOutcome::ok_with(
            out,
            json!({ "path": raw, "totalLines": total, "shownLines": shown }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn shows_numbered_lines_in_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "one\ntwo\nthree\n").unwrap();
        let ctx = test_context(dir.path());

        let outcome = ViewFileTool
            .execute(json!({"path": "a.ts", "startLine": 2, "endLine": 3}), &ctx)
            .await
            .unwrap();
        let text = outcome.output.unwrap();
        assert!(text.contains("2 | two"));
        assert!(text.contains("3 | three"));
        assert!(!text.contains("1 | one"));
    }

    #[tokio::test]
    async fn missing_file_self_corrects_to_search() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = ViewFileTool
            .execute(json!({"path": "nope.ts"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        let sc = SelfCorrectError::decode(&outcome).unwrap();
        assert_eq!(sc.original_tool, "view_file");
        assert!(sc.suggested_fallbacks.contains(&"search".to_string()));
    }
}
