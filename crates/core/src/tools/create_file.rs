use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::{SelfCorrectError, ToolOutcome};

use super::{Tool, ToolContext};

pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Refuses to overwrite an existing file unless `overwrite` is set."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path of the file to create" },
                "content": { "type": "string", "description": "Full file content" },
                "overwrite": { "type": "boolean", "default": false }
            },
            "required": ["path", "content"]
        })
    }

    fn writes(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let overwrite = args
            .get("overwrite")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let path = ctx.resolve(raw);
        if path.exists() && !overwrite {
            return Ok(SelfCorrectError::new(
                format!("file already exists: {raw}"),
                "create_file",
                &["view_file", "str_replace_editor"],
                "The file exists. View it first, then edit with str_replace_editor, or pass overwrite:true.",
            )
            .into_outcome());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let _permit = ctx.pools.write().await;
        tokio::fs::write(&path, content).await?;

        Ok(ToolOutcome::ok_with(
            format!("created {raw} ({} bytes)", content.len()),
            json!({ "filePath": raw, "filesModified": [raw] }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn creates_with_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = CreateFileTool
            .execute(json!({"path": "deep/dir/a.ts", "content": "x"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/dir/a.ts")).unwrap(),
            "x"
        );
    }

    #[tokio::test]
    async fn refuses_overwrite_without_flag() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "keep").unwrap();
        let ctx = test_context(dir.path());

        let outcome = CreateFileTool
            .execute(json!({"path": "a.ts", "content": "clobber"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(SelfCorrectError::decode(&outcome).is_some());
        assert_eq!(std::fs::read_to_string(dir.path().join("a.ts")).unwrap(), "keep");

        let outcome = CreateFileTool
            .execute(
                json!({"path": "a.ts", "content": "clobber", "overwrite": true}),
                &ctx,
            )
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.ts")).unwrap(),
            "clobber"
        );
    }
}
