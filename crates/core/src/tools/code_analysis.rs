use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::edit::globals::is_global_identifier;
use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct CodeAnalysisTool;

#[async_trait]
impl Tool for CodeAnalysisTool {
    fn name(&self) -> &str {
        "code_analysis"
    }

    fn description(&self) -> &str {
        "Analyze a file's structure (identifiers, parse errors) or suggest a smart insertion point for new code."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string", "enum": ["analyze", "smart_insert"], "default": "analyze" },
                "path": { "type": "string", "description": "File to analyze" },
                "content": { "type": "string", "description": "For smart_insert: the code to place" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let raw = args.get("path").and_then(|v| v.as_str()).unwrap_or_default();
        let operation = args
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("analyze");
        let path = ctx.resolve(raw);

        if !path.exists() {
            return Ok(ToolOutcome::fail(format!("file not found: {raw}")));
        }
        let _permit = ctx.pools.read().await;
        let content = tokio::fs::read_to_string(&path).await?;
        drop(_permit);

        match operation {
            "smart_insert" => {
                let insert_line = insertion_point(&content);
                Ok(ToolOutcome::ok_with(
                    format!(
                        "insert new code at line {} of {raw} (after imports, before trailing exports)",
                        insert_line + 1
                    ),
                    json!({ "path": raw, "insertLine": insert_line }),
                ))
            }
            _ => {
                let mut user_identifiers = Vec::new();
                let mut global_hits = Vec::new();
                if let Ok(re) = regex::Regex::new(r"\b[A-Za-z_$][A-Za-z0-9_$]*\b") {
                    for m in re.find_iter(&content) {
                        let name = m.as_str();
                        if is_global_identifier(name) {
                            if !global_hits.contains(&name.to_string()) {
                                global_hits.push(name.to_string());
                            }
                        } else if name.len() > 2
                            && !user_identifiers.contains(&name.to_string())
                            && user_identifiers.len() < 100
                        {
                            user_identifiers.push(name.to_string());
                        }
                    }
                }

                let mut out = format!(
                    "{raw}: {} lines, {} distinct user identifiers, {} runtime globals used\n",
                    content.lines().count(),
                    user_identifiers.len(),
                    global_hits.len()
                );
                if let Some(engine) = ctx.engine.as_ref().filter(|e| e.is_ready()) {
                    let errors = engine.get_parse_errors(Some(&path));
                    if let Some(issues) = errors.get(&path) {
                        out.push_str(&format!("{} parse issue(s):\n", issues.len()));
                        for issue in issues.iter().take(10) {
                            out.push_str(&format!(
                                "  line {}: {}\n",
                                issue.position.row + 1,
                                issue.message
                            ));
                        }
                    }
                }

                Ok(ToolOutcome::ok_with(
                    out,
                    json!({
                        "path": raw,
                        "identifiers": user_identifiers.len(),
                        "globals": global_hits,
                    }),
                ))
            }
        }
    }
}

/// After the last top-of-file import, else the top.
fn insertion_point(content: &str) -> usize {
    let mut last_import = None;
    for (i, line) in content.lines().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            last_import = Some(i);
        } else if !trimmed.is_empty() && last_import.is_some() {
            break;
        }
    }
    last_import.map(|i| i + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn analyze_separates_globals_from_user_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "const total = JSON.parse(raw);\nconsole.log(total);\n",
        )
        .unwrap();
        let ctx = test_context(dir.path());

        let outcome = CodeAnalysisTool
            .execute(json!({"path": "a.ts"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success);
        let globals = outcome.metadata["globals"].as_array().unwrap();
        assert!(globals.contains(&json!("JSON")));
        assert!(globals.contains(&json!("console")));
        assert!(!globals.contains(&json!("total")));
    }

    #[tokio::test]
    async fn smart_insert_points_after_imports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "import { x } from './x';\nimport { y } from './y';\n\nexport function f() {}\n",
        )
        .unwrap();
        let ctx = test_context(dir.path());

        let outcome = CodeAnalysisTool
            .execute(json!({"path": "a.ts", "operation": "smart_insert"}), &ctx)
            .await
            .unwrap();
        assert_eq!(outcome.metadata["insertLine"], json!(2));
    }
}
