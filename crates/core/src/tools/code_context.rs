use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct CodeContextTool;

#[async_trait]
impl Tool for CodeContextTool {
    fn name(&self) -> &str {
        "code_context"
    }

    fn description(&self) -> &str {
        "Go-to-definition and find-usages for a symbol, or a structural summary of one or more files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "symbol": { "type": "string", "description": "Symbol to resolve (definition plus usages)" },
                "file": { "type": "string", "description": "File to summarize" },
                "files": { "type": "array", "items": { "type": "string" } },
                "includeUsages": { "type": "boolean", "default": true }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let Some(engine) = ctx.engine.as_ref().filter(|e| e.is_ready()) else {
            return Ok(ToolOutcome::fail(
                "code intelligence engine is not ready; try again shortly",
            ));
        };

        if let Some(symbol) = args.get("symbol").and_then(|v| v.as_str()) {
            let Some(xref) = engine.find_references(symbol) else {
                return Ok(ToolOutcome::ok_with(
                    format!("symbol `{symbol}` not found in the index"),
                    json!({ "found": false }),
                ));
            };
            let include_usages = args
                .get("includeUsages")
                .and_then(|v| v.as_bool())
                .unwrap_or(true);

            let mut out = String::new();
            match &xref.definition {
                Some(def) => out.push_str(&format!(
                    "definition: {}:{}\n",
                    def.file_path.display(),
                    def.position.row + 1
                )),
                None => out.push_str("definition: (unknown)\n"),
            }
            if include_usages {
                out.push_str(&format!("{} reference site(s):\n", xref.references.len()));
                for site in &xref.references {
                    out.push_str(&format!(
                        "  {:?} {}:{}: {}\n",
                        site.kind,
                        site.file_path.display(),
                        site.line + 1,
                        site.context
                    ));
                }
            }
            return Ok(ToolOutcome::ok_with(
                out,
                json!({ "found": true, "references": xref.references.len() }),
            ));
        }

        let mut files: Vec<String> = Vec::new();
        if let Some(file) = args.get("file").and_then(|v| v.as_str()) {
            files.push(file.to_string());
        }
        if let Some(list) = args.get("files").and_then(|v| v.as_array()) {
            files.extend(list.iter().filter_map(|v| v.as_str().map(str::to_string)));
        }
        if files.is_empty() {
            return Ok(ToolOutcome::fail(
                "code_context needs either `symbol` or `file`/`files`",
            ));
        }

        let mut out = String::new();
        for raw in &files {
            let path = ctx.resolve(raw);
            let symbols = engine.get_file_symbols(&path);
            out.push_str(&format!("## {raw} ({} symbol(s))\n", symbols.len()));
            for symbol in symbols {
                out.push_str(&format!(
                    "  {:?} {} ({}) line {}\n",
                    symbol.kind,
                    symbol.name,
                    symbol.scope,
                    symbol.start.row + 1
                ));
            }
            let deps = engine.get_dependencies(&path);
            if !deps.is_empty() {
                out.push_str(&format!(
                    "  imports: {}\n",
                    deps.iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }

        Ok(ToolOutcome::ok_with(out, json!({ "files": files })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;
    use grok_engine::{CodeIntelligenceEngine, EngineConfig};
    use std::sync::Arc;

    #[tokio::test]
    async fn resolves_symbol_definition_and_usages() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.ts"), "export function run() {}\n").unwrap();
        std::fs::write(
            dir.path().join("u.ts"),
            "import { run } from './m';\nrun();\n",
        )
        .unwrap();

        let mut config = EngineConfig::new(dir.path());
        config.watch = false;
        let engine = Arc::new(CodeIntelligenceEngine::new(config).unwrap());
        engine.initialize().await.unwrap();
        let mut ctx = test_context(dir.path());
        ctx.engine = Some(engine);

        let outcome = CodeContextTool
            .execute(json!({"symbol": "run"}), &ctx)
            .await
            .unwrap();
        let text = outcome.output.unwrap();
        assert!(text.contains("definition:"));
        assert!(text.contains("m.ts:1"));
        assert!(text.contains("Call"));

        let summary = CodeContextTool
            .execute(json!({"file": "m.ts"}), &ctx)
            .await
            .unwrap();
        assert!(summary.output.unwrap().contains("run"));
    }
}
