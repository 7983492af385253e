use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct SymbolSearchTool;

#[async_trait]
impl Tool for SymbolSearchTool {
    fn name(&self) -> &str {
        "symbol_search"
    }

    fn description(&self) -> &str {
        "Look up symbols in the code intelligence index by exact name or regex pattern."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Exact symbol name" },
                "pattern": { "type": "string", "description": "Regex over symbol names (used when `name` is absent)" },
                "caseSensitive": { "type": "boolean", "default": true }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let Some(engine) = ctx.engine.as_ref().filter(|e| e.is_ready()) else {
            return Ok(ToolOutcome::fail(
                "code intelligence engine is not ready; try again shortly or use search",
            ));
        };

        let name = args.get("name").and_then(|v| v.as_str());
        let pattern = args.get("pattern").and_then(|v| v.as_str());
        let case_sensitive = args
            .get("caseSensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let references = match (name, pattern) {
            (Some(name), _) => engine.find_symbol(name),
            (None, Some(pattern)) => engine.find_symbol_by_pattern(pattern, case_sensitive),
            (None, None) => {
                return Ok(ToolOutcome::fail(
                    "symbol_search needs either `name` or `pattern`",
                ))
            }
        };

        if references.is_empty() {
            return Ok(ToolOutcome::ok_with(
                "No symbols found",
                json!({ "matchCount": 0 }),
            ));
        }

        let mut out = String::new();
        for reference in &references {
            let symbol = &reference.symbol;
            out.push_str(&format!(
                "{:?} {} ({}) {}:{}\n",
                symbol.kind,
                symbol.name,
                symbol.scope,
                reference.file_path.display(),
                symbol.start.row + 1,
            ));
        }

        Ok(ToolOutcome::ok_with(
            out,
            json!({ "matchCount": references.len() }),
        ))
    }
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
    async fn finds_symbols_by_name_and_pattern() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "export function fetchUser() {}\nexport function fetchOrder() {}\n",
        )
        .unwrap();
        let ctx = ctx_with_engine(dir.path()).await;

        let by_name = SymbolSearchTool
            .execute(json!({"name": "fetchUser"}), &ctx)
            .await
            .unwrap();
        assert_eq!(by_name.metadata["matchCount"], json!(1));

        let by_pattern = SymbolSearchTool
            .execute(json!({"pattern": "^fetch"}), &ctx)
            .await
            .unwrap();
        assert_eq!(by_pattern.metadata["matchCount"], json!(2));
    }

    #[tokio::test]
    async fn fails_gracefully_without_engine() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let outcome = SymbolSearchTool
            .execute(json!({"name": "x"}), &ctx)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not ready"));
    }
}
