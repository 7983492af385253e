use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct DependencyAnalyzerTool;

#[async_trait]
impl Tool for DependencyAnalyzerTool {
    fn name(&self) -> &str {
        "dependency_analyzer"
    }

    fn description(&self) -> &str {
        "Show what a file imports and what imports it, with impact analysis for a proposed change."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file": { "type": "string", "description": "File to analyze" },
                "files": { "type": "array", "items": { "type": "string" }, "description": "Multiple files to analyze" },
                "symbol": { "type": "string", "description": "Narrow the impact analysis to one symbol" }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let Some(engine) = ctx.engine.as_ref().filter(|e| e.is_ready()) else {
            return Ok(ToolOutcome::fail(
                "code intelligence engine is not ready; try again shortly",
            ));
        };

        let mut files: Vec<String> = Vec::new();
        if let Some(file) = args.get("file").and_then(|v| v.as_str()) {
            files.push(file.to_string());
        }
        if let Some(list) = args.get("files").and_then(|v| v.as_array()) {
            for item in list {
                if let Some(s) = item.as_str() {
                    files.push(s.to_string());
                }
            }
        }
        if files.is_empty() {
            let stats = engine.stats();
            return Ok(ToolOutcome::ok_with(
                format!(
                    "{} files indexed, {} symbols, {} dependency edges, {} file(s) with parse errors",
                    stats.files, stats.symbols, stats.dependency_edges, stats.files_with_parse_errors
                ),
                serde_json::to_value(&stats).unwrap_or(Value::Null),
            ));
        }

        let symbol = args.get("symbol").and_then(|v| v.as_str());
        let mut out = String::new();
        let mut max_risk = grok_engine::ImpactRisk::Low;

        for raw in &files {
            let path = ctx.resolve(raw);
            let deps = engine.get_dependencies(&path);
            let dependents = engine.get_dependents(&path);
            let report = engine.analyze_impact(&path, symbol);

            out.push_str(&format!("## {raw}\n"));
            out.push_str(&format!(
                "imports ({}): {}\n",
                deps.len(),
                join_paths(&deps)
            ));
            out.push_str(&format!(
                "imported by ({}): {}\n",
                dependents.len(),
                join_paths(&dependents)
            ));
            out.push_str(&format!(
                "impact: {} file(s) affected, risk {:?}\n",
                report.affected_files.len(),
                report.risk
            ));
            for warning in &report.warnings {
                out.push_str(&format!("warning: {warning}\n"));
            }
            max_risk = max_risk.max(report.risk);
        }

        Ok(ToolOutcome::ok_with(
            out,
            json!({ "files": files, "risk": max_risk }),
        ))
    }
}

fn join_paths(paths: &[std::path::PathBuf]) -> String {
    if paths.is_empty() {
        return "(none)".to_string();
    }
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
