use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::planner::{analyzer, plan_builder, risk, validation};

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

pub struct TaskPlannerTool;

#[async_trait]
impl Tool for TaskPlannerTool {
    fn name(&self) -> &str {
        "task_planner"
    }

    fn description(&self) -> &str {
        "Analyze a high-level request and produce a dependency-ordered plan of tool calls \
         with per-step risk and duration estimates."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "request": { "type": "string", "description": "The task to plan" },
                "allowRiskyOperations": { "type": "boolean", "default": false },
                "maxSteps": { "type": "integer", "default": 50 }
            },
            "required": ["request"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let request = args
            .get("request")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let engine = ctx.engine.as_ref().filter(|e| e.is_ready());
        let analysis = analyzer::analyze(request, engine.map(|e| e.as_ref()));
        let mut plan = plan_builder::build_plan(request, &analysis);
        let assessment = risk::assess_plan(&mut plan);

        let options = validation::PlannerOptions {
            max_steps: args
                .get("maxSteps")
                .and_then(|v| v.as_u64())
                .map(|n| n as usize)
                .unwrap_or(50),
            allow_risky_operations: args
                .get("allowRiskyOperations")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..Default::default()
        };
        let report = validation::validate(&mut plan, &options);

        let mut out = plan.render_preview();
        out.push_str(&format!(
            "\nestimated success rate: {}%\n",
            report.estimated_success_rate
        ));
        for error in &report.errors {
            out.push_str(&format!("error: {error}\n"));
        }
        for warning in &report.warnings {
            out.push_str(&format!("warning: {warning}\n"));
        }
        for mitigation in &assessment.mitigations {
            out.push_str(&format!("mitigation: {mitigation}\n"));
        }

        Ok(ToolOutcome {
            success: report.valid,
            output: Some(out),
            error: (!report.valid).then(|| report.errors.join("; ")),
            metadata: json!({
                "plan": serde_json::to_value(&plan).unwrap_or(Value::Null),
                "validation": serde_json::to_value(&report).unwrap_or(Value::Null),
                "analysis": serde_json::to_value(&analysis).unwrap_or(Value::Null),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn plans_a_refactor_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());

        let outcome = TaskPlannerTool
            .execute(json!({"request": "refactor src/cart.ts"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.error);

        let plan = &outcome.metadata["plan"];
        assert_eq!(plan["status"], json!("validated"));
        let steps = plan["steps"].as_array().unwrap();
        assert!(steps.len() >= 3);
        assert_eq!(steps.first().unwrap()["step_type"], json!("analyze"));
        assert_eq!(steps.last().unwrap()["step_type"], json!("validate"));
    }
}
