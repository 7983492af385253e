use std::collections::{HashMap, HashSet};

use serde::Serialize;

use super::{PlanStatus, RiskLevel, TaskPlan};

#[derive(Debug, Clone)]
pub struct PlannerOptions {
    pub max_steps: usize,
    pub allow_risky_operations: bool,
    pub max_duration_ms: u64,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_steps: 50,
            allow_risky_operations: false,
            max_duration_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_success_rate: u8,
    pub valid: bool,
}

/// Structural validation plus a success-rate estimate. A plan is valid iff
/// it produced no errors; callers flip it to `Validated` on success.
pub fn validate(plan: &mut TaskPlan, options: &PlannerOptions) -> PlanValidation {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if plan.steps.len() > options.max_steps {
        errors.push(format!(
            "plan has {} steps (limit {})",
            plan.steps.len(),
            options.max_steps
        ));
    }

    if !options.allow_risky_operations
        && plan.steps.iter().any(|s| s.risk_level == RiskLevel::Critical)
    {
        errors.push("plan contains critical-risk steps and risky operations are not allowed".into());
    }

    let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
    for step in &plan.steps {
        for dep in &step.dependencies {
            if dep == &step.id {
                errors.push(format!("step {} depends on itself", step.id));
            } else if !ids.contains(dep.as_str()) {
                errors.push(format!("step {} depends on unknown step {dep}", step.id));
            }
        }
    }

    if has_cycle(plan) {
        errors.push("step dependencies form a cycle".into());
    }

    if plan.total_estimated_duration_ms > options.max_duration_ms {
        warnings.push(format!(
            "estimated duration {}s exceeds the {}s limit",
            plan.total_estimated_duration_ms / 1000,
            options.max_duration_ms / 1000
        ));
    }
    if plan.overall_risk >= RiskLevel::High {
        warnings.push("overall risk is high; consider narrowing the request".into());
    }
    if plan.steps.len() > 10 {
        warnings.push("more than 10 steps; consider splitting the task".into());
    }

    let mut rate: i32 = 100;
    rate -= 20 * errors.len() as i32;
    rate -= 5 * warnings.len() as i32;
    rate -= match plan.overall_risk {
        RiskLevel::Critical => 30,
        RiskLevel::High => 15,
        RiskLevel::Medium => 5,
        RiskLevel::Low => 0,
    };
    let estimated_success_rate = rate.clamp(0, 100) as u8;

    let valid = errors.is_empty();
    if valid && plan.status == PlanStatus::Draft {
        plan.status = PlanStatus::Validated;
    }

    PlanValidation {
        errors,
        warnings,
        estimated_success_rate,
        valid,
    }
}

fn has_cycle(plan: &TaskPlan) -> bool {
    let index: HashMap<&str, &super::TaskStep> =
        plan.steps.iter().map(|s| (s.id.as_str(), s)).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        id: &'a str,
        index: &HashMap<&'a str, &'a super::TaskStep>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(id) {
            Some(Mark::Visiting) => return true,
            Some(Mark::Done) => return false,
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        if let Some(step) = index.get(id) {
            for dep in &step.dependencies {
                if index.contains_key(dep.as_str()) && visit(dep, index, marks) {
                    return true;
                }
            }
        }
        marks.insert(id, Mark::Done);
        false
    }

    plan.steps
        .iter()
        .any(|s| visit(s.id.as_str(), &index, &mut marks))
}

#[cfg(test)]
mod tests {
    use super::super::{analyzer, plan_builder, StepType, TaskStep};
    use super::*;
    use serde_json::json;

    fn sample_plan() -> TaskPlan {
        plan_builder::build_plan(
            "refactor src/cart.ts",
            &analyzer::analyze("refactor src/cart.ts", None),
        )
    }

    #[test]
    fn well_formed_plan_validates() {
        let mut plan = sample_plan();
        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(report.valid, "errors: {:?}", report.errors);
        assert_eq!(plan.status, PlanStatus::Validated);
        assert!(report.estimated_success_rate <= 100);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut plan = sample_plan();
        let id = plan.steps[0].id.clone();
        plan.steps[0].dependencies.push(id);
        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("itself")));
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let mut plan = sample_plan();
        plan.steps[1].dependencies.push("step-999".into());
        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("unknown step")));
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let mut plan = sample_plan();
        let (a, b) = (plan.steps[0].id.clone(), plan.steps[1].id.clone());
        plan.steps[0].dependencies.push(b);
        assert!(plan.steps[1].dependencies.contains(&a));
        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("cycle")));
    }

    #[test]
    fn critical_steps_require_opt_in() {
        let mut plan = sample_plan();
        let mut step = TaskStep::new("danger", StepType::Delete, "wipe", "multi_file_edit", json!({}));
        step.risk_level = RiskLevel::Critical;
        plan.steps.push(step);

        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(!report.valid);

        // The validate-last invariant is the builder's concern; here the
        // opt-in flag alone decides.
        plan.status = PlanStatus::Draft;
        let relaxed = validate(
            &mut plan,
            &PlannerOptions {
                allow_risky_operations: true,
                ..Default::default()
            },
        );
        assert!(relaxed.errors.iter().all(|e| !e.contains("critical")));
    }

    #[test]
    fn step_count_limit_is_enforced() {
        let mut plan = sample_plan();
        for i in 0..60 {
            plan.steps.push(TaskStep::new(
                format!("extra-{i}"),
                StepType::Analyze,
                "noise",
                "code_context",
                json!({}),
            ));
        }
        let report = validate(&mut plan, &PlannerOptions::default());
        assert!(!report.valid);
        assert!(report.warnings.iter().any(|w| w.contains("splitting")));
    }

    #[test]
    fn success_rate_degrades_with_errors_and_risk() {
        let mut plan = sample_plan();
        let clean = validate(&mut plan, &PlannerOptions::default());

        let mut broken = sample_plan();
        broken.steps[1].dependencies.push("step-404".into());
        let degraded = validate(&mut broken, &PlannerOptions::default());
        assert!(degraded.estimated_success_rate < clean.estimated_success_rate);
    }
}
