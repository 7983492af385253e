use serde::Serialize;

use super::{RiskLevel, StepType, TaskPlan, TaskStep};

/// Baseline risk for the tool a step invokes.
pub fn tool_base_risk(tool: &str) -> u32 {
    match tool {
        "bash" => 50,
        "multi_file_edit" => 40,
        "refactoring_assistant" => 30,
        "code_analysis" => 20,
        "str_replace_editor" => 15,
        // Read-only analysis tools.
        _ => 5,
    }
}

pub fn operation_risk(step_type: StepType) -> u32 {
    match step_type {
        StepType::Delete => 50,
        StepType::Move => 30,
        StepType::Refactor => 25,
        StepType::Create => 10,
        StepType::Analyze | StepType::Validate | StepType::Test | StepType::Document => 0,
    }
}

pub fn score_to_level(score: u32) -> RiskLevel {
    match score {
        70.. => RiskLevel::Critical,
        50..=69 => RiskLevel::High,
        30..=49 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

pub fn step_score(step: &TaskStep) -> u32 {
    let dependency_bonus = if step.dependencies.len() > 5 { 10 } else { 0 };
    tool_base_risk(&step.tool) + operation_risk(step.step_type) + dependency_bonus
}

pub fn step_level(step: &TaskStep) -> RiskLevel {
    score_to_level(step_score(step))
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskAssessment {
    pub step_scores: Vec<(String, u32)>,
    pub plan_score: u32,
    pub level: RiskLevel,
    pub mitigations: Vec<String>,
}

/// Score every step, set its level, and derive the plan level from the
/// average step score.
pub fn assess_plan(plan: &mut TaskPlan) -> RiskAssessment {
    let mut step_scores = Vec::with_capacity(plan.steps.len());
    for step in &mut plan.steps {
        let score = step_score(step);
        step.risk_level = score_to_level(score);
        step_scores.push((step.id.clone(), score));
    }

    let plan_score = if step_scores.is_empty() {
        0
    } else {
        step_scores.iter().map(|(_, s)| s).sum::<u32>() / step_scores.len() as u32
    };
    let level = score_to_level(plan_score);
    plan.overall_risk = level.max(
        plan.steps
            .iter()
            .map(|s| s.risk_level)
            .max()
            .unwrap_or(RiskLevel::Low),
    );

    let mut mitigations = Vec::new();
    if plan.steps.iter().any(|s| s.step_type == StepType::Delete) {
        mitigations.push("Create backup before proceeding".to_string());
    }
    if plan.steps.iter().any(|s| s.tool == "multi_file_edit") {
        mitigations.push("Use transaction support with rollback".to_string());
    }
    if plan.steps.iter().any(|s| s.tool == "bash") {
        mitigations.push("Review shell commands before execution".to_string());
    }
    if matches!(level, RiskLevel::High | RiskLevel::Critical) {
        mitigations.push("Execute steps individually and verify each result".to_string());
    }

    RiskAssessment {
        step_scores,
        plan_score,
        level,
        mitigations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(tool: &str, step_type: StepType, deps: usize) -> TaskStep {
        let mut s = TaskStep::new("s", step_type, "d", tool, json!({}));
        s.dependencies = (0..deps).map(|i| format!("p{i}")).collect();
        s
    }

    #[test]
    fn score_thresholds() {
        assert_eq!(score_to_level(75), RiskLevel::Critical);
        assert_eq!(score_to_level(70), RiskLevel::Critical);
        assert_eq!(score_to_level(69), RiskLevel::High);
        assert_eq!(score_to_level(50), RiskLevel::High);
        assert_eq!(score_to_level(49), RiskLevel::Medium);
        assert_eq!(score_to_level(30), RiskLevel::Medium);
        assert_eq!(score_to_level(29), RiskLevel::Low);
    }

    #[test]
    fn delete_via_multi_file_edit_is_critical() {
        let s = step("multi_file_edit", StepType::Delete, 0);
        assert_eq!(step_score(&s), 90);
        assert_eq!(step_level(&s), RiskLevel::Critical);
    }

    #[test]
    fn read_only_analysis_is_low() {
        let s = step("dependency_analyzer", StepType::Analyze, 0);
        assert_eq!(step_score(&s), 5);
        assert_eq!(step_level(&s), RiskLevel::Low);
    }

    #[test]
    fn heavy_dependency_fanin_adds_ten() {
        let s = step("dependency_analyzer", StepType::Analyze, 6);
        assert_eq!(step_score(&s), 15);
    }

    #[test]
    fn assessment_produces_mitigations() {
        let mut plan = crate::planner::plan_builder::build_plan(
            "remove legacy.ts",
            &crate::planner::analyzer::analyze("remove legacy.ts", None),
        );
        let assessment = assess_plan(&mut plan);
        assert!(assessment
            .mitigations
            .contains(&"Create backup before proceeding".to_string()));
        assert!(assessment
            .mitigations
            .contains(&"Use transaction support with rollback".to_string()));
        assert!(!assessment.step_scores.is_empty());
    }
}
