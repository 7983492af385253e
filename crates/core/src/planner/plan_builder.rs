use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde_json::json;

use super::analyzer::{Intent, TaskAnalysis};
use super::risk;
use super::{PlanMetadata, PlanStatus, RiskLevel, StepType, TaskPlan, TaskStep};

fn endpoint_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/[A-Za-z0-9_\-]+(?:/:?[A-Za-z0-9_\-]+)*").expect("endpoint"))
}

fn http_verb(request: &str) -> Option<&'static str> {
    let lowered = request.to_lowercase();
    for verb in ["get", "post", "put", "delete", "patch"] {
        if lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word == verb)
        {
            return Some(match verb {
                "get" => "get",
                "post" => "post",
                "put" => "put",
                "delete" => "delete",
                _ => "patch",
            });
        }
    }
    None
}

/// HTTP-endpoint requests get a specialized expansion: route, controller,
/// service, import update.
fn detect_endpoint(request: &str) -> Option<EndpointSpec> {
    let lowered = request.to_lowercase();
    let keyword_hit =
        lowered.contains("endpoint") || lowered.contains("route") || lowered.contains("api");
    let path = endpoint_path_re().find(request).map(|m| m.as_str().to_string());
    let verb = http_verb(request)?;

    if !keyword_hit && path.is_none() {
        return None;
    }
    let path = path.unwrap_or_else(|| "/resource".to_string());
    let resource = path
        .split('/')
        .find(|seg| !seg.is_empty() && !seg.starts_with(':'))
        .unwrap_or("resource")
        .to_string();
    let by_id = path.contains(':');
    Some(EndpointSpec {
        verb: verb.to_string(),
        path,
        resource,
        by_id,
    })
}

struct EndpointSpec {
    verb: String,
    path: String,
    resource: String,
    by_id: bool,
}

impl EndpointSpec {
    fn controller_name(&self) -> String {
        let mut resource = self.resource.clone();
        if let Some(first) = resource.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let suffix = if self.by_id { "ById" } else { "" };
        format!("{}{}{}", self.verb, resource, suffix)
    }
}

fn step_duration(tool: &str) -> u64 {
    match tool {
        "code_context" => 2_000,
        "dependency_analyzer" => 3_000,
        "refactoring_assistant" => 5_000,
        "multi_file_edit" => 4_000,
        "code_analysis" => 2_500,
        "str_replace_editor" => 1_500,
        "bash" => 3_000,
        _ => 2_000,
    }
}

/// Synthesize a dependency-ordered plan for the analyzed request. Always
/// analyze first (when there is anything to analyze) and validate last.
pub fn build_plan(request: &str, analysis: &TaskAnalysis) -> TaskPlan {
    let mut steps: Vec<TaskStep> = Vec::new();
    let mut next_id = 0usize;
    let mut id_gen = || {
        next_id += 1;
        format!("step-{next_id}")
    };

    let scoped_files: Vec<String> = analysis
        .files
        .iter()
        .take(10)
        .map(|f| f.to_string_lossy().into_owned())
        .collect();

    let analyze_id = if scoped_files.is_empty() {
        None
    } else {
        let id = id_gen();
        steps.push(TaskStep::new(
            id.clone(),
            StepType::Analyze,
            format!("Analyze {} affected file(s)", scoped_files.len()),
            "code_context",
            json!({ "files": scoped_files }),
        ));
        Some(id)
    };
    let analyze_deps: Vec<&str> = analyze_id.iter().map(String::as_str).collect();

    match analysis.intent {
        Intent::Refactor => {
            let dep_id = id_gen();
            steps.push(
                TaskStep::new(
                    dep_id.clone(),
                    StepType::Analyze,
                    "Map dependencies of the refactoring surface",
                    "dependency_analyzer",
                    json!({ "files": scoped_files }),
                )
                .depends_on(&analyze_deps),
            );
            let refactor_id = id_gen();
            steps.push(
                TaskStep::new(
                    refactor_id.clone(),
                    StepType::Refactor,
                    "Produce the refactoring plan",
                    "refactoring_assistant",
                    json!({ "operation": "refactor", "request": request }),
                )
                .depends_on(&[dep_id.as_str()]),
            );
            let edit_id = id_gen();
            steps.push(
                TaskStep::new(
                    edit_id,
                    StepType::Refactor,
                    "Apply the plan and update imports",
                    "multi_file_edit",
                    json!({ "fromRefactoringPlan": true }),
                )
                .depends_on(&[refactor_id.as_str()]),
            );
        }
        Intent::Move => {
            let symbols: Vec<&String> = analysis.symbols.iter().take(5).collect();
            if symbols.is_empty() {
                let id = id_gen();
                steps.push(
                    TaskStep::new(
                        id,
                        StepType::Move,
                        "Move the requested symbol",
                        "refactoring_assistant",
                        json!({ "operation": "move_function", "request": request }),
                    )
                    .depends_on(&analyze_deps),
                );
            }
            for symbol in symbols {
                let id = id_gen();
                steps.push(
                    TaskStep::new(
                        id,
                        StepType::Move,
                        format!("Move `{symbol}`"),
                        "refactoring_assistant",
                        json!({ "operation": "move_function", "symbolName": symbol }),
                    )
                    .depends_on(&analyze_deps),
                );
            }
        }
        Intent::Extract => {
            let id = id_gen();
            steps.push(
                TaskStep::new(
                    id,
                    StepType::Refactor,
                    "Extract the selection into a function",
                    "refactoring_assistant",
                    json!({ "operation": "extract_function", "request": request }),
                )
                .depends_on(&analyze_deps),
            );
        }
        Intent::Rename => {
            let id = id_gen();
            steps.push(
                TaskStep::new(
                    id,
                    StepType::Refactor,
                    "Rename the symbol across its references",
                    "refactoring_assistant",
                    json!({ "operation": "rename", "request": request }),
                )
                .depends_on(&analyze_deps),
            );
        }
        Intent::Create | Intent::Implement => {
            if let Some(endpoint) = detect_endpoint(request) {
                let controller = endpoint.controller_name();
                let route_id = id_gen();
                steps.push(
                    TaskStep::new(
                        route_id.clone(),
                        StepType::Create,
                        format!("Register {} {} on the router", endpoint.verb, endpoint.path),
                        "str_replace_editor",
                        json!({ "routePath": endpoint.path, "verb": endpoint.verb }),
                    )
                    .depends_on(&analyze_deps),
                );
                let controller_id = id_gen();
                steps.push(
                    TaskStep::new(
                        controller_id.clone(),
                        StepType::Create,
                        format!("Add controller `{controller}`"),
                        "code_analysis",
                        json!({ "operation": "smart_insert", "functionName": controller }),
                    )
                    .depends_on(&[route_id.as_str()]),
                );
                let service_id = id_gen();
                steps.push(
                    TaskStep::new(
                        service_id.clone(),
                        StepType::Create,
                        "Add the backing service method",
                        "code_analysis",
                        json!({ "operation": "smart_insert", "kind": "service" }),
                    )
                    .depends_on(&[controller_id.as_str()]),
                );
                let import_id = id_gen();
                steps.push(
                    TaskStep::new(
                        import_id,
                        StepType::Create,
                        "Update imports for the new handler chain",
                        "multi_file_edit",
                        json!({ "updateImports": true }),
                    )
                    .depends_on(&[service_id.as_str()]),
                );
            } else {
                let id = id_gen();
                steps.push(
                    TaskStep::new(
                        id,
                        StepType::Create,
                        "Insert the new code at the best location",
                        "code_analysis",
                        json!({ "operation": "smart_insert", "request": request }),
                    )
                    .depends_on(&analyze_deps),
                );
            }
        }
        Intent::Remove => {
            let id = id_gen();
            steps.push(
                TaskStep::new(
                    id,
                    StepType::Delete,
                    "Delete the requested files/sections",
                    "multi_file_edit",
                    json!({
                        "operations": analysis
                            .files
                            .iter()
                            .map(|f| json!({ "type": "delete", "file_path": f.to_string_lossy() }))
                            .collect::<Vec<_>>()
                    }),
                )
                .depends_on(&analyze_deps),
            );
        }
        _ => {
            let id = id_gen();
            steps.push(
                TaskStep::new(
                    id,
                    StepType::Refactor,
                    "Apply the requested change",
                    "str_replace_editor",
                    json!({ "request": request }),
                )
                .depends_on(&analyze_deps),
            );
        }
    }

    let prior_ids: Vec<String> = steps.iter().map(|s| s.id.clone()).collect();
    let validate_id = id_gen();
    let mut validate = TaskStep::new(
        validate_id,
        StepType::Validate,
        "Validate the dependency graph after changes",
        "dependency_analyzer",
        json!({ "files": scoped_files }),
    );
    validate.dependencies = prior_ids;
    steps.push(validate);

    for step in &mut steps {
        step.estimated_duration_ms = step_duration(&step.tool);
        step.risk_level = risk::step_level(step);
    }
    let total: u64 = steps.iter().map(|s| s.estimated_duration_ms).sum();
    let overall = steps
        .iter()
        .map(|s| s.risk_level)
        .max()
        .unwrap_or(RiskLevel::Low);

    let tools_used: Vec<String> = {
        let mut tools: Vec<String> = steps.iter().map(|s| s.tool.clone()).collect();
        tools.sort();
        tools.dedup();
        tools
    };

    TaskPlan {
        id: uuid::Uuid::new_v4().to_string(),
        user_intent: request.to_string(),
        description: format!("{:?} task over {} file(s)", analysis.intent, analysis.files.len()),
        steps,
        total_estimated_duration_ms: total,
        overall_risk: overall,
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        status: PlanStatus::Draft,
        metadata: PlanMetadata {
            files_affected: analysis
                .files
                .iter()
                .map(|f| f.to_string_lossy().into_owned())
                .collect(),
            tools_used,
            dependencies_analyzed: true,
            risks_assessed: true,
        },
    }
}
