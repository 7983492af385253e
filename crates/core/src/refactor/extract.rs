use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use crate::edit::globals::is_global_identifier;

use super::{
    ChangeKind, RefactoringFileChange, RefactoringOperation, RiskLevel, SafetyAnalysis,
    TextChange,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredParameter {
    pub name: String,
    pub inferred_type: String,
}

#[derive(Debug, Clone)]
pub struct ExtractFunctionPlan {
    pub operation: RefactoringOperation,
    pub parameters: Vec<InferredParameter>,
    pub return_type: String,
    pub external_references: Vec<String>,
    pub confidence: f64,
}

/// Extract the selected lines into a new function. Parameters and return
/// type are inferred by parsing the selection as a synthetic function body;
/// the caller may override both.
#[allow(clippy::too_many_arguments)]
pub fn extract_function(
    file_path: &Path,
    source: &str,
    file_symbols: &[String],
    start_line: usize,
    end_line: usize,
    function_name: &str,
    parameters: Option<Vec<String>>,
    return_type: Option<String>,
) -> Result<ExtractFunctionPlan> {
    let lines: Vec<&str> = source.lines().collect();
    if start_line > end_line || end_line >= lines.len() {
        anyhow::bail!(
            "selection {}..{} is out of range (file has {} lines)",
            start_line,
            end_line,
            lines.len()
        );
    }
    let selection = lines[start_line..=end_line].join("\n");

    let analysis = analyze_selection(&selection, file_symbols);

    let inferred_params: Vec<InferredParameter> = match &parameters {
        Some(explicit) => explicit
            .iter()
            .map(|name| InferredParameter {
                name: name.clone(),
                inferred_type: "any".to_string(),
            })
            .collect(),
        None => analysis.parameters.clone(),
    };
    let ret = return_type.unwrap_or_else(|| analysis.return_type.clone());

    let mut confidence: f64 = if analysis.parsed { 0.5 } else { 0.3 };
    if analysis.parsed {
        if analysis.has_return {
            confidence += 0.1;
        }
        if !inferred_params.is_empty() {
            confidence += 0.1;
        }
        if analysis.has_locals {
            confidence += 0.1;
        }
        if ret != "any" {
            confidence += 0.15;
        }
        if analysis.external_references.len() > 3 {
            confidence -= 0.1;
        }
    }
    let confidence = confidence.clamp(0.1, 1.0);

    let risk = if confidence > 0.8 && analysis.external_references.is_empty() {
        RiskLevel::Low
    } else if confidence < 0.5 || analysis.external_references.len() > 3 {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    };

    let mut warnings = Vec::new();
    for name in &analysis.external_references {
        warnings.push(format!(
            "`{name}` refers to a file-level symbol; it is not parameterized"
        ));
    }

    let indent: String = lines[start_line]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    let typed = file_path
        .extension()
        .is_some_and(|ext| ext == "ts" || ext == "tsx");

    let param_list = inferred_params
        .iter()
        .map(|p| {
            if typed && p.inferred_type != "any" {
                format!("{}: {}", p.name, p.inferred_type)
            } else {
                p.name.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    let arg_list = inferred_params
        .iter()
        .map(|p| p.name.clone())
        .collect::<Vec<_>>()
        .join(", ");

    let call_site = if ret == "void" {
        format!("{indent}{function_name}({arg_list});")
    } else {
        format!("{indent}const result = {function_name}({arg_list});")
    };

    let signature = if typed && ret != "any" {
        format!("{indent}function {function_name}({param_list}): {ret} {{")
    } else {
        format!("{indent}function {function_name}({param_list}) {{")
    };
    let mut definition = String::new();
    definition.push('\n');
    definition.push_str(&signature);
    definition.push('\n');
    for line in selection.lines() {
        definition.push_str(&format!("{indent}  {}\n", line.trim_start()));
    }
    definition.push_str(&format!("{indent}}}"));

    let selection_end_col = lines[end_line].chars().count();
    let changes = vec![
        TextChange {
            start_line,
            start_column: 0,
            end_line,
            end_column: selection_end_col,
            old_text: selection.clone(),
            new_text: call_site.clone(),
            kind: ChangeKind::Replace,
        },
        // Inserted immediately after the (replaced) selection; the caller
        // may relocate it later.
        TextChange {
            start_line: end_line + 1,
            start_column: 0,
            end_line: end_line + 1,
            end_column: 0,
            old_text: String::new(),
            new_text: definition.clone(),
            kind: ChangeKind::Insert,
        },
    ];

    let preview = format!("{call_site}\n{definition}");
    let occurrences = inferred_params.len();

    Ok(ExtractFunctionPlan {
        operation: RefactoringOperation {
            operation: "extract_function".to_string(),
            description: format!(
                "Extract lines {}-{} into `{function_name}`",
                start_line + 1,
                end_line + 1
            ),
            files: vec![RefactoringFileChange {
                file_path: file_path.to_path_buf(),
                changes,
            }],
            preview,
            safety: SafetyAnalysis {
                risk,
                warnings,
                affected_files: 1,
                occurrences,
            },
        },
        parameters: inferred_params,
        return_type: ret,
        external_references: analysis.external_references,
        confidence,
    })
}

/// Extract an expression into a `const` binding inserted above the
/// selection at the same indentation; the selection itself becomes the new
/// name.
pub fn extract_variable(
    file_path: &Path,
    source: &str,
    start_line: usize,
    start_column: usize,
    end_column: usize,
    variable_name: &str,
) -> Result<RefactoringOperation> {
    let lines: Vec<&str> = source.lines().collect();
    let Some(line) = lines.get(start_line) else {
        anyhow::bail!("line {start_line} is out of range");
    };
    let chars: Vec<char> = line.chars().collect();
    if start_column >= end_column || end_column > chars.len() {
        anyhow::bail!("selection columns {start_column}..{end_column} are out of range");
    }
    let expression: String = chars[start_column..end_column].iter().collect();
    let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();

    let binding = format!("{indent}const {variable_name} = {expression};");
    let changes = vec![
        TextChange {
            start_line,
            start_column: 0,
            end_line: start_line,
            end_column: 0,
            old_text: String::new(),
            new_text: binding.clone(),
            kind: ChangeKind::Insert,
        },
        TextChange {
            start_line,
            start_column,
            end_line: start_line,
            end_column,
            old_text: expression.clone(),
            new_text: variable_name.to_string(),
            kind: ChangeKind::Replace,
        },
    ];

    Ok(RefactoringOperation {
        operation: "extract_variable".to_string(),
        description: format!("Extract `{expression}` into `{variable_name}`"),
        files: vec![RefactoringFileChange {
            file_path: file_path.to_path_buf(),
            changes,
        }],
        preview: format!("{binding}\n{indent}… {variable_name} …"),
        safety: SafetyAnalysis {
            risk: RiskLevel::Low,
            warnings: Vec::new(),
            affected_files: 1,
            occurrences: 1,
        },
    })
}

struct SelectionAnalysis {
    parsed: bool,
    parameters: Vec<InferredParameter>,
    external_references: Vec<String>,
    return_type: String,
    has_return: bool,
    has_locals: bool,
}

/// Parse the selection as `function __temp__() { … }` and classify every
/// used-but-not-declared identifier. Falls back to a regex return scan when
/// the tolerant parse still fails outright.
fn analyze_selection(selection: &str, file_symbols: &[String]) -> SelectionAnalysis {
    let synthetic = format!("function __temp__() {{\n{selection}\n}}");
    let tree = js_parser().and_then(|mut p| p.parse(&synthetic, None));

    let Some(tree) = tree else {
        return fallback_analysis(selection);
    };

    let mut declared: BTreeSet<String> = BTreeSet::new();
    let mut used: Vec<String> = Vec::new();
    let mut returns: Vec<String> = Vec::new();
    collect_identifiers(
        tree.root_node(),
        &synthetic,
        &mut declared,
        &mut used,
        &mut returns,
    );
    declared.insert("__temp__".to_string());

    let mut parameters = Vec::new();
    let mut external = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for name in used {
        if declared.contains(&name) || !seen.insert(name.clone()) {
            continue;
        }
        if is_global_identifier(&name) {
            continue;
        }
        if file_symbols.iter().any(|s| s == &name) {
            external.push(name);
        } else {
            let inferred_type = infer_usage_type(&name, selection);
            parameters.push(InferredParameter {
                name,
                inferred_type,
            });
        }
    }

    let has_return = !returns.is_empty();
    let return_type = infer_return_type(&returns, tree.root_node(), &synthetic);

    SelectionAnalysis {
        parsed: true,
        parameters,
        external_references: external,
        return_type,
        has_return,
        has_locals: declared.len() > 1,
    }
}

fn js_parser() -> Option<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_javascript::LANGUAGE.into())
        .ok()?;
    Some(parser)
}

fn node_text<'a>(node: Node<'a>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn collect_identifiers(
    node: Node,
    source: &str,
    declared: &mut BTreeSet<String>,
    used: &mut Vec<String>,
    returns: &mut Vec<String>,
) {
    match node.kind() {
        "variable_declarator" | "function_declaration" => {
            if let Some(name) = node.child_by_field_name("name") {
                if name.kind() == "identifier" {
                    declared.insert(node_text(name, source).to_string());
                }
            }
        }
        "formal_parameters" => {
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                if child.kind() == "identifier" {
                    declared.insert(node_text(child, source).to_string());
                }
            }
        }
        "arrow_function" => {
            if let Some(param) = node.child_by_field_name("parameter") {
                if param.kind() == "identifier" {
                    declared.insert(node_text(param, source).to_string());
                }
            }
        }
        "return_statement" => {
            if let Some(value) = node.named_child(0) {
                returns.push(node_text(value, source).to_string());
            } else {
                returns.push(String::new());
            }
        }
        "identifier" => {
            used.push(node_text(node, source).to_string());
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_identifiers(child, source, declared, used, returns);
    }
}

/// Shallow usage-pattern inference over the raw selection text.
fn infer_usage_type(name: &str, selection: &str) -> String {
    let escaped = regex::escape(name);
    let probes: [(&str, &str); 6] = [
        (r"\.(?:map|filter|forEach)\s*\(", "any[]"),
        (r"\.(?:toString|toLowerCase|toUpperCase)\s*\(", "string"),
        (r"\.(?:toFixed|toPrecision)\s*\(", "number"),
        (r"\s*[-+*/%]\s*\d", "number"),
        (r#"\s*\+\s*['"`]"#, "string"),
        (r"\s*(?:&&|\|\|)", "boolean"),
    ];
    for (suffix, ty) in probes {
        if regex::Regex::new(&format!(r"\b{escaped}{suffix}"))
            .map(|re| re.is_match(selection))
            .unwrap_or(false)
        {
            return ty.to_string();
        }
    }
    if regex::Regex::new(&format!(r"!\s*{escaped}\b"))
        .map(|re| re.is_match(selection))
        .unwrap_or(false)
    {
        return "boolean".to_string();
    }
    "any".to_string()
}

fn infer_return_type(returns: &[String], root: Node, synthetic: &str) -> String {
    if returns.is_empty() {
        return "void".to_string();
    }

    // Classify by the first return statement's value node.
    let mut found = None;
    find_first_return(root, &mut found);
    let Some(value) = found else {
        return "any".to_string();
    };

    match value.kind() {
        "number" => "number".to_string(),
        "string" | "template_string" => "string".to_string(),
        "true" | "false" => "boolean".to_string(),
        "object" => "object".to_string(),
        "array" => "any[]".to_string(),
        "identifier" => {
            let name = node_text(value, synthetic);
            infer_local_type(root, synthetic, name)
        }
        _ => "any".to_string(),
    }
}

fn find_first_return<'a>(node: Node<'a>, out: &mut Option<Node<'a>>) {
    if out.is_some() {
        return;
    }
    if node.kind() == "return_statement" {
        *out = node.named_child(0);
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        find_first_return(child, out);
    }
}

/// For `return x` where x is declared locally, read the declarator's
/// initializer.
fn infer_local_type(root: Node, source: &str, name: &str) -> String {
    let mut found = "any".to_string();
    find_declarator_type(root, source, name, &mut found);
    found
}

fn find_declarator_type(node: Node, source: &str, name: &str, out: &mut String) {
    if node.kind() == "variable_declarator" {
        let declared = node
            .child_by_field_name("name")
            .map(|n| node_text(n, source));
        if declared == Some(name) {
            if let Some(value) = node.child_by_field_name("value") {
                *out = match value.kind() {
                    "number" => "number".to_string(),
                    "string" | "template_string" => "string".to_string(),
                    "true" | "false" => "boolean".to_string(),
                    "object" => "object".to_string(),
                    "array" => "any[]".to_string(),
                    _ => "any".to_string(),
                };
            }
            return;
        }
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        find_declarator_type(child, source, name, out);
    }
}

fn fallback_analysis(selection: &str) -> SelectionAnalysis {
    let has_return = regex::Regex::new(r"\breturn\b")
        .map(|re| re.is_match(selection))
        .unwrap_or(false);
    SelectionAnalysis {
        parsed: false,
        parameters: Vec::new(),
        external_references: Vec::new(),
        return_type: if has_return { "any" } else { "void" }.to_string(),
        has_return,
        has_locals: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(
        source: &str,
        symbols: &[&str],
        start: usize,
        end: usize,
    ) -> ExtractFunctionPlan {
        extract_function(
            Path::new("a.ts"),
            source,
            &symbols.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            start,
            end,
            "extracted",
            None,
            None,
        )
        .unwrap()
    }

    #[test]
    fn local_integer_return_infers_number_with_high_confidence() {
        let source = "function outer() {\n  const count = 42;\n  return count;\n}\n";
        let result = plan(source, &[], 1, 2);
        assert_eq!(result.return_type, "number");
        assert!(result.confidence >= 0.7, "confidence {}", result.confidence);
        assert_eq!(result.operation.safety.risk, RiskLevel::Low);
    }

    #[test]
    fn undeclared_identifiers_become_parameters() {
        let source = "const r = items.map(i => i.price);\nconst label = name + 'x';\n";
        let result = plan(source, &[], 0, 1);
        let names: Vec<&str> = result.parameters.iter().map(|p| p.name.as_str()).collect();
        assert!(names.contains(&"items"));
        assert!(names.contains(&"name"));

        let items = result
            .parameters
            .iter()
            .find(|p| p.name == "items")
            .unwrap();
        assert_eq!(items.inferred_type, "any[]");
        let name = result.parameters.iter().find(|p| p.name == "name").unwrap();
        assert_eq!(name.inferred_type, "string");
    }

    #[test]
    fn file_symbols_become_external_references_not_parameters() {
        let source = "const v = helper(1);\n";
        let result = plan(source, &["helper"], 0, 0);
        assert_eq!(result.external_references, vec!["helper"]);
        assert!(result.parameters.is_empty());
        assert!(result
            .operation
            .safety
            .warnings
            .iter()
            .any(|w| w.contains("helper")));
    }

    #[test]
    fn globals_are_ignored() {
        let source = "console.log(JSON.stringify(payload));\n";
        let result = plan(source, &[], 0, 0);
        let names: Vec<&str> = result.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["payload"]);
    }

    #[test]
    fn no_return_means_void() {
        let source = "doWork();\n";
        let result = plan(source, &["doWork"], 0, 0);
        assert_eq!(result.return_type, "void");
        // Void call sites do not bind a result.
        assert!(result.operation.preview.contains("extracted();"));
        assert!(!result.operation.preview.contains("const result"));
    }

    #[test]
    fn string_literal_return_infers_string() {
        let source = "return 'done';\n";
        let result = plan(source, &[], 0, 0);
        assert_eq!(result.return_type, "string");
    }

    #[test]
    fn explicit_parameters_override_inference() {
        let source = "const y = a + b;\n";
        let result = extract_function(
            Path::new("a.ts"),
            source,
            &[],
            0,
            0,
            "calc",
            Some(vec!["a".into(), "b".into()]),
            Some("number".into()),
        )
        .unwrap();
        assert_eq!(result.parameters.len(), 2);
        assert_eq!(result.return_type, "number");
    }

    #[test]
    fn emits_replace_then_insert() {
        let source = "const z = 1;\nconst w = z + 1;\n";
        let result = plan(source, &[], 0, 1);
        let changes = &result.operation.files[0].changes;
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].kind, ChangeKind::Replace);
        assert_eq!(changes[1].kind, ChangeKind::Insert);
        assert!(changes[1].new_text.contains("function extracted"));
    }

    #[test]
    fn extract_variable_inserts_binding_above() {
        let source = "  const total = price * quantity + tax;\n";
        let op = extract_variable(Path::new("a.ts"), source, 0, 16, 32, "subtotal").unwrap();
        let applied =
            crate::refactor::apply_changes_to_content(source, &op.files[0].changes).unwrap();
        assert_eq!(
            applied,
            "  const subtotal = price * quantity;\n  const total = subtotal + tax;\n"
        );
    }

    #[test]
    fn out_of_range_selection_errors() {
        assert!(extract_function(
            Path::new("a.ts"),
            "one line\n",
            &[],
            0,
            5,
            "f",
            None,
            None
        )
        .is_err());
    }
}
