use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use grok_engine::{CodeIntelligenceEngine, SymbolKind, UsageKind};

use super::{
    ChangeKind, RefactoringFileChange, RefactoringOperation, RiskLevel, SafetyAnalysis,
    TextChange,
};

fn single_return_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*return\s+(.+?);?\s*$").expect("return pattern"))
}

/// Replace every call site with the function body specialized with argument
/// substitution, then remove the definition. Single-`return` bodies inline
/// as parenthesized expressions; statement bodies only inline into
/// standalone call statements.
pub fn inline_function(
    engine: &CodeIntelligenceEngine,
    symbol_name: &str,
    preserve_comments: bool,
) -> Result<RefactoringOperation> {
    let refs = engine.find_symbol(symbol_name);
    let definition = refs
        .iter()
        .find(|r| r.symbol.kind == SymbolKind::Function)
        .ok_or_else(|| anyhow::anyhow!("function `{symbol_name}` not found in the index"))?;

    let def_source = engine
        .file_source(&definition.file_path)
        .ok_or_else(|| anyhow::anyhow!("definition file is not indexed"))?;
    let def_lines: Vec<&str> = def_source.lines().collect();

    let params: Vec<String> = definition
        .symbol
        .parameters
        .iter()
        .map(|p| p.name.clone())
        .collect();

    let body_lines = function_body_lines(
        &def_lines,
        definition.symbol.start.row,
        definition.symbol.end.row,
    )?;
    let single_expr = if body_lines.len() == 1 {
        single_return_re()
            .captures(&body_lines[0])
            .map(|c| c[1].to_string())
    } else {
        None
    };

    let xref = engine
        .find_references(symbol_name)
        .ok_or_else(|| anyhow::anyhow!("no references for `{symbol_name}`"))?;

    let call_re = Regex::new(&format!(
        r"{}\s*\(([^()]*)\)",
        regex::escape(symbol_name)
    ))?;

    let mut changes_by_file: BTreeMap<PathBuf, Vec<TextChange>> = BTreeMap::new();
    let mut warnings = Vec::new();
    let mut inlined = 0usize;

    for site in xref
        .references
        .iter()
        .filter(|r| r.kind == UsageKind::Call)
    {
        let Some(site_source) = engine.file_source(&site.file_path) else {
            continue;
        };
        let Some(line) = site_source.lines().nth(site.line) else {
            continue;
        };
        let Some(caps) = call_re.captures(line) else {
            warnings.push(format!(
                "{}:{}: call shape too complex to inline (nested parentheses)",
                site.file_path.display(),
                site.line + 1
            ));
            continue;
        };
        let whole = caps.get(0).expect("call span");
        let args: Vec<String> = split_arguments(&caps[1]);

        if let Some(expr) = &single_expr {
            let substituted = substitute(expr, &params, &args);
            changes_by_file
                .entry(site.file_path.clone())
                .or_default()
                .push(TextChange {
                    start_line: site.line,
                    start_column: whole.start(),
                    end_line: site.line,
                    end_column: whole.end(),
                    old_text: whole.as_str().to_string(),
                    new_text: format!("({substituted})"),
                    kind: ChangeKind::Replace,
                });
            inlined += 1;
        } else {
            // Statement bodies only fit where the call is the whole statement.
            let is_standalone = line.trim() == format!("{};", whole.as_str())
                || line.trim() == whole.as_str();
            if !is_standalone {
                warnings.push(format!(
                    "{}:{}: multi-statement body not inlined into an expression context",
                    site.file_path.display(),
                    site.line + 1
                ));
                continue;
            }
            let indent: String = line.chars().take_while(|c| c.is_whitespace()).collect();
            let block = body_lines
                .iter()
                .map(|body_line| format!("{indent}{}", substitute(body_line.trim(), &params, &args)))
                .collect::<Vec<_>>()
                .join("\n");
            changes_by_file
                .entry(site.file_path.clone())
                .or_default()
                .push(TextChange {
                    start_line: site.line,
                    start_column: 0,
                    end_line: site.line,
                    end_column: line.chars().count(),
                    old_text: line.to_string(),
                    new_text: block,
                    kind: ChangeKind::Replace,
                });
            inlined += 1;
        }
    }

    // Remove the definition (optionally keeping its leading comments).
    let def_start = if preserve_comments {
        definition.symbol.start.row
    } else {
        super::move_symbol::extend_over_leading_comments(&def_lines, definition.symbol.start.row)
    };
    let def_end = definition.symbol.end.row.min(def_lines.len().saturating_sub(1));
    changes_by_file
        .entry(definition.file_path.clone())
        .or_default()
        .push(TextChange {
            start_line: def_start,
            start_column: 0,
            end_line: def_end,
            end_column: def_lines[def_end].chars().count(),
            old_text: def_lines[def_start..=def_end].join("\n"),
            new_text: String::new(),
            kind: ChangeKind::Delete,
        });

    let files: Vec<RefactoringFileChange> = changes_by_file
        .into_iter()
        .map(|(file_path, changes)| RefactoringFileChange { file_path, changes })
        .collect();
    let affected_files = files.len();

    Ok(RefactoringOperation {
        operation: "inline_function".to_string(),
        description: format!("Inline `{symbol_name}` at {inlined} call site(s)"),
        preview: format!(
            "inline `{symbol_name}` into {inlined} call site(s), remove definition"
        ),
        files,
        safety: SafetyAnalysis {
            risk: RiskLevel::High,
            warnings,
            affected_files,
            occurrences: inlined,
        },
    })
}

/// Lines strictly between the function's opening `{` line and closing line.
fn function_body_lines(
    lines: &[&str],
    start_row: usize,
    end_row: usize,
) -> Result<Vec<String>> {
    if end_row <= start_row + 1 {
        // Single-line function: take the text between the braces.
        let line = lines
            .get(start_row)
            .ok_or_else(|| anyhow::anyhow!("definition line out of range"))?;
        let open = line
            .find('{')
            .ok_or_else(|| anyhow::anyhow!("function has no body"))?;
        let close = line
            .rfind('}')
            .ok_or_else(|| anyhow::anyhow!("function has no closing brace"))?;
        let body = line[open + 1..close].trim().to_string();
        if body.is_empty() {
            anyhow::bail!("function body is empty");
        }
        return Ok(vec![body]);
    }
    let body: Vec<String> = lines[start_row + 1..end_row]
        .iter()
        .map(|l| l.to_string())
        .collect();
    if body.is_empty() {
        anyhow::bail!("function body is empty");
    }
    Ok(body)
}

fn split_arguments(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    raw.split(',').map(|a| a.trim().to_string()).collect()
}

/// Word-boundary substitution of parameter names with argument expressions.
fn substitute(text: &str, params: &[String], args: &[String]) -> String {
    let mut out = text.to_string();
    for (i, param) in params.iter().enumerate() {
        let arg = args.get(i).map(String::as_str).unwrap_or("undefined");
        if let Ok(re) = Regex::new(&format!(r"\b{}\b", regex::escape(param))) {
            out = re.replace_all(&out, arg).into_owned();
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use grok_engine::EngineConfig;
    use std::sync::Arc;

    async fn engine_with(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<CodeIntelligenceEngine>) {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        let mut config = EngineConfig::new(dir.path());
        config.watch = false;
        let engine = Arc::new(CodeIntelligenceEngine::new(config).unwrap());
        engine.initialize().await.unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn inlines_single_expression_body() {
        let (dir, engine) = engine_with(&[(
            "a.ts",
            "function double(x) {\n  return x * 2;\n}\nconst y = double(21);\n",
        )])
        .await;

        let plan = inline_function(&engine, "double", false).unwrap();
        assert_eq!(plan.safety.risk, RiskLevel::High);

        let source = engine.file_source(&dir.path().join("a.ts")).unwrap();
        let applied =
            crate::refactor::apply_changes_to_content(&source, &plan.files[0].changes).unwrap();
        assert!(applied.contains("const y = (21 * 2);"));
        assert!(!applied.contains("function double"));
    }

    #[tokio::test]
    async fn statement_body_inlines_into_standalone_calls() {
        let (dir, engine) = engine_with(&[(
            "a.ts",
            "function log2(msg) {\n  console.warn(msg);\n  console.error(msg);\n}\n  log2('hi');\n",
        )])
        .await;

        let plan = inline_function(&engine, "log2", false).unwrap();
        let source = engine.file_source(&dir.path().join("a.ts")).unwrap();
        let applied =
            crate::refactor::apply_changes_to_content(&source, &plan.files[0].changes).unwrap();
        assert!(applied.contains("  console.warn('hi');"));
        assert!(applied.contains("  console.error('hi');"));
        assert!(!applied.contains("function log2"));
    }

    #[tokio::test]
    async fn missing_function_errors() {
        let (_dir, engine) = engine_with(&[("a.ts", "const x = 1;\n")]).await;
        assert!(inline_function(&engine, "nothing", false).is_err());
    }
}
