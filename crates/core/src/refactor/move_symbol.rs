use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use grok_engine::{CodeIntelligenceEngine, SymbolKind};

use super::{
    relative_import_path, ChangeKind, RefactoringFileChange, RefactoringOperation, RiskLevel,
    SafetyAnalysis, TextChange,
};

#[derive(Debug, Clone)]
pub struct MoveRequest {
    pub symbol_name: String,
    pub source_file: PathBuf,
    pub target_file: PathBuf,
    pub create_target: bool,
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"import\b[^;]*?from\s+['"]([^'"]+)['"]"#).expect("import pattern")
    })
}

/// Move a function or class to another file: delete the definition span
/// (with its leading comments), append it to the target, and rewrite every
/// dependent's import specifier. Re-exports, type-only imports and dynamic
/// imports are left untouched and called out in the warnings.
pub fn move_symbol(
    engine: &CodeIntelligenceEngine,
    request: &MoveRequest,
) -> Result<RefactoringOperation> {
    let refs = engine.find_symbol(&request.symbol_name);
    let reference = refs
        .iter()
        .find(|r| r.file_path == request.source_file)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "`{}` is not defined in {}",
                request.symbol_name,
                request.source_file.display()
            )
        })?;

    let symbol = &reference.symbol;
    if !matches!(
        symbol.kind,
        SymbolKind::Function | SymbolKind::Class | SymbolKind::Variable
    ) {
        anyhow::bail!(
            "`{}` is a {:?}; only functions, classes and variables can move",
            request.symbol_name,
            symbol.kind
        );
    }
    let is_class = symbol.kind == SymbolKind::Class;

    let source = engine
        .file_source(&request.source_file)
        .ok_or_else(|| anyhow::anyhow!("source file is not indexed"))?;
    let lines: Vec<&str> = source.lines().collect();

    let span_start = extend_over_leading_comments(&lines, symbol.start.row);
    let span_end = symbol.end.row.min(lines.len().saturating_sub(1));
    let span_text = lines[span_start..=span_end].join("\n");

    // Dependent files whose imports bind the moved symbol.
    let mut import_rewrites: Vec<RefactoringFileChange> = Vec::new();
    let word_re = grok_engine::xref::word_boundary_pattern(&request.symbol_name);
    for dependent in engine.get_dependents(&request.source_file) {
        let Some(dep_source) = engine.file_source(&dependent) else {
            continue;
        };
        let new_spec = relative_import_path(&dependent, &request.target_file);
        let mut changes = Vec::new();
        for (line_idx, line) in dep_source.lines().enumerate() {
            let Some(caps) = import_re().captures(line) else {
                continue;
            };
            let spec = caps.get(1).expect("module spec");
            let resolved = grok_engine::imports::resolve_relative(&dependent, spec.as_str());
            if resolved.as_deref() != Some(request.source_file.as_path()) {
                continue;
            }
            let binds_symbol = word_re
                .as_ref()
                .map(|re| re.is_match(line))
                .unwrap_or(false);
            if !binds_symbol {
                continue;
            }
            changes.push(TextChange {
                start_line: line_idx,
                start_column: spec.start(),
                end_line: line_idx,
                end_column: spec.end(),
                old_text: spec.as_str().to_string(),
                new_text: new_spec.clone(),
                kind: ChangeKind::Replace,
            });
        }
        if !changes.is_empty() {
            import_rewrites.push(RefactoringFileChange {
                file_path: dependent,
                changes,
            });
        }
    }
    let affected = import_rewrites.len();

    let mut warnings = vec![
        "re-exports (`export { X } from '…'`), type-only imports and dynamic imports are not rewritten"
            .to_string(),
    ];
    if circular_after_move(engine, &request.target_file, &import_rewrites) {
        warnings.push(format!(
            "moving `{}` to {} would introduce a circular dependency",
            request.symbol_name,
            request.target_file.display()
        ));
    }

    let risk = match affected {
        0 => RiskLevel::Low,
        1..=3 => {
            if is_class {
                RiskLevel::Medium
            } else {
                RiskLevel::Low
            }
        }
        4..=10 => RiskLevel::Medium,
        _ => RiskLevel::High,
    };

    let target_exists = engine.file_source(&request.target_file).is_some()
        || request.target_file.exists();
    if !target_exists && !request.create_target {
        anyhow::bail!(
            "target file {} does not exist (pass create_target to create it)",
            request.target_file.display()
        );
    }

    // Source deletion + target append, then the import rewrites.
    let mut files = vec![
        RefactoringFileChange {
            file_path: request.source_file.clone(),
            changes: vec![TextChange {
                start_line: span_start,
                start_column: 0,
                end_line: span_end,
                end_column: lines[span_end].chars().count(),
                old_text: span_text.clone(),
                new_text: String::new(),
                kind: ChangeKind::Delete,
            }],
        },
        RefactoringFileChange {
            file_path: request.target_file.clone(),
            changes: vec![TextChange {
                start_line: target_append_line(engine, &request.target_file),
                start_column: 0,
                end_line: 0,
                end_column: 0,
                old_text: String::new(),
                new_text: format!("\n{span_text}"),
                kind: ChangeKind::Insert,
            }],
        },
    ];
    files.extend(import_rewrites);

    let preview = format!(
        "delete `{}` from {}\nappend to {}\nrewrite {} import(s)",
        request.symbol_name,
        request.source_file.display(),
        request.target_file.display(),
        affected
    );

    Ok(RefactoringOperation {
        operation: if is_class {
            "move_class".to_string()
        } else {
            "move_function".to_string()
        },
        description: format!(
            "Move `{}` from {} to {}",
            request.symbol_name,
            request.source_file.display(),
            request.target_file.display()
        ),
        files,
        preview,
        safety: SafetyAnalysis {
            risk,
            warnings,
            affected_files: affected,
            occurrences: affected + 1,
        },
    })
}

/// Immediately-preceding comment lines (no blank line between them and the
/// symbol) travel with the definition.
pub(crate) fn extend_over_leading_comments(lines: &[&str], start: usize) -> usize {
    let mut span_start = start;
    while span_start > 0 {
        let above = lines[span_start - 1].trim_start();
        if above.starts_with("//")
            || above.starts_with("/*")
            || above.starts_with('*')
            || above.starts_with("*/")
        {
            span_start -= 1;
        } else {
            break;
        }
    }
    span_start
}

fn target_append_line(engine: &CodeIntelligenceEngine, target: &Path) -> usize {
    engine
        .file_source(target)
        .map(|s| s.lines().count())
        .or_else(|| {
            std::fs::read_to_string(target)
                .ok()
                .map(|s| s.lines().count())
        })
        .unwrap_or(0)
}

/// The rewritten dependents will import the target; if the target already
/// (transitively) depends on one of them, the move closes a cycle.
fn circular_after_move(
    engine: &CodeIntelligenceEngine,
    target: &Path,
    rewrites: &[RefactoringFileChange],
) -> bool {
    let dependents: BTreeSet<&PathBuf> = rewrites.iter().map(|f| &f.file_path).collect();
    if dependents.is_empty() {
        return false;
    }

    let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    queue.push_back(target.to_path_buf());
    while let Some(node) = queue.pop_front() {
        if !visited.insert(node.clone()) {
            continue;
        }
        for dep in engine.get_dependencies(&node) {
            if dependents.contains(&dep) {
                return true;
            }
            queue.push_back(dep);
        }
    }
    false
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
    async fn move_function_rewrites_imports() {
        let (dir, engine) = engine_with(&[
            (
                "src/u/math.ts",
                "// totals with tax applied\nexport function calculateTotal(items: number[]): number {\n  return items.length;\n}\n",
            ),
            (
                "src/cart.ts",
                "import { calculateTotal } from './u/math';\nconst t = calculateTotal([]);\n",
            ),
        ])
        .await;

        let plan = move_symbol(
            &engine,
            &MoveRequest {
                symbol_name: "calculateTotal".into(),
                source_file: dir.path().join("src/u/math.ts"),
                target_file: dir.path().join("src/u/calc.ts"),
                create_target: true,
            },
        )
        .unwrap();

        assert_eq!(plan.operation, "move_function");
        assert_eq!(plan.safety.risk, RiskLevel::Low);
        assert_eq!(plan.safety.affected_files, 1);

        // Leading comment travels with the function.
        let source_change = &plan.files[0].changes[0];
        assert_eq!(source_change.kind, ChangeKind::Delete);
        assert!(source_change.old_text.contains("totals with tax"));

        let target_change = &plan.files[1].changes[0];
        assert!(target_change.new_text.contains("calculateTotal"));

        let import_change = &plan.files[2].changes[0];
        assert_eq!(import_change.new_text, "./u/calc");
        assert_eq!(import_change.old_text, "./u/math");

        // Applying the dependent's rewrite produces the new import line.
        let cart_source = engine.file_source(&dir.path().join("src/cart.ts")).unwrap();
        let rewritten = crate::refactor::apply_changes_to_content(
            &cart_source,
            &plan.files[2].changes,
        )
        .unwrap();
        assert!(rewritten.contains("from './u/calc'"));
    }

    #[tokio::test]
    async fn move_class_with_dependents_is_medium_risk() {
        let (dir, engine) = engine_with(&[
            ("store.ts", "export class Store {\n  open() {}\n}\n"),
            ("app.ts", "import { Store } from './store';\nnew Store();\n"),
        ])
        .await;

        let plan = move_symbol(
            &engine,
            &MoveRequest {
                symbol_name: "Store".into(),
                source_file: dir.path().join("store.ts"),
                target_file: dir.path().join("db.ts"),
                create_target: true,
            },
        )
        .unwrap();
        assert_eq!(plan.operation, "move_class");
        assert_eq!(plan.safety.risk, RiskLevel::Medium);
    }

    #[tokio::test]
    async fn circular_move_is_flagged() {
        let (dir, engine) = engine_with(&[
            ("a.ts", "export function shared() {}\n"),
            ("b.ts", "import { shared } from './a';\nshared();\n"),
            // target already imports b, so b -> target -> b would be a cycle
            ("target.ts", "import { } from './b';\nexport const t = 1;\n"),
        ])
        .await;

        let plan = move_symbol(
            &engine,
            &MoveRequest {
                symbol_name: "shared".into(),
                source_file: dir.path().join("a.ts"),
                target_file: dir.path().join("target.ts"),
                create_target: false,
            },
        )
        .unwrap();
        assert!(plan
            .safety
            .warnings
            .iter()
            .any(|w| w.contains("circular")));
    }

    #[tokio::test]
    async fn missing_symbol_errors() {
        let (dir, engine) = engine_with(&[("a.ts", "const x = 1;\n")]).await;
        assert!(move_symbol(
            &engine,
            &MoveRequest {
                symbol_name: "nope".into(),
                source_file: dir.path().join("a.ts"),
                target_file: dir.path().join("b.ts"),
                create_target: true,
            },
        )
        .is_err());
    }
}
