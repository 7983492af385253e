use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Result;
use regex::Regex;

use grok_engine::xref::word_boundary_pattern;
use grok_engine::CodeIntelligenceEngine;

use super::{
    ChangeKind, RefactoringFileChange, RefactoringOperation, RiskLevel, SafetyAnalysis,
    TextChange,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RenameScope {
    File(PathBuf),
    Project,
    Global,
}

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier"))
}

/// Rename every word-boundary occurrence of `symbol_name`, honoring the
/// comment and string filters. The filters are deliberately conservative:
/// a line is skipped wholesale when it looks like a comment or contains any
/// quote character.
pub fn rename(
    engine: &CodeIntelligenceEngine,
    symbol_name: &str,
    new_name: &str,
    scope: RenameScope,
    include_comments: bool,
    include_strings: bool,
) -> Result<RefactoringOperation> {
    if !identifier_re().is_match(new_name) {
        anyhow::bail!("`{new_name}` is not a valid identifier");
    }
    if symbol_name == new_name {
        anyhow::bail!("new name is identical to the current name");
    }

    let xref = engine
        .find_references(symbol_name)
        .ok_or_else(|| anyhow::anyhow!("symbol `{symbol_name}` not found in the index"))?;

    let mut files: Vec<PathBuf> = xref
        .references
        .iter()
        .map(|r| r.file_path.clone())
        .collect();
    files.sort();
    files.dedup();

    if let RenameScope::File(only) = &scope {
        files.retain(|f| f == only);
    }

    let word_re = word_boundary_pattern(symbol_name)
        .ok_or_else(|| anyhow::anyhow!("cannot build match pattern for `{symbol_name}`"))?;

    let mut changes_by_file: BTreeMap<PathBuf, Vec<TextChange>> = BTreeMap::new();
    let mut occurrences = 0usize;
    let mut skipped_lines = 0usize;

    for file in &files {
        let Some(source) = engine.file_source(file) else {
            continue;
        };
        for (line_idx, line) in source.lines().enumerate() {
            let leading = line.trim_start();
            if !include_comments && (leading.starts_with("//") || leading.starts_with('*')) {
                skipped_lines += 1;
                continue;
            }
            if !include_strings && (line.contains('"') || line.contains('\'')) {
                skipped_lines += 1;
                continue;
            }

            let mut search_from = 0;
            while let Some(caps) = word_re.captures(&line[search_from..]) {
                let m = caps.get(2).expect("symbol group");
                let column = search_from + m.start();
                changes_by_file
                    .entry(file.clone())
                    .or_default()
                    .push(TextChange {
                        start_line: line_idx,
                        start_column: column,
                        end_line: line_idx,
                        end_column: column + symbol_name.len(),
                        old_text: symbol_name.to_string(),
                        new_text: new_name.to_string(),
                        kind: ChangeKind::Replace,
                    });
                occurrences += 1;
                let advance = search_from + m.end();
                if advance <= search_from || advance >= line.len() {
                    break;
                }
                search_from = advance;
            }
        }
    }

    let affected_files = changes_by_file.len();
    let risk = if affected_files > 5 || occurrences > 20 {
        RiskLevel::High
    } else if affected_files > 1 || occurrences > 5 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };

    let mut warnings = Vec::new();
    if skipped_lines > 0 {
        warnings.push(format!(
            "{skipped_lines} line(s) skipped by the comment/string filters; occurrences there keep the old name"
        ));
    }
    if !include_strings {
        warnings.push(
            "lines containing any quote character are skipped, including lines that also \
             reference the symbol outside a string"
                .to_string(),
        );
    }

    let files: Vec<RefactoringFileChange> = changes_by_file
        .into_iter()
        .map(|(file_path, changes)| RefactoringFileChange { file_path, changes })
        .collect();

    let preview = files
        .iter()
        .map(|f| format!("{}: {} occurrence(s)", f.file_path.display(), f.changes.len()))
        .collect::<Vec<_>>()
        .join("\n");

    Ok(RefactoringOperation {
        operation: "rename".to_string(),
        description: format!("Rename `{symbol_name}` to `{new_name}`"),
        files,
        preview,
        safety: SafetyAnalysis {
            risk,
            warnings,
            affected_files,
            occurrences,
        },
    })
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
    async fn renames_across_files() {
        let (dir, engine) = engine_with(&[
            ("math.ts", "export function total(xs) { return xs.length; }\n"),
            ("cart.ts", "import { total } from './math';\nconst n = total([]);\n"),
        ])
        .await;

        let plan = rename(&engine, "total", "sum", RenameScope::Project, false, true).unwrap();
        assert_eq!(plan.safety.affected_files, 2);
        assert_eq!(plan.safety.occurrences, 3);
        assert_eq!(plan.safety.risk, RiskLevel::Medium);

        // Lowering and applying the plan rewrites every occurrence.
        let ops = plan.to_file_operations(dir.path()).unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[tokio::test]
    async fn invalid_identifier_is_rejected() {
        let (_dir, engine) = engine_with(&[("a.ts", "const x = 1;\n")]).await;
        assert!(rename(&engine, "x", "1bad", RenameScope::Project, false, false).is_err());
        assert!(rename(&engine, "x", "not-ok", RenameScope::Project, false, false).is_err());
        assert!(rename(&engine, "x", "_fine$2", RenameScope::Project, false, false).is_ok());
    }

    #[tokio::test]
    async fn comment_lines_are_skipped_without_include_comments() {
        let (_dir, engine) = engine_with(&[(
            "a.ts",
            "// total is computed lazily\nfunction total() {}\nconst n = total();\n",
        )])
        .await;

        let plan = rename(&engine, "total", "sum", RenameScope::Project, false, true).unwrap();
        assert_eq!(plan.safety.occurrences, 2);
        assert!(plan
            .safety
            .warnings
            .iter()
            .any(|w| w.contains("skipped")));
    }

    #[tokio::test]
    async fn quote_lines_are_skipped_without_include_strings() {
        let (_dir, engine) = engine_with(&[(
            "a.ts",
            "function total() {}\nconsole.log('total');\nconst n = total();\n",
        )])
        .await;

        let plan = rename(&engine, "total", "sum", RenameScope::Project, true, false).unwrap();
        // The console.log line contains quotes and is skipped wholesale.
        assert_eq!(plan.safety.occurrences, 2);
    }

    #[tokio::test]
    async fn file_scope_limits_to_one_file() {
        let (dir, engine) = engine_with(&[
            ("a.ts", "export function total() {}\n"),
            ("b.ts", "import { total } from './a';\ntotal();\n"),
        ])
        .await;

        let plan = rename(
            &engine,
            "total",
            "sum",
            RenameScope::File(dir.path().join("b.ts")),
            true,
            true,
        )
        .unwrap();
        assert_eq!(plan.safety.affected_files, 1);
        assert_eq!(plan.files[0].file_path, dir.path().join("b.ts"));
    }

    #[tokio::test]
    async fn many_occurrences_raise_risk() {
        let body: String = (0..25).map(|i| format!("const a{i} = total();\n")).collect();
        let content = format!("function total() {{ return 1; }}\n{body}");
        let (_dir, engine) = engine_with(&[("a.ts", content.as_str())]).await;

        let plan = rename(&engine, "total", "sum", RenameScope::Project, true, true).unwrap();
        assert!(plan.safety.occurrences > 20);
        assert_eq!(plan.safety.risk, RiskLevel::High);
    }
}
