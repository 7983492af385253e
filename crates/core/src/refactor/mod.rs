pub mod extract;
pub mod inline;
pub mod move_symbol;
pub mod rename;

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::multifile::FileOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Replace,
    Insert,
    Delete,
}

/// One positional edit, 0-based, end-exclusive columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChange {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    pub old_text: String,
    pub new_text: String,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringFileChange {
    pub file_path: PathBuf,
    pub changes: Vec<TextChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyAnalysis {
    pub risk: RiskLevel,
    pub warnings: Vec<String>,
    pub affected_files: usize,
    pub occurrences: usize,
}

/// A refactoring is a pure description; applying it is the multi-file
/// editor's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefactoringOperation {
    pub operation: String,
    pub description: String,
    pub files: Vec<RefactoringFileChange>,
    pub preview: String,
    pub safety: SafetyAnalysis,
}

impl RefactoringOperation {
    /// Lower the positional plan into multi-file-editor operations. Each
    /// touched file becomes one whole-content edit (or a create for files
    /// that do not exist yet), so the transaction applies atomically.
    pub fn to_file_operations(&self, base: &Path) -> Result<Vec<FileOperation>> {
        let mut ops = Vec::new();
        for file in &self.files {
            let path = if file.file_path.is_absolute() {
                file.file_path.clone()
            } else {
                base.join(&file.file_path)
            };
            match std::fs::read_to_string(&path) {
                Ok(old_content) => {
                    let new_content = apply_changes_to_content(&old_content, &file.changes)?;
                    if new_content != old_content {
                        ops.push(FileOperation::Edit {
                            file_path: file.file_path.to_string_lossy().into_owned(),
                            old_str: old_content,
                            new_str: new_content,
                            replace_all: false,
                        });
                    }
                }
                Err(_) => {
                    let new_content = apply_changes_to_content("", &file.changes)?;
                    ops.push(FileOperation::Create {
                        file_path: file.file_path.to_string_lossy().into_owned(),
                        content: new_content,
                        overwrite: false,
                    });
                }
            }
        }
        Ok(ops)
    }
}

/// Apply positional changes to a content string. Changes are applied
/// bottom-up so earlier positions stay valid.
pub fn apply_changes_to_content(content: &str, changes: &[TextChange]) -> Result<String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();

    let mut ordered: Vec<&TextChange> = changes.iter().collect();
    ordered.sort_by(|a, b| {
        (b.start_line, b.start_column).cmp(&(a.start_line, a.start_column))
    });

    for change in ordered {
        match change.kind {
            ChangeKind::Insert => {
                let at = change.start_line.min(lines.len());
                let new_lines: Vec<String> = change.new_text.lines().map(str::to_string).collect();
                lines.splice(at..at, new_lines);
            }
            ChangeKind::Delete | ChangeKind::Replace => {
                apply_span_change(&mut lines, change)?;
            }
        }
    }

    let mut out = lines.join("\n");
    if had_trailing_newline || content.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

fn apply_span_change(lines: &mut Vec<String>, change: &TextChange) -> Result<()> {
    if change.start_line >= lines.len() {
        anyhow::bail!(
            "change starts at line {} but file has {} lines",
            change.start_line,
            lines.len()
        );
    }
    let end_line = change.end_line.min(lines.len().saturating_sub(1));

    // Whole-line span: start at column 0, end at (or past) the last column.
    let full_lines = change.start_column == 0
        && change.end_column >= lines[end_line].chars().count();

    if change.start_line == end_line && !full_lines {
        let line = &lines[change.start_line];
        let chars: Vec<char> = line.chars().collect();
        let start = change.start_column.min(chars.len());
        let end = change.end_column.min(chars.len());
        let mut rebuilt: String = chars[..start].iter().collect();
        if change.kind == ChangeKind::Replace {
            rebuilt.push_str(&change.new_text);
        }
        rebuilt.extend(chars[end..].iter());
        lines[change.start_line] = rebuilt;
    } else {
        let replacement: Vec<String> = if change.kind == ChangeKind::Replace {
            change.new_text.lines().map(str::to_string).collect()
        } else {
            Vec::new()
        };
        lines.splice(change.start_line..=end_line, replacement);
    }
    Ok(())
}

/// POSIX-style relative import path from one file's directory to a target
/// module file: `./`-prefixed unless it already climbs, source extension
/// stripped.
pub fn relative_import_path(from_file: &Path, target_file: &Path) -> String {
    let from_dir = from_file.parent().unwrap_or(Path::new(""));

    let from_components: Vec<_> = from_dir.components().collect();
    let target_components: Vec<_> = target_file.components().collect();

    let common = from_components
        .iter()
        .zip(target_components.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = from_components.len() - common;
    let mut parts: Vec<String> = std::iter::repeat("..".to_string()).take(ups).collect();
    for component in &target_components[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    let mut joined = parts.join("/");
    for ext in [".ts", ".tsx", ".js", ".jsx"] {
        if let Some(stripped) = joined.strip_suffix(ext) {
            joined = stripped.to_string();
            break;
        }
    }
    if !joined.starts_with('.') {
        joined = format!("./{joined}");
    }
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replace(start_line: usize, start_col: usize, end_col: usize, old: &str, new: &str) -> TextChange {
        TextChange {
            start_line,
            start_column: start_col,
            end_line: start_line,
            end_column: end_col,
            old_text: old.into(),
            new_text: new.into(),
            kind: ChangeKind::Replace,
        }
    }

    #[test]
    fn applies_inline_replacements_bottom_up() {
        let content = "const total = old();\nconst other = old();\n";
        let changes = vec![
            replace(0, 14, 17, "old", "new"),
            replace(1, 14, 17, "old", "new"),
        ];
        let out = apply_changes_to_content(content, &changes).unwrap();
        assert_eq!(out, "const total = new();\nconst other = new();\n");
    }

    #[test]
    fn whole_line_replace_and_delete() {
        let content = "line0\nline1\nline2\n";
        let changes = vec![TextChange {
            start_line: 1,
            start_column: 0,
            end_line: 1,
            end_column: 5,
            old_text: "line1".into(),
            new_text: "replaced-a\nreplaced-b".into(),
            kind: ChangeKind::Replace,
        }];
        let out = apply_changes_to_content(content, &changes).unwrap();
        assert_eq!(out, "line0\nreplaced-a\nreplaced-b\nline2\n");

        let deletes = vec![TextChange {
            start_line: 0,
            start_column: 0,
            end_line: 1,
            end_column: 5,
            old_text: String::new(),
            new_text: String::new(),
            kind: ChangeKind::Delete,
        }];
        let out = apply_changes_to_content(content, &deletes).unwrap();
        assert_eq!(out, "line2\n");
    }

    #[test]
    fn insert_splices_lines() {
        let content = "a\nc\n";
        let changes = vec![TextChange {
            start_line: 1,
            start_column: 0,
            end_line: 1,
            end_column: 0,
            old_text: String::new(),
            new_text: "b".into(),
            kind: ChangeKind::Insert,
        }];
        let out = apply_changes_to_content(content, &changes).unwrap();
        assert_eq!(out, "a\nb\nc\n");
    }

    #[test]
    fn relative_import_paths() {
        assert_eq!(
            relative_import_path(Path::new("src/cart.ts"), Path::new("src/u/calc.ts")),
            "./u/calc"
        );
        assert_eq!(
            relative_import_path(Path::new("src/u/math.ts"), Path::new("src/cart.ts")),
            "../cart"
        );
        assert_eq!(
            relative_import_path(Path::new("a.ts"), Path::new("b.ts")),
            "./b"
        );
    }
}
