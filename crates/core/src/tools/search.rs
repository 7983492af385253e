use std::path::Path;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

use crate::outcome::ToolOutcome;

use super::{Tool, ToolContext};

const MAX_MATCHES: usize = 500;
const MAX_LINE_LEN: usize = 500;

static RIPGREP_AVAILABLE: OnceCell<bool> = OnceCell::const_new();

/// Tolerant probe: any successful `rg --version` exit means ripgrep is
/// usable; every failure mode (missing binary, weird shell) means fallback.
async fn ripgrep_available() -> bool {
    *RIPGREP_AVAILABLE
        .get_or_init(|| async {
            tokio::process::Command::new("rg")
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .map(|s| s.success())
                .unwrap_or(false)
        })
        .await
}

pub struct SearchTool;

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search file contents for a regex pattern. Uses ripgrep when installed, otherwise an internal walker."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex pattern" },
                "path": { "type": "string", "description": "File or directory to search (default: working directory)" },
                "glob": { "type": "string", "description": "Filename glob filter, e.g. '*.ts'" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let base = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.cwd.clone());
        let glob = args.get("glob").and_then(|v| v.as_str());

        if ripgrep_available().await {
            return ripgrep_search(pattern, &base, glob).await;
        }
        walk_search(pattern, &base, glob, false, false)
    }
}

async fn ripgrep_search(pattern: &str, base: &Path, glob: Option<&str>) -> Result<ToolOutcome> {
    let mut cmd = tokio::process::Command::new("rg");
    cmd.arg("--line-number")
        .arg("--no-heading")
        .arg("--color")
        .arg("never")
        .arg("--max-count")
        .arg("200");
    if let Some(glob) = glob {
        cmd.arg("--glob").arg(glob);
    }
    cmd.arg("--").arg(pattern).arg(base);

    let output = cmd.output().await?;
    // rg exits 1 on "no matches", which is a successful empty result.
    match output.status.code() {
        Some(0) => {
            let text = String::from_utf8_lossy(&output.stdout);
            let lines: Vec<&str> = text.lines().take(MAX_MATCHES).collect();
            let count = lines.len();
            Ok(ToolOutcome::ok_with(
                lines.join("\n"),
                json!({ "matchCount": count, "backend": "ripgrep" }),
            ))
        }
        Some(1) => Ok(ToolOutcome::ok_with(
            "No matches found",
            json!({ "matchCount": 0, "backend": "ripgrep" }),
        )),
        _ => Ok(ToolOutcome::fail(format!(
            "ripgrep failed: {}",
            String::from_utf8_lossy(&output.stderr)
        ))),
    }
}

fn walk_search(
    pattern: &str,
    base: &Path,
    glob: Option<&str>,
    case_insensitive: bool,
    whole_word: bool,
) -> Result<ToolOutcome> {
    let mut effective = pattern.to_string();
    if whole_word {
        effective = format!(r"\b(?:{effective})\b");
    }
    if case_insensitive {
        effective = format!("(?i){effective}");
    }
    let re = match Regex::new(&effective) {
        Ok(re) => re,
        Err(e) => return Ok(ToolOutcome::fail(format!("invalid regex: {e}"))),
    };

    let glob = glob
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| anyhow::anyhow!("invalid glob: {e}"))?;

    let mut results = Vec::new();
    search_path(base, &re, &glob, &mut results);
    let count = results.len();
    let output = if results.is_empty() {
        "No matches found".to_string()
    } else {
        results.join("\n")
    };
    Ok(ToolOutcome::ok_with(
        output,
        json!({ "matchCount": count, "backend": "walk" }),
    ))
}

fn search_path(
    path: &Path,
    re: &Regex,
    glob: &Option<glob::Pattern>,
    results: &mut Vec<String>,
) {
    if results.len() >= MAX_MATCHES {
        return;
    }
    if path.is_file() {
        search_file(path, re, glob, results);
        return;
    }

    let Ok(entries) = std::fs::read_dir(path) else {
        return;
    };
    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if results.len() >= MAX_MATCHES {
            break;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || name == "node_modules" || name == "dist" || name == "target" {
            continue;
        }
        search_path(&entry.path(), re, glob, results);
    }
}

fn search_file(path: &Path, re: &Regex, glob: &Option<glob::Pattern>, results: &mut Vec<String>) {
    if let Some(pattern) = glob {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !pattern.matches(&name) && !pattern.matches_path(path) {
            return;
        }
    }

    let Ok(bytes) = std::fs::read(path) else {
        return;
    };
    // NUL probe: skip binary-looking files.
    if bytes.len() > 512 && bytes[..512].contains(&0) {
        return;
    }
    let text = String::from_utf8_lossy(&bytes);

    for (line_idx, line) in text.lines().enumerate() {
        if results.len() >= MAX_MATCHES {
            break;
        }
        if re.is_match(line) {
            let display = if line.len() > MAX_LINE_LEN {
                let mut end = MAX_LINE_LEN;
                while !line.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}…", &line[..end])
            } else {
                line.to_string()
            };
            results.push(format!("{}:{}:{}", path.display(), line_idx + 1, display));
        }
    }
}

/// Regex search with explicit case/word options, always using the internal
/// walker so behavior is identical with or without ripgrep installed.
pub struct AdvancedSearchTool;

#[async_trait]
impl Tool for AdvancedSearchTool {
    fn name(&self) -> &str {
        "advanced_search"
    }

    fn description(&self) -> &str {
        "Regex search with case sensitivity and whole-word options."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string" },
                "glob": { "type": "string" },
                "caseSensitive": { "type": "boolean", "default": true },
                "wholeWord": { "type": "boolean", "default": false }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let pattern = args
            .get("pattern")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let base = args
            .get("path")
            .and_then(|v| v.as_str())
            .map(|p| ctx.resolve(p))
            .unwrap_or_else(|| ctx.cwd.clone());
        let glob = args.get("glob").and_then(|v| v.as_str());
        let case_sensitive = args
            .get("caseSensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        let whole_word = args
            .get("wholeWord")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        walk_search(pattern, &base, glob, !case_sensitive, whole_word)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_context;

    #[tokio::test]
    async fn finds_matches_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.ts"),
            "const total = 1;\nconst other = 2;\nuse(total);\n",
        )
        .unwrap();
        let ctx = test_context(dir.path());

        let outcome = SearchTool
            .execute(json!({"pattern": "total"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success);
        let text = outcome.output.unwrap();
        assert!(text.contains("a.ts:1:"), "{text}");
        assert!(text.contains("a.ts:3:"), "{text}");
    }

    #[tokio::test]
    async fn no_match_is_a_successful_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "nothing here\n").unwrap();
        let ctx = test_context(dir.path());

        let outcome = SearchTool
            .execute(json!({"pattern": "zzz_missing"}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.metadata["matchCount"], json!(0));
    }

    #[tokio::test]
    async fn glob_filters_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "needle\n").unwrap();
        std::fs::write(dir.path().join("b.md"), "needle\n").unwrap();
        let ctx = test_context(dir.path());

        let outcome = AdvancedSearchTool
            .execute(json!({"pattern": "needle", "glob": "*.ts"}), &ctx)
            .await
            .unwrap();
        let text = outcome.output.unwrap();
        assert!(text.contains("a.ts"));
        assert!(!text.contains("b.md"));
    }

    #[tokio::test]
    async fn whole_word_and_case_options() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "subtotal\nTotal\ntotal\n").unwrap();
        let ctx = test_context(dir.path());

        let outcome = AdvancedSearchTool
            .execute(
                json!({"pattern": "total", "wholeWord": true, "caseSensitive": false}),
                &ctx,
            )
            .await
            .unwrap();
        let text = outcome.output.unwrap();
        assert!(!text.contains(":1:"), "{text}");
        assert!(text.contains(":2:"));
        assert!(text.contains(":3:"));
    }
}
