use std::path::{Path, PathBuf};

use anyhow::Result;
use glob::Pattern;

pub const DEFAULT_INCLUDE: [&str; 5] = [
    "**/*.ts",
    "**/*.tsx",
    "**/*.js",
    "**/*.jsx",
    "**/*.py",
];

pub const DEFAULT_EXCLUDE: [&str; 4] = [
    "**/node_modules/**",
    "**/dist/**",
    "**/.git/**",
    "**/.grok/**",
];

const MAX_FILE_SIZE: u64 = 512 * 1024;

/// Include/exclude glob matcher over root-relative paths.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl ScanFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |globs: &[String]| -> Result<Vec<Pattern>> {
            globs
                .iter()
                .map(|g| Pattern::new(g).map_err(|e| anyhow::anyhow!("bad glob `{g}`: {e}")))
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    pub fn matches(&self, rel_path: &Path) -> bool {
        let included = self.include.iter().any(|p| p.matches_path(rel_path));
        if !included {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches_path(rel_path))
    }
}

/// Walk the tree collecting files that pass the filter. Oversized files and
/// binary-looking content are skipped the same way the search tools skip
/// them.
pub fn scan_root(root: &Path, filter: &ScanFilter) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(root, root, filter, &mut out);
    out.sort();
    out
}

fn walk(root: &Path, dir: &Path, filter: &ScanFilter, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::debug!("skipping unreadable directory {}: {e}", dir.display());
            return;
        }
    };

    let mut entries: Vec<_> = entries.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };

        if path.is_dir() {
            // Prune excluded directories early; `a/b` must also fail when
            // `**/b/**` excludes everything under it.
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == ".git" || name == "node_modules" || name == "dist" || name == ".grok" {
                continue;
            }
            walk(root, &path, filter, out);
        } else if path.is_file() && filter.matches(rel) {
            if let Ok(meta) = entry.metadata() {
                if meta.len() > MAX_FILE_SIZE {
                    continue;
                }
            }
            out.push(path);
        }
    }
}
