use std::path::{Path, PathBuf};

use regex::Regex;

use crate::types::{CrossReference, DefinitionSite, Position, ReferenceSite, UsageKind};

const MAX_CONTEXT_LEN: usize = 200;

/// Word-boundary pattern that also treats `$` as an identifier character,
/// which plain `\b` would not.
pub fn word_boundary_pattern(name: &str) -> Option<Regex> {
    let escaped = regex::escape(name);
    Regex::new(&format!(r"(^|[^\w$])({escaped})($|[^\w$])")).ok()
}

fn definition_pattern(name: &str) -> Option<Regex> {
    let escaped = regex::escape(name);
    Regex::new(&format!(
        r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function\s*\*?|class|interface|enum|type|const|let|var|def)\s+{escaped}\b"
    ))
    .ok()
}

/// Build the cross-reference for one symbol by scanning every candidate
/// file's lines. The definition slot is supplied by the symbol index (the
/// first-encountered definitional reference).
pub fn build_cross_reference(
    name: &str,
    definition: Option<DefinitionSite>,
    files: &[(PathBuf, String)],
) -> CrossReference {
    let mut references = Vec::new();

    let Some(word_re) = word_boundary_pattern(name) else {
        return CrossReference {
            symbol: name.to_string(),
            definition,
            references,
        };
    };
    let def_re = definition_pattern(name);

    for (path, source) in files {
        if !source.contains(name) {
            continue;
        }
        for (line_idx, line) in source.lines().enumerate() {
            let mut search_from = 0;
            while let Some(caps) = word_re.captures(&line[search_from..]) {
                let m = caps.get(2).expect("symbol group");
                let column = search_from + m.start();
                let kind = classify(
                    name,
                    line,
                    column,
                    line_idx,
                    path,
                    definition.as_ref(),
                    def_re.as_ref(),
                );
                references.push(ReferenceSite {
                    file_path: path.clone(),
                    line: line_idx,
                    column,
                    context: snippet(line),
                    kind,
                });
                let advance = search_from + m.end();
                if advance <= search_from {
                    break;
                }
                search_from = advance;
                if search_from >= line.len() {
                    break;
                }
            }
        }
    }

    CrossReference {
        symbol: name.to_string(),
        definition,
        references,
    }
}

fn classify(
    name: &str,
    line: &str,
    column: usize,
    line_idx: usize,
    path: &Path,
    definition: Option<&DefinitionSite>,
    def_re: Option<&Regex>,
) -> UsageKind {
    if let Some(def) = definition {
        if def.file_path == path && def.position.row == line_idx {
            return UsageKind::Definition;
        }
    }
    if def_re.map(|re| re.is_match(line)).unwrap_or(false) {
        return UsageKind::Definition;
    }

    let trimmed = line.trim_start();
    if trimmed.starts_with("import ")
        || trimmed.starts_with("import{")
        || (trimmed.starts_with("from ") && trimmed.contains(" import "))
    {
        return UsageKind::Import;
    }
    if trimmed.starts_with("export ") {
        return UsageKind::Export;
    }

    let after = &line[column + name.len()..];
    if after.trim_start().starts_with('(') {
        return UsageKind::Call;
    }

    UsageKind::Reference
}

fn snippet(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.len() > MAX_CONTEXT_LEN {
        let mut end = MAX_CONTEXT_LEN;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        trimmed[..end].to_string()
    } else {
        trimmed.to_string()
    }
}
