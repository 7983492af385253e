pub mod globals;

use std::sync::OnceLock;

use regex::Regex;

/// Which rung of the matching ladder produced the edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    Exact,
    NormalizedWindow,
    FunctionBlock,
    ImportStatement,
    VariableDeclaration,
    MethodAssignment,
}

impl MatchStrategy {
    pub fn name(self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::NormalizedWindow => "normalized_window",
            MatchStrategy::FunctionBlock => "function_block",
            MatchStrategy::ImportStatement => "import_statement",
            MatchStrategy::VariableDeclaration => "variable_declaration",
            MatchStrategy::MethodAssignment => "method_assignment",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplaceSuccess {
    pub content: String,
    pub replacements: usize,
    pub strategy: MatchStrategy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceFailure {
    NoMatch,
    Ambiguous { count: usize },
}

fn regexes() -> &'static [(Regex, &'static str)] {
    static NORMALIZERS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    NORMALIZERS.get_or_init(|| {
        [
            (r"\s+", " "),
            (r"\{\s+", "{ "),
            (r"\s+\}", " }"),
            (r",\s*", ", "),
            (r"\(\s+", "("),
            (r"\s+\)", ")"),
            (r";\s*", ";"),
        ]
        .iter()
        .map(|(pattern, replacement)| (Regex::new(pattern).expect("normalizer"), *replacement))
        .collect()
    })
}

/// Canonical form used to compare LLM-quoted text against file text:
/// line endings, tabs, smart quotes and spacing around punctuation are all
/// folded away.
pub fn normalize(text: &str) -> String {
    let mut out = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', "  ")
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    for (re, replacement) in regexes() {
        out = re.replace_all(&out, *replacement).into_owned();
    }
    out.trim().to_string()
}

/// Matching ladder: exact match, then whitespace-normalized window match,
/// then structural strategies keyed off what `old_str` looks like. The file
/// is reconstructed with LF line endings when a non-exact rung matches;
/// `new_str` is always inserted verbatim.
pub fn replace_in_content(
    content: &str,
    old_str: &str,
    new_str: &str,
    replace_all: bool,
) -> Result<ReplaceSuccess, ReplaceFailure> {
    if content.contains(old_str) {
        let (content, replacements) = if replace_all {
            let count = content.matches(old_str).count();
            (content.replace(old_str, new_str), count)
        } else {
            (content.replacen(old_str, new_str, 1), 1)
        };
        return Ok(ReplaceSuccess {
            content,
            replacements,
            strategy: MatchStrategy::Exact,
        });
    }

    let had_trailing_newline = content.ends_with('\n') || content.ends_with("\r\n");
    let unified = content.replace("\r\n", "\n").replace('\r', "\n");
    let lines: Vec<&str> = unified.lines().collect();

    if let Some(result) =
        normalized_window_match(&lines, old_str, new_str, replace_all, had_trailing_newline)?
    {
        return Ok(result);
    }

    for (strategy, span) in [
        (MatchStrategy::FunctionBlock, function_block_span(&lines, old_str)),
        (MatchStrategy::ImportStatement, import_span(&lines, old_str)),
        (
            MatchStrategy::VariableDeclaration,
            variable_declaration_span(&lines, old_str),
        ),
        (
            MatchStrategy::MethodAssignment,
            method_assignment_span(&lines, old_str),
        ),
    ] {
        if let Some((start, end)) = span {
            let content = splice(&lines, start, end, new_str, had_trailing_newline);
            return Ok(ReplaceSuccess {
                content,
                replacements: 1,
                strategy,
            });
        }
    }

    Err(ReplaceFailure::NoMatch)
}

fn normalized_window_match(
    lines: &[&str],
    old_str: &str,
    new_str: &str,
    replace_all: bool,
    had_trailing_newline: bool,
) -> Result<Option<ReplaceSuccess>, ReplaceFailure> {
    let old_unified = old_str.replace("\r\n", "\n").replace('\r', "\n");
    let window_len = old_unified.lines().count().max(1);
    if window_len > lines.len() {
        return Ok(None);
    }
    let target = normalize(&old_unified);
    if target.is_empty() {
        return Ok(None);
    }

    let mut matches = Vec::new();
    for start in 0..=(lines.len() - window_len) {
        let window = lines[start..start + window_len].join("\n");
        if normalize(&window) == target {
            matches.push(start);
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => {
            let start = matches[0];
            let content = splice(lines, start, start + window_len - 1, new_str, had_trailing_newline);
            Ok(Some(ReplaceSuccess {
                content,
                replacements: 1,
                strategy: MatchStrategy::NormalizedWindow,
            }))
        }
        count if replace_all => {
            let mut rebuilt: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            // Bottom-up so earlier indices stay valid.
            for start in matches.iter().rev() {
                let new_lines: Vec<String> = new_str.lines().map(str::to_string).collect();
                rebuilt.splice(*start..*start + window_len, new_lines);
            }
            let mut content = rebuilt.join("\n");
            if had_trailing_newline {
                content.push('\n');
            }
            Ok(Some(ReplaceSuccess {
                content,
                replacements: count,
                strategy: MatchStrategy::NormalizedWindow,
            }))
        }
        count => Err(ReplaceFailure::Ambiguous { count }),
    }
}

fn splice(
    lines: &[&str],
    start: usize,
    end_inclusive: usize,
    new_str: &str,
    had_trailing_newline: bool,
) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    out.extend_from_slice(&lines[..start]);
    out.extend(new_str.lines());
    if end_inclusive + 1 < lines.len() {
        out.extend_from_slice(&lines[end_inclusive + 1..]);
    }
    let mut content = out.join("\n");
    if had_trailing_newline {
        content.push('\n');
    }
    content
}

fn unique(matches: Vec<(usize, usize)>) -> Option<(usize, usize)> {
    if matches.len() == 1 {
        Some(matches[0])
    } else {
        None
    }
}

/// Strategy (a): locate a `function Name … { … }` block by the name quoted
/// in `old_str`, with the end found by brace balance.
fn function_block_span(lines: &[&str], old_str: &str) -> Option<(usize, usize)> {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    let name_re = NAME_RE.get_or_init(|| {
        Regex::new(r"(?:async\s+)?function\s*\*?\s+([A-Za-z_$][\w$]*)").expect("function name")
    });
    let name = name_re.captures(old_str)?.get(1)?.as_str();
    let line_re = Regex::new(&format!(
        r"function\s*\*?\s+{}\s*\(",
        regex::escape(name)
    ))
    .ok()?;

    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line_re.is_match(line) {
            if let Some(end) = brace_block_end(lines, i) {
                matches.push((i, end));
            }
        }
    }
    unique(matches)
}

/// Strategy (b): match an import statement by its module specifier.
fn import_span(lines: &[&str], old_str: &str) -> Option<(usize, usize)> {
    static IMPORT_RE: OnceLock<Regex> = OnceLock::new();
    let import_re = IMPORT_RE.get_or_init(|| {
        Regex::new(r#"import\b[^;]*?from\s+['"]([^'"]+)['"]"#).expect("import spec")
    });
    let module = import_re.captures(old_str)?.get(1)?.as_str();

    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = import_re.captures(line) {
            if caps.get(1).map(|m| m.as_str()) == Some(module) {
                matches.push((i, i));
            }
        }
    }
    unique(matches)
}

/// Strategy (c): `const|let|var Name` declarations, matched by name, spanning
/// to the statement-terminating semicolon.
fn variable_declaration_span(lines: &[&str], old_str: &str) -> Option<(usize, usize)> {
    static DECL_RE: OnceLock<Regex> = OnceLock::new();
    let decl_re = DECL_RE.get_or_init(|| {
        Regex::new(r"(?:const|let|var)\s+([A-Za-z_$][\w$]*)").expect("declaration name")
    });
    let name = decl_re.captures(old_str)?.get(1)?.as_str();
    let line_re = Regex::new(&format!(
        r"(?:const|let|var)\s+{}\b",
        regex::escape(name)
    ))
    .ok()?;

    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line_re.is_match(line) {
            let end = statement_end(lines, i)?;
            matches.push((i, end));
        }
    }
    unique(matches)
}

/// Strategy (d): `Name = (` / `Name: (` method or arrow assignments.
fn method_assignment_span(lines: &[&str], old_str: &str) -> Option<(usize, usize)> {
    static ASSIGN_RE: OnceLock<Regex> = OnceLock::new();
    let assign_re = ASSIGN_RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_$][\w$]*)\s*[:=]\s*(?:async\s*)?\(").expect("assignment name")
    });
    let name = assign_re.captures(old_str)?.get(1)?.as_str();
    let line_re = Regex::new(&format!(
        r"{}\s*[:=]\s*(?:async\s*)?\(",
        regex::escape(name)
    ))
    .ok()?;

    let mut matches = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if line_re.is_match(line) {
            let end = if line.contains('{') {
                brace_block_end(lines, i)?
            } else {
                statement_end(lines, i)?
            };
            matches.push((i, end));
        }
    }
    unique(matches)
}

/// Line index where the brace block opened on (or after) `start` returns to
/// depth zero.
fn brace_block_end(lines: &[&str], start: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut opened = false;
    for (i, line) in lines.iter().enumerate().skip(start) {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return Some(i);
        }
        if i > start + 2000 {
            break;
        }
    }
    None
}

const MAX_STATEMENT_LINES: usize = 20;

fn statement_end(lines: &[&str], start: usize) -> Option<usize> {
    for (i, line) in lines
        .iter()
        .enumerate()
        .skip(start)
        .take(MAX_STATEMENT_LINES)
    {
        if line.trim_end().ends_with(';') {
            return Some(i);
        }
    }
    Some(start)
}
