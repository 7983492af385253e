use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use grok_engine::CodeIntelligenceEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Refactor,
    Rename,
    Extract,
    Move,
    Inline,
    Create,
    Implement,
    Update,
    Fix,
    Remove,
    Clean,
    Analyze,
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub intent: Intent,
    pub files: Vec<PathBuf>,
    pub symbols: Vec<String>,
    pub directories: Vec<String>,
    pub complexity: Complexity,
    pub estimated_steps: usize,
    pub risks: Vec<String>,
    pub required_tools: Vec<String>,
}

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\w\-./]+\.[a-z]{2,4}").expect("file path"))
}

fn pascal_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][a-z0-9]+(?:[A-Z][A-Za-z0-9]*)+\b").expect("pascal case")
    })
}

fn camel_case_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[a-z]+(?:[A-Z][A-Za-z0-9]*)+\b").expect("camel case"))
}

fn directory_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[\w\-]+(?:/[\w\-]+)+/\B").expect("directory"))
}

const INTENT_KEYWORDS: &[(&[&str], Intent)] = &[
    (&["refactor", "restructure", "reorganize"], Intent::Refactor),
    (&["rename"], Intent::Rename),
    (&["extract"], Intent::Extract),
    (&["move", "relocate"], Intent::Move),
    (&["inline"], Intent::Inline),
    (&["create", "add"], Intent::Create),
    (&["implement", "generate"], Intent::Implement),
    (&["update", "modify", "change"], Intent::Update),
    (&["fix", "repair"], Intent::Fix),
    (&["remove", "delete"], Intent::Remove),
    (&["clean", "cleanup"], Intent::Clean),
    (&["analyze", "find", "inspect"], Intent::Analyze),
];

pub fn detect_intent(request: &str) -> Intent {
    let lowered = request.to_lowercase();
    for (keywords, intent) in INTENT_KEYWORDS {
        if keywords.iter().any(|kw| {
            lowered
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *kw)
        }) {
            return *intent;
        }
    }
    Intent::General
}

pub fn extract_file_paths(request: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in file_path_re().find_iter(request) {
        let s = m.as_str().trim_matches('.').to_string();
        if !out.contains(&s) {
            out.push(s);
        }
    }
    out
}

fn extract_symbols(request: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for re in [pascal_case_re(), camel_case_re()] {
        for m in re.find_iter(request) {
            let s = m.as_str().to_string();
            if !out.contains(&s) {
                out.push(s);
            }
        }
    }
    out
}

fn extract_directories(request: &str) -> Vec<String> {
    directory_re()
        .find_iter(request)
        .map(|m| m.as_str().trim_end_matches('/').to_string())
        .collect()
}

fn intent_weight(intent: Intent) -> usize {
    match intent {
        Intent::Refactor | Intent::Move | Intent::Implement => 3,
        Intent::Rename | Intent::Extract | Intent::Inline | Intent::Remove => 2,
        Intent::Create | Intent::Update | Intent::Fix | Intent::Clean => 1,
        Intent::Analyze | Intent::General => 0,
    }
}

fn base_steps(intent: Intent) -> usize {
    match intent {
        Intent::Refactor => 4,
        Intent::Move | Intent::Implement => 3,
        Intent::Rename | Intent::Extract | Intent::Inline | Intent::Remove | Intent::Create => 2,
        _ => 1,
    }
}

pub fn required_tools(intent: Intent) -> Vec<String> {
    let tools: &[&str] = match intent {
        Intent::Refactor => &[
            "code_context",
            "dependency_analyzer",
            "refactoring_assistant",
            "multi_file_edit",
        ],
        Intent::Rename | Intent::Extract | Intent::Move | Intent::Inline => {
            &["code_context", "refactoring_assistant"]
        }
        Intent::Create | Intent::Implement => &["code_context", "code_analysis", "str_replace_editor"],
        Intent::Remove => &["code_context", "multi_file_edit"],
        Intent::Update | Intent::Fix | Intent::Clean => &["code_context", "str_replace_editor"],
        Intent::Analyze | Intent::General => &["code_context", "dependency_analyzer"],
    };
    tools.iter().map(|s| s.to_string()).collect()
}

/// Turn a natural-language request into scope, complexity and tooling.
/// Symbol candidates resolve to files through the engine, pulling in their
/// one-hop dependents and dependencies.
pub fn analyze(request: &str, engine: Option<&CodeIntelligenceEngine>) -> TaskAnalysis {
    let intent = detect_intent(request);
    let mentioned_paths = extract_file_paths(request);
    let symbols = extract_symbols(request);
    let directories = extract_directories(request);

    let mut files: BTreeSet<PathBuf> = BTreeSet::new();
    let mut dependency_touch = 0usize;

    if let Some(engine) = engine {
        let indexed = engine.indexed_files();
        for mentioned in &mentioned_paths {
            for candidate in &indexed {
                if candidate.ends_with(mentioned.as_str())
                    || candidate.to_string_lossy().ends_with(mentioned.as_str())
                {
                    files.insert(candidate.clone());
                }
            }
        }
        for symbol in &symbols {
            for reference in engine.find_symbol(symbol) {
                let file = reference.file_path.clone();
                for neighbor in engine
                    .get_dependents(&file)
                    .into_iter()
                    .chain(engine.get_dependencies(&file))
                {
                    dependency_touch += 1;
                    files.insert(neighbor);
                }
                files.insert(file);
            }
        }
    }
    // Paths mentioned but not indexed still count toward scope.
    for mentioned in &mentioned_paths {
        if !files.iter().any(|f| f.ends_with(mentioned.as_str())) {
            files.insert(PathBuf::from(mentioned));
        }
    }

    let score = files.len() * 2 + dependency_touch + intent_weight(intent) * 2;
    let complexity = match score {
        0..=3 => Complexity::Simple,
        4..=7 => Complexity::Moderate,
        8..=14 => Complexity::Complex,
        _ => Complexity::VeryComplex,
    };

    let multiplier = match complexity {
        Complexity::Simple => 1.0,
        Complexity::Moderate => 1.5,
        Complexity::Complex => 2.0,
        Complexity::VeryComplex => 3.0,
    };
    let estimated_steps = ((base_steps(intent) as f64)
        * (files.len().clamp(1, 5) as f64)
        * multiplier)
        .round() as usize;

    let mut risks = Vec::new();
    if files.iter().any(|f| {
        f.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("main.") || n.starts_with("index.") || n.starts_with("app."))
    }) {
        risks.push("Modifies an entry-point file".to_string());
    }
    if files.len() > 10 {
        risks.push("Large change surface (more than 10 files)".to_string());
    }
    if matches!(intent, Intent::Remove | Intent::Clean) {
        risks.push("Deletions are not reversible without a snapshot".to_string());
    }

    TaskAnalysis {
        intent,
        files: files.into_iter().collect(),
        symbols,
        directories,
        complexity,
        estimated_steps: estimated_steps.max(1),
        risks,
        required_tools: required_tools(intent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_intents_by_keyword() {
        assert_eq!(detect_intent("please refactor the parser"), Intent::Refactor);
        assert_eq!(detect_intent("rename total to sum"), Intent::Rename);
        assert_eq!(detect_intent("move calculateTotal to calc.ts"), Intent::Move);
        assert_eq!(detect_intent("implement a GET endpoint"), Intent::Implement);
        assert_eq!(detect_intent("delete the legacy shim"), Intent::Remove);
        assert_eq!(detect_intent("what does this do?"), Intent::General);
    }

    #[test]
    fn extracts_file_paths_and_symbols() {
        let request = "refactor src/cart.ts and move CalculateTotal plus parseItems";
        let paths = extract_file_paths(request);
        assert_eq!(paths, vec!["src/cart.ts"]);

        let analysis = analyze(request, None);
        assert!(analysis.symbols.contains(&"CalculateTotal".to_string()));
        assert!(analysis.symbols.contains(&"parseItems".to_string()));
        assert!(analysis.files.contains(&PathBuf::from("src/cart.ts")));
    }

    #[test]
    fn refactor_with_one_file_is_at_least_moderate() {
        let analysis = analyze("refactor src/core.ts", None);
        assert_eq!(analysis.intent, Intent::Refactor);
        assert!(analysis.complexity >= Complexity::Moderate);
        assert!(analysis.estimated_steps >= 3);
        assert!(analysis
            .required_tools
            .contains(&"refactoring_assistant".to_string()));
    }

    #[test]
    fn entry_point_files_are_flagged() {
        let analysis = analyze("update main.ts to boot faster", None);
        assert!(analysis
            .risks
            .iter()
            .any(|r| r.contains("entry-point")));
    }

    #[test]
    fn remove_intent_flags_irreversibility() {
        let analysis = analyze("remove the old logger.ts", None);
        assert!(analysis.risks.iter().any(|r| r.contains("reversible")));
    }
}
