use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
    Python,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension().and_then(|e| e.to_str())?;
        match ext {
            "ts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "mjs" | "cjs" => Some(Language::JavaScript),
            "jsx" => Some(Language::Jsx),
            "py" => Some(Language::Python),
            _ => None,
        }
    }

    pub fn is_script(self) -> bool {
        !matches!(self, Language::Python)
    }

    pub fn name(self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Jsx => "jsx",
            Language::Python => "python",
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            // JSX needs the TSX grammar's element productions.
            Language::Tsx | Language::Jsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
        }
    }

    /// Build a configured parser. Parsers are cheap to construct and not
    /// shareable across threads, so callers create one per parse.
    pub fn parser(self) -> Result<Parser, anyhow::Error> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.grammar())
            .map_err(|e| anyhow::anyhow!("failed to load {} grammar: {e}", self.name()))?;
        Ok(parser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_language_by_extension() {
        assert_eq!(Language::from_path(Path::new("a.ts")), Some(Language::TypeScript));
        assert_eq!(Language::from_path(Path::new("a.tsx")), Some(Language::Tsx));
        assert_eq!(Language::from_path(Path::new("a.jsx")), Some(Language::Jsx));
        assert_eq!(Language::from_path(Path::new("b.mjs")), Some(Language::JavaScript));
        assert_eq!(Language::from_path(Path::new("c.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("d.rs")), None);
        assert_eq!(Language::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn builds_parsers_for_all_languages() {
        for lang in [
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Jsx,
            Language::Python,
        ] {
            assert!(lang.parser().is_ok(), "no parser for {}", lang.name());
        }
    }
}
