use std::collections::HashMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::language::Language;

/// 0-based source position. Surfaced 1-based only at UI boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub column: usize,
}

impl Position {
    pub fn new(row: usize, column: usize) -> Self {
        Self { row, column }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Class,
    Method,
    Variable,
    Interface,
    Enum,
    Type,
    Property,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolModifiers {
    pub is_static: bool,
    pub is_async: bool,
    pub accessibility: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Shallow hint from an explicit annotation; never inferred here.
    pub type_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub start: Position,
    pub end: Position,
    /// Path-style scope, e.g. `global` or `Printer.flush`.
    pub scope: String,
    pub modifiers: SymbolModifiers,
    pub parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageKind {
    Definition,
    Call,
    Reference,
    Import,
    Export,
}

/// One occurrence of a symbol inside a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolUsage {
    pub line: usize,
    pub column: usize,
    pub context: String,
    pub kind: UsageKind,
}

/// A symbol together with the file that defines it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolReference {
    pub symbol: Symbol,
    pub file_path: PathBuf,
    pub usages: Vec<SymbolUsage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSite {
    pub file_path: PathBuf,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSite {
    pub file_path: PathBuf,
    pub line: usize,
    pub column: usize,
    pub context: String,
    pub kind: UsageKind,
}

/// Symbol-centric view: where it is defined and every site that mentions it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub symbol: String,
    pub definition: Option<DefinitionSite>,
    pub references: Vec<ReferenceSite>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub language: Language,
    #[serde(skip, default = "SystemTime::now")]
    pub last_modified: SystemTime,
    pub content_hash: String,
    pub parse_time_ms: u64,
    pub indexed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseIssue {
    pub message: String,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactReport {
    pub affected_files: Vec<PathBuf>,
    pub affected_symbols: Vec<String>,
    pub cycles: Vec<Vec<PathBuf>>,
    pub risk: ImpactRisk,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub files: usize,
    pub symbols: usize,
    pub dependency_edges: usize,
    pub files_with_parse_errors: usize,
    pub languages: HashMap<String, usize>,
    pub total_parse_time_ms: u64,
}
