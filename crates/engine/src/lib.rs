pub mod graph;
pub mod impact;
pub mod imports;
pub mod language;
pub mod scan;
pub mod symbols;
pub mod types;
pub mod watcher;
pub mod xref;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tree_sitter::Tree;

use graph::DependencyGraph;
pub use language::Language;
use scan::ScanFilter;
pub use types::{
    CrossReference, DefinitionSite, EngineStats, FileMetadata, ImpactReport, ImpactRisk,
    Parameter, ParseIssue, Position, ReferenceSite, Symbol, SymbolKind, SymbolModifiers,
    SymbolReference, SymbolUsage, UsageKind,
};
use watcher::{EngineWatcher, FsChange};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub update_debounce_ms: u64,
    pub settle_ms: u64,
    pub batch_size: usize,
    pub watch: bool,
}

impl EngineConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            include: scan::DEFAULT_INCLUDE.map(String::from).to_vec(),
            exclude: scan::DEFAULT_EXCLUDE.map(String::from).to_vec(),
            update_debounce_ms: 300,
            settle_ms: 200,
            batch_size: 10,
            watch: true,
        }
    }
}

#[derive(Default)]
struct IndexState {
    sources: HashMap<PathBuf, String>,
    asts: HashMap<PathBuf, Tree>,
    metadata: HashMap<PathBuf, FileMetadata>,
    file_symbols: HashMap<PathBuf, Vec<Symbol>>,
    symbol_index: HashMap<String, Vec<SymbolReference>>,
    graph: DependencyGraph,
    xrefs: HashMap<String, CrossReference>,
    parse_errors: HashMap<PathBuf, Vec<ParseIssue>>,
}

/// Everything derived from one file read, computed outside the index lock.
struct ParsedFile {
    path: PathBuf,
    relative: PathBuf,
    language: Language,
    source: String,
    hash: String,
    modified: SystemTime,
    tree: Option<Tree>,
    issues: Vec<ParseIssue>,
    symbols: Vec<Symbol>,
    dependencies: BTreeSet<PathBuf>,
    parse_ms: u64,
}

/// Index plus the bits the watcher callback needs; shared between the
/// engine handle and the watcher closure.
struct EngineShared {
    config: EngineConfig,
    filter: ScanFilter,
    state: Mutex<IndexState>,
}

/// In-memory symbol graph over a source tree, kept current by the file
/// watcher. All queries are synchronous reads over the current index; every
/// mutation swaps a file's entries in one critical section so readers never
/// observe a half-updated file.
pub struct CodeIntelligenceEngine {
    shared: Arc<EngineShared>,
    ready: AtomicBool,
    watcher: Mutex<Option<EngineWatcher>>,
}

impl CodeIntelligenceEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let filter = ScanFilter::new(&config.include, &config.exclude)?;
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                filter,
                state: Mutex::new(IndexState::default()),
            }),
            ready: AtomicBool::new(false),
            watcher: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.shared.config.root
    }

    fn state(&self) -> std::sync::MutexGuard<'_, IndexState> {
        self.shared.state.lock().expect("engine index poisoned")
    }

    /// Cold start: scan, parse in bounded batches, build the cross-reference
    /// table, then start watching. The engine answers queries (with partial
    /// data) during indexing but only reports ready once the pass completes.
    pub async fn initialize(&self) -> Result<EngineStats> {
        let started = Instant::now();
        let config = &self.shared.config;
        let files = scan::scan_root(&config.root, &self.shared.filter);
        tracing::info!("indexing {} files under {}", files.len(), config.root.display());

        for batch in files.chunks(config.batch_size.max(1)) {
            let tasks = batch.iter().map(|path| {
                let path = path.clone();
                let root = config.root.clone();
                tokio::task::spawn_blocking(move || parse_file(&path, &root))
            });
            let parsed = join_all(tasks).await;

            let mut state = self.state();
            for result in parsed {
                match result {
                    Ok(Some(file)) => insert_file(&mut state, file),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("parse task failed: {e}"),
                }
            }
        }

        {
            let mut state = self.state();
            let names: Vec<String> = state.symbol_index.keys().cloned().collect();
            rebuild_xrefs(&mut state, &names);
        }

        if config.watch {
            self.start_watcher()
                .context("failed to start file watcher")?;
        }

        self.ready.store(true, Ordering::SeqCst);
        let stats = self.stats();
        tracing::info!(
            "indexed {} files, {} symbols in {}ms",
            stats.files,
            stats.symbols,
            started.elapsed().as_millis()
        );
        Ok(stats)
    }

    fn start_watcher(&self) -> Result<()> {
        let weak: Weak<EngineShared> = Arc::downgrade(&self.shared);
        let handler: watcher::ChangeHandler = Arc::new(move |change| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            match change {
                FsChange::Upsert(path) => apply_change_impl(&shared, &path),
                FsChange::Remove(path) => apply_unlink_impl(&shared, &path),
            }
        });
        let watcher = EngineWatcher::start(
            &self.shared.config.root,
            Duration::from_millis(self.shared.config.update_debounce_ms),
            Duration::from_millis(self.shared.config.settle_ms),
            handler,
        )?;
        *self.watcher.lock().expect("watcher slot poisoned") = Some(watcher);
        Ok(())
    }

    /// Stop watching and drop the indexes. The engine reports unready until
    /// a fresh `initialize`.
    pub fn dispose(&self) {
        self.ready.store(false, Ordering::SeqCst);
        if let Some(watcher) = self.watcher.lock().expect("watcher slot poisoned").take() {
            watcher.stop();
        }
        *self.state() = IndexState::default();
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Re-index one file after a change. Hash-stable content is a no-op.
    pub fn apply_change(&self, path: &Path) {
        apply_change_impl(&self.shared, path);
    }

    /// Evict a deleted file from every index.
    pub fn apply_unlink(&self, path: &Path) {
        apply_unlink_impl(&self.shared, path);
    }

    pub fn find_symbol(&self, name: &str) -> Vec<SymbolReference> {
        let state = self.state();
        state.symbol_index.get(name).cloned().unwrap_or_default()
    }

    pub fn find_symbol_by_pattern(
        &self,
        pattern: &str,
        case_sensitive: bool,
    ) -> Vec<SymbolReference> {
        let pattern = if case_sensitive {
            pattern.to_string()
        } else {
            format!("(?i){pattern}")
        };
        let Ok(re) = regex::Regex::new(&pattern) else {
            return Vec::new();
        };
        let state = self.state();
        let mut out = Vec::new();
        for (name, refs) in &state.symbol_index {
            if re.is_match(name) {
                out.extend(refs.iter().cloned());
            }
        }
        out.sort_by(|a, b| a.symbol.name.cmp(&b.symbol.name));
        out
    }

    pub fn find_references(&self, name: &str) -> Option<CrossReference> {
        let state = self.state();
        state.xrefs.get(name).cloned()
    }

    pub fn get_ast(&self, path: &Path) -> Option<Tree> {
        let state = self.state();
        state.asts.get(path).cloned()
    }

    pub fn get_dependencies(&self, path: &Path) -> Vec<PathBuf> {
        let state = self.state();
        state.graph.dependencies(path).into_iter().collect()
    }

    pub fn get_dependents(&self, path: &Path) -> Vec<PathBuf> {
        let state = self.state();
        state.graph.dependents(path).into_iter().collect()
    }

    pub fn get_file_symbols(&self, path: &Path) -> Vec<Symbol> {
        let state = self.state();
        state.file_symbols.get(path).cloned().unwrap_or_default()
    }

    pub fn get_file_metadata(&self, path: &Path) -> Option<FileMetadata> {
        let state = self.state();
        state.metadata.get(path).cloned()
    }

    pub fn get_parse_errors(&self, path: Option<&Path>) -> HashMap<PathBuf, Vec<ParseIssue>> {
        let state = self.state();
        match path {
            Some(path) => state
                .parse_errors
                .get(path)
                .filter(|issues| !issues.is_empty())
                .map(|issues| HashMap::from([(path.to_path_buf(), issues.clone())]))
                .unwrap_or_default(),
            None => state
                .parse_errors
                .iter()
                .filter(|(_, issues)| !issues.is_empty())
                .map(|(p, issues)| (p.clone(), issues.clone()))
                .collect(),
        }
    }

    pub fn file_source(&self, path: &Path) -> Option<String> {
        let state = self.state();
        state.sources.get(path).cloned()
    }

    pub fn indexed_files(&self) -> Vec<PathBuf> {
        let state = self.state();
        let mut files: Vec<PathBuf> = state.metadata.keys().cloned().collect();
        files.sort();
        files
    }

    pub fn analyze_impact(&self, path: &Path, symbol: Option<&str>) -> ImpactReport {
        let state = self.state();
        let xref = symbol.and_then(|name| state.xrefs.get(name));
        let file_symbols: Vec<String> = state
            .file_symbols
            .get(path)
            .map(|syms| syms.iter().map(|s| s.name.clone()).collect())
            .unwrap_or_default();
        impact::analyze(path, xref, &file_symbols, &state.graph)
    }

    pub fn stats(&self) -> EngineStats {
        let state = self.state();
        let mut languages: HashMap<String, usize> = HashMap::new();
        for meta in state.metadata.values() {
            *languages.entry(meta.language.name().to_string()).or_default() += 1;
        }
        EngineStats {
            files: state.metadata.len(),
            symbols: state.file_symbols.values().map(|s| s.len()).sum(),
            dependency_edges: state.graph.edge_count(),
            files_with_parse_errors: state
                .parse_errors
                .values()
                .filter(|issues| !issues.is_empty())
                .count(),
            languages,
            total_parse_time_ms: state.metadata.values().map(|m| m.parse_time_ms).sum(),
        }
    }
}

fn apply_change_impl(shared: &EngineShared, path: &Path) {
    let Ok(relative) = path.strip_prefix(&shared.config.root) else {
        return;
    };
    if !shared.filter.matches(relative) {
        return;
    }

    let parsed = match parse_file(path, &shared.config.root) {
        Some(parsed) => parsed,
        None => return,
    };

    let mut state = shared.state.lock().expect("engine index poisoned");
    if let Some(existing) = state.metadata.get(path) {
        if existing.content_hash == parsed.hash {
            return;
        }
    }

    let old_names = remove_file_entries(&mut state, path);
    let new_names: HashSet<String> = parsed.symbols.iter().map(|s| s.name.clone()).collect();
    insert_file(&mut state, parsed);

    let union: Vec<String> = old_names.union(&new_names).cloned().collect();
    rebuild_xrefs(&mut state, &union);
}

fn apply_unlink_impl(shared: &EngineShared, path: &Path) {
    let mut state = shared.state.lock().expect("engine index poisoned");
    if !state.metadata.contains_key(path) {
        return;
    }
    let old_names = remove_file_entries(&mut state, path);
    state.graph.remove_file(path);
    let names: Vec<String> = old_names.into_iter().collect();
    rebuild_xrefs(&mut state, &names);
}

fn hash_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

fn parse_file(path: &Path, root: &Path) -> Option<ParsedFile> {
    let language = Language::from_path(path)?;
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("unreadable file {}: {e}", path.display());
            return None;
        }
    };
    let source = String::from_utf8_lossy(&bytes).into_owned();
    let hash = hash_content(&source);
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or_else(|_| SystemTime::now());

    let started = Instant::now();
    let mut issues = Vec::new();
    let tree = match language.parser() {
        Ok(mut parser) => parser.parse(&source, None),
        Err(e) => {
            issues.push(ParseIssue {
                message: e.to_string(),
                position: Position::new(0, 0),
            });
            None
        }
    };
    let parse_ms = started.elapsed().as_millis() as u64;

    let (symbols, dependencies) = match &tree {
        Some(tree) => {
            collect_parse_issues(tree, &mut issues);
            let symbols = symbols::extract_symbols(language, tree, &source);
            let file_imports = imports::extract_imports(language, tree, &source);
            let dependencies = file_imports
                .imports
                .iter()
                .filter_map(|import| imports::resolve_relative(path, &import.source))
                .collect();
            (symbols, dependencies)
        }
        None => {
            if issues.is_empty() {
                issues.push(ParseIssue {
                    message: "parser produced no tree".to_string(),
                    position: Position::new(0, 0),
                });
            }
            (Vec::new(), BTreeSet::new())
        }
    };

    let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    Some(ParsedFile {
        path: path.to_path_buf(),
        relative,
        language,
        source,
        hash,
        modified,
        tree,
        issues,
        symbols,
        dependencies,
        parse_ms,
    })
}

fn collect_parse_issues(tree: &Tree, issues: &mut Vec<ParseIssue>) {
    if !tree.root_node().has_error() {
        return;
    }
    let mut stack = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let point = node.start_position();
            issues.push(ParseIssue {
                message: if node.is_missing() {
                    format!("missing {}", node.kind())
                } else {
                    "syntax error".to_string()
                },
                position: Position::new(point.row, point.column),
            });
            continue;
        }
        if node.has_error() {
            for i in 0..node.child_count() {
                if let Some(child) = node.child(i) {
                    stack.push(child);
                }
            }
        }
    }
}

fn insert_file(state: &mut IndexState, file: ParsedFile) {
    let path = file.path.clone();

    for symbol in &file.symbols {
        let usage = SymbolUsage {
            line: symbol.start.row,
            column: symbol.start.column,
            context: file
                .source
                .lines()
                .nth(symbol.start.row)
                .unwrap_or("")
                .trim()
                .to_string(),
            kind: UsageKind::Definition,
        };
        state
            .symbol_index
            .entry(symbol.name.clone())
            .or_default()
            .push(SymbolReference {
                symbol: symbol.clone(),
                file_path: path.clone(),
                usages: vec![usage],
            });
    }

    state.graph.set_dependencies(&path, file.dependencies);
    state.file_symbols.insert(path.clone(), file.symbols);
    state.parse_errors.insert(path.clone(), file.issues);
    if let Some(tree) = file.tree {
        state.asts.insert(path.clone(), tree);
    }
    state.sources.insert(path.clone(), file.source);
    state.metadata.insert(
        path.clone(),
        FileMetadata {
            relative_path: file.relative,
            absolute_path: path,
            language: file.language,
            last_modified: file.modified,
            content_hash: file.hash,
            parse_time_ms: file.parse_ms,
            indexed: true,
        },
    );
}

/// Drop every per-file entry except dependency edges (callers own those:
/// a change recomputes them, an unlink removes them).
fn remove_file_entries(state: &mut IndexState, path: &Path) -> HashSet<String> {
    state.sources.remove(path);
    state.asts.remove(path);
    state.metadata.remove(path);
    state.parse_errors.remove(path);

    let old_symbols = state.file_symbols.remove(path).unwrap_or_default();
    let old_names: HashSet<String> = old_symbols.into_iter().map(|s| s.name).collect();

    for name in &old_names {
        if let Some(bucket) = state.symbol_index.get_mut(name) {
            bucket.retain(|r| r.file_path != path);
            if bucket.is_empty() {
                state.symbol_index.remove(name);
            }
        }
    }
    old_names
}

fn rebuild_xrefs(state: &mut IndexState, names: &[String]) {
    let files: Vec<(PathBuf, String)> = state
        .sources
        .iter()
        .map(|(p, s)| (p.clone(), s.clone()))
        .collect();

    for name in names {
        match state.symbol_index.get(name) {
            Some(bucket) => {
                let definition = bucket.first().map(|reference| DefinitionSite {
                    file_path: reference.file_path.clone(),
                    position: reference.symbol.start,
                });
                let xref = xref::build_cross_reference(name, definition, &files);
                state.xrefs.insert(name.clone(), xref);
            }
            None => {
                state.xrefs.remove(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_for(files: &[(&str, &str)]) -> (tempfile::TempDir, Arc<CodeIntelligenceEngine>) {
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
    async fn indexes_symbols_and_dependencies() {
        let (dir, engine) = engine_for(&[
            (
                "src/u/math.ts",
                "export function calculateTotal(items: number[]): number { return 0; }\n",
            ),
            (
                "src/cart.ts",
                "import { calculateTotal } from './u/math';\nconst total = calculateTotal([]);\n",
            ),
        ])
        .await;

        assert!(engine.is_ready());
        let refs = engine.find_symbol("calculateTotal");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].file_path, dir.path().join("src/u/math.ts"));

        let deps = engine.get_dependencies(&dir.path().join("src/cart.ts"));
        assert_eq!(deps, vec![dir.path().join("src/u/math.ts")]);
        let dependents = engine.get_dependents(&dir.path().join("src/u/math.ts"));
        assert_eq!(dependents, vec![dir.path().join("src/cart.ts")]);

        let xref = engine.find_references("calculateTotal").unwrap();
        assert!(xref.definition.is_some());
        assert!(xref
            .references
            .iter()
            .any(|r| r.kind == UsageKind::Import));
        assert!(xref.references.iter().any(|r| r.kind == UsageKind::Call));
    }

    #[tokio::test]
    async fn hash_stable_change_is_a_noop() {
        let (dir, engine) = engine_for(&[("a.ts", "const a = 1;\n")]).await;
        let path = dir.path().join("a.ts");
        let before = engine.get_file_metadata(&path).unwrap();

        engine.apply_change(&path);
        let after = engine.get_file_metadata(&path).unwrap();
        assert_eq!(before.content_hash, after.content_hash);
        assert_eq!(before.parse_time_ms, after.parse_time_ms);
    }

    #[tokio::test]
    async fn change_swaps_symbols_and_edges() {
        let (dir, engine) = engine_for(&[
            ("util.ts", "export function oldName() {}\n"),
            ("other.ts", "export const unrelated = 1;\n"),
        ])
        .await;
        let path = dir.path().join("util.ts");

        std::fs::write(
            &path,
            "import { unrelated } from './other';\nexport function newName() {}\n",
        )
        .unwrap();
        engine.apply_change(&path);

        assert!(engine.find_symbol("oldName").is_empty());
        assert_eq!(engine.find_symbol("newName").len(), 1);
        assert!(engine.find_references("oldName").is_none());
        assert!(engine.find_references("newName").is_some());
        assert_eq!(
            engine.get_dependencies(&path),
            vec![dir.path().join("other.ts")]
        );
        assert_eq!(
            engine.get_dependents(&dir.path().join("other.ts")),
            vec![path]
        );
    }

    #[tokio::test]
    async fn unlink_then_readd_restores_indexes() {
        let files = [
            ("lib.ts", "export function shared() {}\n"),
            ("use.ts", "import { shared } from './lib';\nshared();\n"),
        ];
        let (dir, engine) = engine_for(&files).await;
        let lib = dir.path().join("lib.ts");

        let symbols_before = engine.find_symbol("shared");
        let xref_before = engine.find_references("shared").unwrap();
        let deps_before = engine.get_dependencies(&dir.path().join("use.ts"));

        engine.apply_unlink(&lib);
        assert!(engine.find_symbol("shared").is_empty());
        assert!(engine.get_file_metadata(&lib).is_none());
        assert!(engine.get_dependencies(&lib).is_empty());

        engine.apply_change(&lib);
        assert_eq!(engine.find_symbol("shared"), symbols_before);
        assert_eq!(engine.find_references("shared").unwrap(), xref_before);
        assert_eq!(engine.get_dependencies(&dir.path().join("use.ts")), deps_before);
    }

    #[tokio::test]
    async fn parse_errors_are_non_fatal() {
        let (dir, engine) = engine_for(&[
            ("bad.ts", "function ( {{{\n"),
            ("good.ts", "export const fine = 1;\n"),
        ])
        .await;

        let errors = engine.get_parse_errors(None);
        assert!(errors.contains_key(&dir.path().join("bad.ts")));
        assert_eq!(engine.find_symbol("fine").len(), 1);
        assert_eq!(engine.stats().files, 2);
    }

    #[tokio::test]
    async fn impact_analysis_counts_dependents() {
        let mut files: Vec<(String, String)> = vec![(
            "core.ts".to_string(),
            "export function init() {}\n".to_string(),
        )];
        for i in 0..12 {
            files.push((
                format!("user{i}.ts"),
                "import { init } from './core';\ninit();\n".to_string(),
            ));
        }
        let borrowed: Vec<(&str, &str)> = files
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let (dir, engine) = engine_for(&borrowed).await;

        let report = engine.analyze_impact(&dir.path().join("core.ts"), None);
        assert_eq!(report.affected_files.len(), 13);
        assert_eq!(report.risk, ImpactRisk::High);
        assert!(report
            .warnings
            .iter()
            .any(|w| w == "Large number of affected files"));
    }

    #[tokio::test]
    async fn pattern_search_respects_case_flag() {
        let (_dir, engine) = engine_for(&[(
            "a.ts",
            "export function fetchUser() {}\nexport function FetchAll() {}\n",
        )])
        .await;

        let insensitive = engine.find_symbol_by_pattern("^fetch", false);
        assert_eq!(insensitive.len(), 2);
        let sensitive = engine.find_symbol_by_pattern("^fetch", true);
        assert_eq!(sensitive.len(), 1);
        assert_eq!(sensitive[0].symbol.name, "fetchUser");
    }

    #[tokio::test]
    async fn dispose_clears_everything() {
        let (_dir, engine) = engine_for(&[("a.ts", "const a = 1;\n")]).await;
        assert!(engine.is_ready());
        engine.dispose();
        assert!(!engine.is_ready());
        assert_eq!(engine.stats().files, 0);
        assert!(engine.find_symbol("a").is_empty());
    }

    #[tokio::test]
    async fn same_name_in_two_files_keeps_both_entries() {
        let (dir, engine) = engine_for(&[
            ("a.ts", "export function setup() {}\n"),
            ("b.ts", "export function setup() {}\n"),
        ])
        .await;

        let refs = engine.find_symbol("setup");
        assert_eq!(refs.len(), 2);

        engine.apply_unlink(&dir.path().join("a.ts"));
        let refs = engine.find_symbol("setup");
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].file_path, dir.path().join("b.ts"));
        // The cross-reference now points at the surviving definition.
        let xref = engine.find_references("setup").unwrap();
        assert_eq!(
            xref.definition.unwrap().file_path,
            dir.path().join("b.ts")
        );
    }
}
