use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::graph::DependencyGraph;
use crate::types::{CrossReference, ImpactReport, ImpactRisk};

const MAX_RECORDED_CYCLES: usize = 16;

/// Compute the blast radius of changing `file` (or one `symbol` within it).
/// With a symbol the affected set comes from its cross-reference; without
/// one it is the file plus its direct dependents.
pub fn analyze(
    file: &Path,
    symbol_xref: Option<&CrossReference>,
    file_symbols: &[String],
    graph: &DependencyGraph,
) -> ImpactReport {
    let (affected_files, affected_symbols) = match symbol_xref {
        Some(xref) => {
            let mut files: BTreeSet<PathBuf> = xref
                .references
                .iter()
                .map(|r| r.file_path.clone())
                .collect();
            if let Some(def) = &xref.definition {
                files.insert(def.file_path.clone());
            }
            (files, vec![xref.symbol.clone()])
        }
        None => {
            let mut files = graph.dependents(file);
            files.insert(file.to_path_buf());
            (files, file_symbols.to_vec())
        }
    };

    let cycles = find_cycles(file, &affected_files, graph);

    let mut warnings = Vec::new();
    if affected_files.len() > 10 {
        warnings.push("Large number of affected files".to_string());
    }
    if !cycles.is_empty() {
        warnings.push("Circular dependencies detected among affected files".to_string());
    }

    let risk = if affected_files.len() > 10 || !cycles.is_empty() {
        ImpactRisk::High
    } else if affected_files.len() > 5 || affected_symbols.len() > 10 {
        ImpactRisk::Medium
    } else {
        ImpactRisk::Low
    };

    ImpactReport {
        affected_files: affected_files.into_iter().collect(),
        affected_symbols,
        cycles,
        risk,
        warnings,
    }
}

/// DFS over dependency edges restricted to the affected set; a back-edge to
/// a node on the current path records the cycle as an ordered list.
fn find_cycles(
    start: &Path,
    affected: &BTreeSet<PathBuf>,
    graph: &DependencyGraph,
) -> Vec<Vec<PathBuf>> {
    let mut cycles = Vec::new();
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    dfs(start, affected, graph, &mut visited, &mut path, &mut cycles);
    cycles
}

fn dfs(
    node: &Path,
    affected: &BTreeSet<PathBuf>,
    graph: &DependencyGraph,
    visited: &mut HashSet<PathBuf>,
    path: &mut Vec<PathBuf>,
    cycles: &mut Vec<Vec<PathBuf>>,
) {
    if cycles.len() >= MAX_RECORDED_CYCLES {
        return;
    }
    if let Some(pos) = path.iter().position(|p| p == node) {
        let mut cycle: Vec<PathBuf> = path[pos..].to_vec();
        cycle.push(node.to_path_buf());
        cycles.push(cycle);
        return;
    }
    if !visited.insert(node.to_path_buf()) {
        return;
    }

    path.push(node.to_path_buf());
    for dep in graph.dependencies(node) {
        if affected.contains(&dep) {
            dfs(&dep, affected, graph, visited, path, cycles);
        }
    }
    path.pop();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn direct_dependents_plus_self() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("a.ts"), [p("core.ts")].into());
        graph.set_dependencies(&p("b.ts"), [p("core.ts")].into());

        let report = analyze(&p("core.ts"), None, &["init".into()], &graph);
        assert_eq!(report.affected_files.len(), 3);
        assert_eq!(report.risk, ImpactRisk::Low);
        assert!(report.cycles.is_empty());
    }

    #[test]
    fn many_dependents_is_high_risk() {
        let mut graph = DependencyGraph::new();
        for i in 0..12 {
            graph.set_dependencies(&p(&format!("user{i}.ts")), [p("core.ts")].into());
        }
        let report = analyze(&p("core.ts"), None, &[], &graph);
        assert_eq!(report.affected_files.len(), 13);
        assert_eq!(report.risk, ImpactRisk::High);
        assert!(report
            .warnings
            .iter()
            .any(|w| w == "Large number of affected files"));
    }

    #[test]
    fn cycle_detection_flags_high_risk() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(&p("a.ts"), [p("b.ts")].into());
        graph.set_dependencies(&p("b.ts"), [p("a.ts")].into());

        let report = analyze(&p("a.ts"), None, &[], &graph);
        assert!(!report.cycles.is_empty());
        assert_eq!(report.risk, ImpactRisk::High);
        let cycle = &report.cycles[0];
        assert_eq!(cycle.first(), cycle.last());
    }

    #[test]
    fn six_files_is_medium_risk() {
        let mut graph = DependencyGraph::new();
        for i in 0..5 {
            graph.set_dependencies(&p(&format!("user{i}.ts")), [p("core.ts")].into());
        }
        let report = analyze(&p("core.ts"), None, &[], &graph);
        assert_eq!(report.affected_files.len(), 6);
        assert_eq!(report.risk, ImpactRisk::Medium);
    }
}
