use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Bidirectional dependency index. The forward and reverse maps are kept
/// mutually consistent by construction: `B ∈ deps(A) ⇔ A ∈ dependents(B)`.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    forward: HashMap<PathBuf, BTreeSet<PathBuf>>,
    reverse: HashMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the out-edges of `file`, updating reverse buckets for both the
    /// edges that disappeared and the edges that appeared.
    pub fn set_dependencies(&mut self, file: &Path, deps: BTreeSet<PathBuf>) {
        let old = self.forward.remove(file).unwrap_or_default();

        for stale in old.difference(&deps) {
            if let Some(bucket) = self.reverse.get_mut(stale) {
                bucket.remove(file);
                if bucket.is_empty() {
                    self.reverse.remove(stale);
                }
            }
        }
        for added in deps.difference(&old) {
            self.reverse
                .entry(added.clone())
                .or_default()
                .insert(file.to_path_buf());
        }

        if !deps.is_empty() {
            self.forward.insert(file.to_path_buf(), deps);
        }
    }

    /// Evict a deleted file: its out-edges vanish from both maps. In-edges
    /// from files that still import it are left in place so the invariant
    /// holds for their (now dangling) forward sets.
    pub fn remove_file(&mut self, file: &Path) {
        let old = self.forward.remove(file).unwrap_or_default();
        for dep in &old {
            if let Some(bucket) = self.reverse.get_mut(dep) {
                bucket.remove(file);
                if bucket.is_empty() {
                    self.reverse.remove(dep);
                }
            }
        }
    }

    pub fn dependencies(&self, file: &Path) -> BTreeSet<PathBuf> {
        self.forward.get(file).cloned().unwrap_or_default()
    }

    pub fn dependents(&self, file: &Path) -> BTreeSet<PathBuf> {
        self.reverse.get(file).cloned().unwrap_or_default()
    }

    pub fn edge_count(&self) -> usize {
        self.forward.values().map(|s| s.len()).sum()
    }

    /// Verifies the forward/reverse invariant; test support.
    pub fn is_consistent(&self) -> bool {
        for (file, deps) in &self.forward {
            for dep in deps {
                if !self
                    .reverse
                    .get(dep)
                    .map(|b| b.contains(file))
                    .unwrap_or(false)
                {
                    return false;
                }
            }
        }
        for (file, dependents) in &self.reverse {
            for dependent in dependents {
                if !self
                    .forward
                    .get(dependent)
                    .map(|b| b.contains(file))
                    .unwrap_or(false)
                {
                    return false;
                }
            }
        }
        true
    }
}
