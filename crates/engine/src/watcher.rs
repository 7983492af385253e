use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Result;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsChange {
    Upsert(PathBuf),
    Remove(PathBuf),
}

pub type ChangeHandler = Arc<dyn Fn(FsChange) + Send + Sync>;

/// Filesystem watcher with per-path debounce. A new event for a path
/// replaces that path's pending timer; events for distinct paths are never
/// coalesced. Removals bypass the debounce.
pub struct EngineWatcher {
    _watcher: RecommendedWatcher,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl EngineWatcher {
    pub fn start(
        root: &Path,
        debounce: Duration,
        settle: Duration,
        handler: ChangeHandler,
    ) -> Result<Self> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<FsChange>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    for path in event.paths {
                        let change = match event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) => {
                                FsChange::Upsert(path)
                            }
                            EventKind::Remove(_) => FsChange::Remove(path),
                            _ => continue,
                        };
                        let _ = tx.send(change);
                    }
                }
                Err(e) => tracing::warn!("file watcher error: {e}"),
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let dispatcher = tokio::spawn(async move {
            let mut pending: HashMap<PathBuf, tokio::task::JoinHandle<()>> = HashMap::new();
            while let Some(change) = rx.recv().await {
                pending.retain(|_, timer| !timer.is_finished());
                match change {
                    FsChange::Remove(path) => {
                        if let Some(timer) = pending.remove(&path) {
                            timer.abort();
                        }
                        handler(FsChange::Remove(path));
                    }
                    FsChange::Upsert(path) => {
                        if let Some(timer) = pending.remove(&path) {
                            timer.abort();
                        }
                        let handler = handler.clone();
                        let debounced_path = path.clone();
                        let timer = tokio::spawn(async move {
                            tokio::time::sleep(debounce).await;
                            wait_for_settle(&debounced_path, settle).await;
                            handler(FsChange::Upsert(debounced_path));
                        });
                        pending.insert(path, timer);
                    }
                }
            }
        });

        Ok(Self {
            _watcher: watcher,
            dispatcher,
        })
    }

    pub fn stop(self) {
        self.dispatcher.abort();
    }
}

fn stat(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

/// Write stability: re-stat until two observations agree (bounded).
async fn wait_for_settle(path: &Path, settle: Duration) {
    for _ in 0..5 {
        let before = stat(path);
        tokio::time::sleep(settle).await;
        let after = stat(path);
        if before == after {
            return;
        }
    }
}
