//! File watcher for hot reloading prefab scripts
//!
//! Reports changes to watched `.rhai` files so the engine can recompile them
//! and rebind live instances.

use anyhow::{Result, anyhow};
use notify::RecursiveMode;
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;

/// Default debounce window
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

/// Event emitted when a watched script changes
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A watched script was written
    Modified(PathBuf),
    /// The watcher itself failed
    Error(String),
}

/// Watches prefab scripts for changes
pub struct ScriptWatcher {
    debouncer: Debouncer<notify::RecommendedWatcher>,
    receiver: Receiver<WatchEvent>,
    watched: Arc<Mutex<Vec<PathBuf>>>,
}

impl ScriptWatcher {
    pub fn new(debounce: Duration) -> Result<Self> {
        let (tx, rx) = channel();
        let watched: Arc<Mutex<Vec<PathBuf>>> = Arc::new(Mutex::new(Vec::new()));
        let filter = Arc::clone(&watched);

        let debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    let watched = filter.lock();
                    for event in events {
                        let path = event.path;
                        let is_script = path.extension().is_some_and(|e| e == "rhai");
                        let is_watched = watched.iter().any(|p| path == *p || path.starts_with(p));
                        if is_watched && (is_script || watched.contains(&path)) {
                            // Debounced events do not distinguish kinds
                            let _ = tx.send(WatchEvent::Modified(path));
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(WatchEvent::Error(format!("watch error: {e:?}")));
                }
            }
        })
        .map_err(|e| anyhow!("Failed to create file watcher: {:?}", e))?;

        Ok(Self {
            debouncer,
            receiver: rx,
            watched,
        })
    }

    /// Watch a script file, or every script in a directory
    pub fn watch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|e| anyhow!("Failed to watch path {}: {}", path.display(), e))?;

        {
            let mut watched = self.watched.lock();
            if !watched.contains(&canonical) {
                watched.push(canonical.clone());
            }
        }

        self.debouncer
            .watcher()
            .watch(&canonical, RecursiveMode::NonRecursive)
            .map_err(|e| anyhow!("Failed to watch path {}: {}", canonical.display(), e))?;

        tracing::info!(path = %canonical.display(), "watching script");
        Ok(())
    }

    pub fn unwatch(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.watched.lock().retain(|p| p != &canonical);

        self.debouncer
            .watcher()
            .unwatch(&canonical)
            .map_err(|e| anyhow!("Failed to unwatch path {}: {}", canonical.display(), e))
    }

    /// Paths currently watched
    pub fn watched(&self) -> Vec<PathBuf> {
        self.watched.lock().clone()
    }

    /// Try to receive a watch event (non-blocking)
    pub fn try_recv(&self) -> Option<WatchEvent> {
        self.receiver.try_recv().ok()
    }

    /// Receive a watch event with timeout
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WatchEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Get all pending events
    pub fn drain_events(&self) -> Vec<WatchEvent> {
        self.receiver.try_iter().collect()
    }

    /// Distinct scripts modified since the last call; errors are logged
    pub fn changed_scripts(&self) -> Vec<PathBuf> {
        let mut changed: Vec<PathBuf> = Vec::new();
        for event in self.drain_events() {
            match event {
                WatchEvent::Modified(path) => {
                    if !changed.contains(&path) {
                        changed.push(path);
                    }
                }
                WatchEvent::Error(message) => tracing::warn!("{message}"),
            }
        }
        changed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_watcher_creation() {
        let watcher = ScriptWatcher::new(DEFAULT_DEBOUNCE);
        assert!(watcher.is_ok());
    }

    #[test]
    fn test_watch_nonexistent() {
        let mut watcher = ScriptWatcher::new(DEFAULT_DEBOUNCE).unwrap();
        let result = watcher.watch("/nonexistent/path/test.rhai");
        assert!(result.is_err());
        assert!(watcher.watched().is_empty());
        assert!(watcher.changed_scripts().is_empty());
    }
}
