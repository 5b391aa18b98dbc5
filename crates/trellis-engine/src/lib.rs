//! Trellis Engine - runtime for script-defined prefabs
//!
//! The Engine is a thin orchestration layer that coordinates trellis-script
//! and the trellis-core prefab runtime: it loads a prefab script, instantiates
//! its prefabs, applies field changes, steps deferred rebuilds and reloads the
//! script when it changes on disk.
//!
//! ## Example
//!
//! ```ignore
//! use trellis_engine::Engine;
//!
//! let mut engine = Engine::default();
//! engine.load_script(Path::new("demos/beam.rhai"))?;
//!
//! let beam = engine.instantiate("beam", "main_beam")?;
//! engine.assign(beam, "segments=8")?;
//! engine.step();
//!
//! println!("{}", engine.print_tree(beam)?);
//! ```

pub mod source;

use anyhow::{Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use trellis_core::diagnostics::{DiagnosticSink, Message, TracingSink, translate_error};
use trellis_core::graph::NodeId;
use trellis_core::prefab::{PrefabFactory, PrefabRuntime, StepReport};
use trellis_core::value::Value;
use trellis_script::{PrefabLibrary, ScriptEngine};

// Re-export commonly used types from dependencies
pub use trellis_core::config::RuntimeConfig;
pub use trellis_core::diagnostics::MemorySink;

// Re-export our own types
pub use source::{EngineError, ScriptSource};

#[cfg(feature = "file-watcher")]
pub use trellis_script::{ScriptWatcher, WatchEvent};

/// Outcome of a script reload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReloadReport {
    /// Instances moved onto the reloaded prefab of the same name
    pub rebound: usize,
    /// Instances whose prefab disappeared; they keep the previous definition
    pub orphaned: usize,
    /// The step that followed the reload
    pub step: StepReport,
}

/// The main Trellis engine
///
/// Provides a unified interface for:
/// - Script loading (file or inline) and prefab lookup
/// - Instance construction and field updates
/// - Stepping deferred rebuilds
/// - File watching for hot reload
pub struct Engine {
    /// The underlying Rhai script executor
    scripting: ScriptEngine,

    /// Scene graph and prefab instances
    runtime: PrefabRuntime,

    /// Prefabs of the loaded script
    library: PrefabLibrary,

    /// The loaded script, if any
    source: Option<ScriptSource>,

    /// File watcher for hot reload
    #[cfg(feature = "file-watcher")]
    watcher: Option<ScriptWatcher>,
}

impl Engine {
    /// Create an engine reporting diagnostics to `sink`
    pub fn new(config: RuntimeConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            scripting: ScriptEngine::new(Arc::clone(&sink)),
            runtime: PrefabRuntime::new(config, sink),
            library: PrefabLibrary::default(),
            source: None,
            #[cfg(feature = "file-watcher")]
            watcher: None,
        }
    }

    // ========================================================================
    // Script Operations
    // ========================================================================

    /// Load a prefab script from a file path
    pub fn load_script(&mut self, path: &Path) -> Result<&PrefabLibrary> {
        let code = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Failed to read script file {}: {}", path.display(), e))?;
        self.load(ScriptSource::file(path, code))
    }

    /// Load a prefab script from a string; `name` labels it in diagnostics
    pub fn load_source(&mut self, code: &str, name: &str) -> Result<&PrefabLibrary> {
        self.load(ScriptSource::inline(code, name))
    }

    fn load(&mut self, source: ScriptSource) -> Result<&PrefabLibrary> {
        self.library = self.compile_library(&source)?;
        self.source = Some(source);
        Ok(&self.library)
    }

    fn compile_library(&self, source: &ScriptSource) -> Result<PrefabLibrary> {
        let deriver = self.runtime.config().deriver();
        self.scripting
            .load_prefabs(&source.code, &source.name, &deriver)
    }

    /// Prefabs of the loaded script
    pub fn library(&self) -> &PrefabLibrary {
        &self.library
    }

    pub fn source(&self) -> Option<&ScriptSource> {
        self.source.as_ref()
    }

    /// Look up a prefab of the loaded script
    pub fn prefab(&self, name: &str) -> Result<PrefabFactory> {
        if self.source.is_none() {
            return Err(EngineError::NoScript.into());
        }
        self.library.get(name).cloned().ok_or_else(|| {
            EngineError::UnknownPrefab {
                name: name.to_string(),
                available: self.library.names().collect::<Vec<_>>().join(", "),
            }
            .into()
        })
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Construct a root instance of `prefab` called `name`
    pub fn instantiate(&mut self, prefab: &str, name: &str) -> Result<NodeId> {
        let factory = self.prefab(prefab)?;
        Ok(self.runtime.instantiate(&factory, name)?)
    }

    /// Construct an instance of `prefab` under `parent`
    pub fn instantiate_under(&mut self, prefab: &str, parent: NodeId, name: &str) -> Result<NodeId> {
        let factory = self.prefab(prefab)?;
        Ok(self.runtime.instantiate_under(&factory, parent, name)?)
    }

    pub fn set_field(&mut self, node: NodeId, field: &str, value: impl Into<Value>) -> Result<bool> {
        Ok(self.runtime.set_field(node, field, value)?)
    }

    /// Apply a textual `field=value` assignment, parsing the value as the
    /// field's type
    pub fn assign(&mut self, node: NodeId, assignment: &str) -> Result<bool> {
        let (field, text) = source::split_assignment(assignment)?;
        let field_type = self.runtime.graph().field(node, field)?.field_type;
        let value = Value::parse_as(text, field_type).ok_or_else(|| EngineError::InvalidValue {
            field: field.to_string(),
            value: text.to_string(),
            expected: field_type,
        })?;
        self.set_field(node, field, value)
    }

    /// Run deferred rebuilds
    pub fn step(&mut self) -> StepReport {
        self.runtime.step()
    }

    /// Indented rendering of the subtree at `node`
    pub fn print_tree(&self, node: NodeId) -> Result<String> {
        Ok(self.runtime.graph().print_tree(node)?)
    }

    /// JSON dump of the subtree at `node`
    pub fn to_json(&self, node: NodeId) -> Result<String> {
        let snapshot = self.runtime.graph().snapshot(node)?;
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    // ========================================================================
    // Reloading
    // ========================================================================

    /// Reload the script and move live instances onto the new prefabs.
    ///
    /// Instances keep the values of fields that still fit their declared
    /// type; fields new to a prefab start at their defaults. On failure the
    /// previous prefabs stay in place and no instance is moved.
    pub fn reload(&mut self) -> Result<ReloadReport> {
        let source = self.source.clone().ok_or(EngineError::NoScript)?;
        let source = match &source.path {
            Some(path) => {
                let code = std::fs::read_to_string(path).map_err(|e| {
                    anyhow!("Failed to read script file {}: {}", path.display(), e)
                })?;
                ScriptSource::file(path, code)
            }
            None => source,
        };
        let library = self.compile_library(&source)?;

        let live: Vec<(NodeId, PrefabFactory)> = self
            .runtime
            .instances()
            .map(|(node, factory)| (node, factory.clone()))
            .collect();

        let mut report = ReloadReport::default();
        let mut rebound: Vec<(NodeId, PrefabFactory)> = Vec::new();
        let mut orphans: Vec<(NodeId, String)> = Vec::new();
        for (node, previous) in live {
            match library.get(previous.name()) {
                Some(factory) => {
                    if let Err(e) = self.runtime.rebind(node, factory) {
                        // The failed instance may be partly rebound too
                        rebound.push((node, previous));
                        self.restore(rebound);
                        return Err(e.into());
                    }
                    rebound.push((node, previous));
                }
                None => orphans.push((node, previous.name().to_string())),
            }
        }

        report.rebound = rebound.len();
        report.orphaned = orphans.len();
        for (node, prefab) in orphans {
            self.runtime.sink().emit(
                Message::warning(format!(
                    "prefab '{prefab}' is no longer declared; keeping its previous definition"
                ))
                .with_emitter(self.runtime.graph().node(node)?.name()),
            );
        }

        self.library = library;
        self.source = Some(source);
        report.step = self.runtime.step();
        tracing::info!(
            rebound = report.rebound,
            orphaned = report.orphaned,
            "reloaded prefab script"
        );
        Ok(report)
    }

    /// Move instances back onto the factories they had before a failed reload
    fn restore(&mut self, rebound: Vec<(NodeId, PrefabFactory)>) {
        for (node, previous) in rebound {
            if let Err(e) = self.runtime.rebind(node, &previous) {
                tracing::warn!(%node, "could not restore prefab '{}': {e}", previous.name());
            }
        }
    }

    // ========================================================================
    // File Watching (only with file-watcher feature)
    // ========================================================================

    /// Start watching a script for changes
    #[cfg(feature = "file-watcher")]
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        if self.watcher.is_none() {
            self.watcher = Some(ScriptWatcher::new(trellis_script::watcher::DEFAULT_DEBOUNCE)?);
        }
        if let Some(watcher) = &mut self.watcher {
            watcher.watch(path)?;
        }
        Ok(())
    }

    /// Stop watching a script
    #[cfg(feature = "file-watcher")]
    pub fn unwatch(&mut self, path: &Path) -> Result<()> {
        if let Some(watcher) = &mut self.watcher {
            watcher.unwatch(path)?;
        }
        Ok(())
    }

    /// Reload the script if its file was modified.
    ///
    /// Returns `Ok(Some(report))` after a successful reload and `Ok(None)`
    /// when nothing relevant changed. A reload that fails is reported to the
    /// diagnostic sink and also yields `Ok(None)`, leaving the previous
    /// prefabs running.
    #[cfg(feature = "file-watcher")]
    pub fn reload_if_changed(&mut self) -> Result<Option<ReloadReport>> {
        let changed = self
            .watcher
            .as_ref()
            .map(ScriptWatcher::changed_scripts)
            .unwrap_or_default();
        if changed.is_empty() {
            return Ok(None);
        }

        let is_ours = self
            .source
            .as_ref()
            .is_some_and(|s| changed.iter().any(|p| s.is_file(p)));
        if !is_ours {
            return Ok(None);
        }

        match self.reload() {
            Ok(report) => Ok(Some(report)),
            Err(e) => {
                tracing::warn!("reload failed: {e:#}");
                self.runtime.sink().emit(translate_error(&e));
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Access to underlying components (for advanced use)
    // ========================================================================

    pub fn runtime(&self) -> &PrefabRuntime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut PrefabRuntime {
        &mut self.runtime
    }

    /// Get a reference to the underlying script engine
    pub fn scripting(&self) -> &ScriptEngine {
        &self.scripting
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), Arc::new(TracingSink))
    }
}
