use super::builder::PrefabBuilder;
use super::factory::PrefabFactory;
use crate::config::RuntimeConfig;
use crate::diagnostics::{DiagnosticSink, Message, TracingSink};
use crate::error::{Error, Result};
use crate::graph::{FieldChange, NodeId, SceneGraph};
use crate::provenance::Provenance;
use crate::value::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// Lifecycle state of a prefab instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Fields are bound, the builder has not run yet
    Uninitialized,
    /// The subtree matches the field values of the last build
    Built,
    /// A field changed since the last build started
    Stale,
    /// The last reactive rebuild failed; the subtree may be empty
    Failed,
}

/// What a call to [`PrefabRuntime::step`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepReport {
    /// Rebuild passes that found stale instances
    pub passes: usize,
    /// Successful rebuilds
    pub rebuilt: usize,
    /// Failed rebuilds (reported to the diagnostic sink)
    pub failed: usize,
    /// Instances still stale when the pass limit was reached
    pub pending: usize,
}

struct InstanceRecord {
    factory: PrefabFactory,
    state: InstanceState,
    builds: u64,
    changes: Receiver<FieldChange>,
    // Set when notifications were drained but not yet acted upon
    pending: Cell<bool>,
}

impl InstanceRecord {
    fn new(factory: PrefabFactory, changes: Receiver<FieldChange>) -> Self {
        Self {
            factory,
            state: InstanceState::Uninitialized,
            builds: 0,
            changes,
            pending: Cell::new(false),
        }
    }

    /// Whether any change arrived since the last [`Self::take_changes`]
    fn has_changes(&self) -> bool {
        if self.changes.try_iter().count() > 0 {
            self.pending.set(true);
        }
        self.pending.get()
    }

    /// Drain pending notifications, returning whether there were any
    fn take_changes(&self) -> bool {
        let changed = self.has_changes();
        self.pending.set(false);
        changed
    }
}

/// Owns the scene graph and keeps prefab instances in sync with their fields
pub struct PrefabRuntime {
    graph: SceneGraph,
    instances: BTreeMap<NodeId, InstanceRecord>,
    config: RuntimeConfig,
    sink: Arc<dyn DiagnosticSink>,
}

impl PrefabRuntime {
    pub fn new(config: RuntimeConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self {
            graph: SceneGraph::new(),
            instances: BTreeMap::new(),
            config,
            sink,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.sink
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    /// Mutable graph access.
    ///
    /// Instances removed through the graph are forgotten at the next step.
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    // ========================================================================
    // Factories and construction
    // ========================================================================

    /// Wrap `builder` using this runtime's type strictness, recording the
    /// caller's location as the definition site
    #[track_caller]
    pub fn wrap(&self, builder: impl PrefabBuilder + 'static) -> Result<PrefabFactory> {
        self.wrap_at(builder, Provenance::caller())
    }

    /// Wrap `builder` with an explicit definition site
    pub fn wrap_at(
        &self,
        builder: impl PrefabBuilder + 'static,
        provenance: Provenance,
    ) -> Result<PrefabFactory> {
        let result = PrefabFactory::wrap_with(builder, &self.config.deriver(), provenance);
        if let Err(err) = &result {
            let mut message = Message::error(err.to_string());
            if let Error::Schema { provenance, .. } = err {
                message = message.with_source(provenance.clone());
            }
            self.sink.emit(message);
        }
        result
    }

    /// Construct a root instance of `factory` called `name`.
    ///
    /// The builder runs before this returns. If it fails, the error is
    /// returned and the half-built node is removed from the graph.
    pub fn instantiate(&mut self, factory: &PrefabFactory, name: &str) -> Result<NodeId> {
        self.construct(factory, None, name)
    }

    /// Construct an instance of `factory` as a child of `parent`
    pub fn instantiate_under(
        &mut self,
        factory: &PrefabFactory,
        parent: NodeId,
        name: &str,
    ) -> Result<NodeId> {
        self.construct(factory, Some(parent), name)
    }

    fn construct(
        &mut self,
        factory: &PrefabFactory,
        parent: Option<NodeId>,
        name: &str,
    ) -> Result<NodeId> {
        let node = match parent {
            Some(parent) => self.graph.add_child(parent, name)?,
            None => self.graph.add_root(name),
        };

        let prepared = self
            .graph
            .set_provenance(node, factory.provenance().clone())
            .and_then(|()| {
                factory.register_fields(&mut self.graph, node, &self.config.help_placeholder)
            })
            .and_then(|()| self.graph.subscribe(node));

        let changes = match prepared {
            Ok(changes) => changes,
            Err(err) => {
                self.graph.remove(node)?;
                return Err(err);
            }
        };

        self.instances
            .insert(node, InstanceRecord::new(factory.clone(), changes));

        if let Err(err) = self.run_rebuild(node) {
            self.report(&err, name);
            self.instances.remove(&node);
            self.graph.remove(node)?;
            return Err(err);
        }

        tracing::debug!(prefab = %factory.name(), instance = %name, "instantiated prefab");
        Ok(node)
    }

    /// Run the rebuild action for `node` and settle its state
    fn run_rebuild(&mut self, node: NodeId) -> Result<()> {
        let record = self
            .instances
            .get_mut(&node)
            .ok_or(Error::NotAnInstance(node))?;
        // Notifications so far are covered by the snapshot taken below
        record.take_changes();
        let factory = record.factory.clone();

        let result = factory.rebuild(&mut self.graph, node);

        let record = self
            .instances
            .get_mut(&node)
            .ok_or(Error::NotAnInstance(node))?;
        record.builds += 1;
        let changed_during_build = record.take_changes();
        record.state = match (&result, changed_during_build) {
            (_, true) => InstanceState::Stale,
            (Ok(()), false) => InstanceState::Built,
            (Err(_), false) => InstanceState::Failed,
        };
        result
    }

    fn report(&self, err: &Error, instance: &str) {
        let mut message = Message::error(err.to_string()).with_emitter(instance);
        if let Error::Build { provenance, .. } = err {
            message = message.with_source(provenance.clone());
        }
        self.sink.emit(message);
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Write a field of any node; prefab instances become stale on change
    pub fn set_field(&mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.graph.set_field(node, name, value)
    }

    pub fn field(&self, node: NodeId, name: &str) -> Result<&Value> {
        self.graph.field_value(node, name)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    pub fn is_instance(&self, node: NodeId) -> bool {
        self.instances.contains_key(&node)
    }

    /// Current state, with notifications received so far taken into account
    pub fn state(&self, node: NodeId) -> Option<InstanceState> {
        let record = self.instances.get(&node)?;
        match record.state {
            InstanceState::Built | InstanceState::Failed if record.has_changes() => {
                Some(InstanceState::Stale)
            }
            state => Some(state),
        }
    }

    /// Number of times the builder ran for `node`
    pub fn build_count(&self, node: NodeId) -> Option<u64> {
        self.instances.get(&node).map(|r| r.builds)
    }

    pub fn factory_of(&self, node: NodeId) -> Option<&PrefabFactory> {
        self.instances.get(&node).map(|r| &r.factory)
    }

    /// Live instances with their factories, in creation order
    pub fn instances(&self) -> impl Iterator<Item = (NodeId, &PrefabFactory)> {
        self.instances.iter().map(|(id, r)| (*id, &r.factory))
    }

    /// Rebuild `node` now, returning any build error to the caller
    pub fn rebuild(&mut self, node: NodeId) -> Result<()> {
        self.run_rebuild(node)
    }

    /// Swap the factory behind `node`, align its fields with the new schema
    /// and mark it stale.
    ///
    /// Values of fields that keep their name are kept when they fit the new
    /// type; new fields start at their defaults and undeclared ones are
    /// dropped.
    pub fn rebind(&mut self, node: NodeId, factory: &PrefabFactory) -> Result<()> {
        if !self.instances.contains_key(&node) {
            return Err(Error::NotAnInstance(node));
        }
        factory.rebind_fields(&mut self.graph, node, &self.config.help_placeholder)?;
        self.graph.set_provenance(node, factory.provenance().clone())?;

        if let Some(record) = self.instances.get_mut(&node) {
            record.factory = factory.clone();
            record.state = InstanceState::Stale;
        }
        Ok(())
    }

    /// Remove an instance (or any node) and everything below it
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        self.graph.remove(node)?;
        self.forget_removed();
        Ok(())
    }

    fn forget_removed(&mut self) {
        let graph = &self.graph;
        self.instances.retain(|id, _| graph.contains(*id));
    }

    // ========================================================================
    // Stepping
    // ========================================================================

    fn collect_changes(&mut self) {
        for record in self.instances.values_mut() {
            if record.take_changes() {
                record.state = InstanceState::Stale;
            }
        }
    }

    fn stale_instances(&self) -> Vec<NodeId> {
        self.instances
            .iter()
            .filter(|(_, r)| r.state == InstanceState::Stale)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Rebuild every instance whose fields changed.
    ///
    /// Each stale instance is rebuilt once per pass, however many changes it
    /// received. Changes made during a pass schedule another pass, up to
    /// `max_rebuild_passes`. Build failures go to the diagnostic sink.
    pub fn step(&mut self) -> StepReport {
        let mut report = StepReport::default();
        self.forget_removed();

        for _ in 0..self.config.max_rebuild_passes {
            self.collect_changes();
            let stale = self.stale_instances();
            if stale.is_empty() {
                return report;
            }
            report.passes += 1;

            for node in stale {
                // An earlier rebuild in this pass may have discarded it
                if !self.graph.contains(node) {
                    self.instances.remove(&node);
                    continue;
                }
                match self.run_rebuild(node) {
                    Ok(()) => report.rebuilt += 1,
                    Err(err) => {
                        report.failed += 1;
                        let name = self
                            .graph
                            .node(node)
                            .map(|n| n.name().to_string())
                            .unwrap_or_default();
                        self.report(&err, &name);
                    }
                }
            }
            self.forget_removed();
        }

        self.collect_changes();
        report.pending = self.stale_instances().len();
        if report.pending > 0 {
            tracing::warn!(pending = report.pending, "rebuild pass limit reached");
            self.sink.emit(Message::warning(format!(
                "{} prefab instance(s) still stale after {} rebuild passes",
                report.pending, self.config.max_rebuild_passes
            )));
        }
        report
    }
}

impl Default for PrefabRuntime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), Arc::new(TracingSink))
    }
}
