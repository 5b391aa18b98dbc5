//! Rhai API for nodes, objects and fields
//!
//! Scripts only touch the scene graph while one of their prefabs is building.
//! For that duration the graph is moved out of the runtime into a
//! thread-local slot (see [`BuildScope`]) and every node method works on it
//! through a [`BuildContext`], so a builder can only attach structure below
//! its own instance.

use crate::convert::{map_to_values, to_dynamic, to_value};
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map};
use std::cell::RefCell;
use trellis_core::graph::{NodeId, ObjectId, SceneGraph};
use trellis_core::prefab::BuildContext;

/// Handle to a node, as seen by scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptNode {
    pub id: NodeId,
}

impl ScriptNode {
    pub fn new(id: NodeId) -> Self {
        Self { id }
    }
}

/// Handle to a leaf object, as seen by scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptObject {
    pub id: ObjectId,
}

struct ActiveBuild {
    graph: SceneGraph,
    instance: NodeId,
    prefab: String,
}

// Graph of the prefab currently building on this thread
thread_local! {
    static ACTIVE_BUILD: RefCell<Option<ActiveBuild>> = const { RefCell::new(None) };
}

/// Lends a scene graph to scripts for the duration of one build.
///
/// The graph is handed back when the scope is dropped, including on error.
pub struct BuildScope<'a> {
    target: &'a mut SceneGraph,
}

impl<'a> BuildScope<'a> {
    pub fn enter(target: &'a mut SceneGraph, instance: NodeId, prefab: &str) -> Self {
        let graph = std::mem::take(target);
        ACTIVE_BUILD.with(|slot| {
            *slot.borrow_mut() = Some(ActiveBuild {
                graph,
                instance,
                prefab: prefab.to_string(),
            });
        });
        Self { target }
    }
}

impl Drop for BuildScope<'_> {
    fn drop(&mut self) {
        if let Some(active) = ACTIVE_BUILD.with(|slot| slot.borrow_mut().take()) {
            *self.target = active.graph;
        }
    }
}

/// Whether a script build is in progress on this thread
pub fn is_building() -> bool {
    ACTIVE_BUILD.with(|slot| slot.borrow().is_some())
}

/// Run `f` against the build in progress
fn with_build<T>(
    f: impl FnOnce(&mut BuildContext<'_>) -> Result<T, Box<EvalAltResult>>,
) -> Result<T, Box<EvalAltResult>> {
    ACTIVE_BUILD.with(|slot| {
        let mut slot = slot.borrow_mut();
        let active = slot
            .as_mut()
            .ok_or("node operations are only available while a prefab is building")?;
        let mut ctx = BuildContext::new(&mut active.graph, active.instance, &active.prefab);
        f(&mut ctx)
    })
}

fn script_err(e: impl ToString) -> Box<EvalAltResult> {
    e.to_string().into()
}

/// Name of `node` if a build is in progress and the node exists
pub(crate) fn node_name(node: NodeId) -> Option<String> {
    ACTIVE_BUILD.with(|slot| {
        let slot = slot.borrow();
        let active = slot.as_ref()?;
        active.graph.node(node).ok().map(|n| n.name().to_string())
    })
}

// ============================================================================
// Node methods
// ============================================================================

fn add_child(node: &mut ScriptNode, name: &str) -> Result<ScriptNode, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.add_child_to(node.id, name)
            .map(ScriptNode::new)
            .map_err(script_err)
    })
}

fn add_object(
    node: &mut ScriptNode,
    type_name: &str,
    params: Map,
) -> Result<ScriptObject, Box<EvalAltResult>> {
    let params = map_to_values(&params).map_err(script_err)?;
    with_build(|ctx| {
        ctx.add_object_to(node.id, type_name, params)
            .map(|id| ScriptObject { id })
            .map_err(script_err)
    })
}

fn add_bare_object(
    node: &mut ScriptNode,
    type_name: &str,
) -> Result<ScriptObject, Box<EvalAltResult>> {
    add_object(node, type_name, Map::new())
}

fn get_field(node: &mut ScriptNode, field: &str) -> Result<Dynamic, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.graph()
            .field_value(node.id, field)
            .map(to_dynamic)
            .map_err(script_err)
    })
}

fn set_field(
    node: &mut ScriptNode,
    field: &str,
    value: Dynamic,
) -> Result<bool, Box<EvalAltResult>> {
    let value = to_value(&value).map_err(script_err)?;
    with_build(|ctx| {
        ctx.set_field_on(node.id, field, value)
            .map_err(script_err)
    })
}

fn has_field(node: &mut ScriptNode, field: &str) -> Result<bool, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.graph()
            .node(node.id)
            .map(|n| n.field(field).is_some())
            .map_err(script_err)
    })
}

fn name(node: &mut ScriptNode) -> Result<String, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.graph()
            .node(node.id)
            .map(|n| n.name().to_string())
            .map_err(script_err)
    })
}

fn children(node: &mut ScriptNode) -> Result<Array, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.graph()
            .node(node.id)
            .map(|n| {
                n.children()
                    .iter()
                    .map(|c| Dynamic::from(ScriptNode::new(*c)))
                    .collect()
            })
            .map_err(script_err)
    })
}

// ============================================================================
// Object methods
// ============================================================================

fn object_type(object: &mut ScriptObject) -> Result<String, Box<EvalAltResult>> {
    with_build(|ctx| {
        ctx.graph()
            .object(object.id)
            .map(|o| o.type_name.clone())
            .ok_or_else(|| format!("object {} no longer exists", object.id).into())
    })
}

fn object_params(object: &mut ScriptObject) -> Result<Map, Box<EvalAltResult>> {
    with_build(|ctx| {
        let found = ctx
            .graph()
            .object(object.id)
            .ok_or_else(|| script_err(format!("object {} no longer exists", object.id)))?;
        Ok(found
            .params
            .iter()
            .map(|(k, v)| (k.as_str().into(), to_dynamic(v)))
            .collect())
    })
}

/// Register node and object types and their methods
pub fn register_graph_api(engine: &mut Engine) {
    engine
        .register_type_with_name::<ScriptNode>("Node")
        .register_fn("to_string", |n: &mut ScriptNode| format!("Node({})", n.id))
        .register_fn("add_child", add_child)
        .register_fn("add_object", add_object)
        .register_fn("add_object", add_bare_object)
        .register_fn("get", get_field)
        .register_fn("set", set_field)
        .register_fn("has_field", has_field)
        .register_fn("name", name)
        .register_fn("children", children);

    engine
        .register_type_with_name::<ScriptObject>("Object")
        .register_fn("to_string", |o: &mut ScriptObject| format!("Object({})", o.id))
        .register_fn("type_name", object_type)
        .register_fn("params", object_params);

    engine.register_fn("is_building", is_building);
}

/// Emitter label for messages sent on behalf of `node`
pub(crate) fn emitter_for(node: &ScriptNode) -> String {
    node_name(node.id).unwrap_or_else(|| node.id.to_string())
}
