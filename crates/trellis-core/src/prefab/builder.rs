use crate::error::{Error, Result};
use crate::graph::{NodeId, ObjectId, SceneGraph};
use crate::schema::Signature;
use crate::value::Value;
use std::collections::BTreeMap;

/// A function that populates a prefab instance's subtree
pub trait PrefabBuilder {
    /// The declared parameter list; the first parameter receives the instance
    fn signature(&self) -> &Signature;

    /// Populate the instance behind `ctx` using the snapshot in `args`
    fn build(&self, ctx: &mut BuildContext<'_>, args: &PrefabArgs) -> anyhow::Result<()>;
}

/// [`PrefabBuilder`] backed by a closure
pub struct FnBuilder<F> {
    signature: Signature,
    f: F,
}

impl<F> FnBuilder<F>
where
    F: Fn(&mut BuildContext<'_>, &PrefabArgs) -> anyhow::Result<()>,
{
    pub fn new(signature: Signature, f: F) -> Self {
        Self { signature, f }
    }
}

impl<F> PrefabBuilder for FnBuilder<F>
where
    F: Fn(&mut BuildContext<'_>, &PrefabArgs) -> anyhow::Result<()>,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn build(&self, ctx: &mut BuildContext<'_>, args: &PrefabArgs) -> anyhow::Result<()> {
        (self.f)(ctx, args)
    }
}

/// Field values handed to a builder, in declaration order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PrefabArgs {
    values: Vec<(String, Value)>,
}

impl PrefabArgs {
    pub(crate) fn new(values: Vec<(String, Value)>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(Value::as_double)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Values without their names, in declaration order
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The instance a builder is populating, with the operations a builder may use.
///
/// Structure can only be attached to the instance or to nodes below it.
pub struct BuildContext<'a> {
    graph: &'a mut SceneGraph,
    instance: NodeId,
    prefab: &'a str,
}

impl<'a> BuildContext<'a> {
    pub fn new(graph: &'a mut SceneGraph, instance: NodeId, prefab: &'a str) -> Self {
        Self {
            graph,
            instance,
            prefab,
        }
    }

    /// The instance node
    pub fn node(&self) -> NodeId {
        self.instance
    }

    /// Name of the prefab being built
    pub fn prefab(&self) -> &str {
        self.prefab
    }

    /// Name of the instance node
    pub fn name(&self) -> Result<&str> {
        Ok(self.graph.node(self.instance)?.name())
    }

    pub fn graph(&self) -> &SceneGraph {
        &*self.graph
    }

    /// Direct graph access for hosts that need to move the graph across a
    /// scripting boundary for the duration of a build
    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut *self.graph
    }

    fn check_within(&self, node: NodeId) -> Result<()> {
        if self.graph.is_within(node, self.instance) {
            Ok(())
        } else {
            Err(Error::OutsideSubtree {
                node,
                instance: self.prefab.to_string(),
            })
        }
    }

    /// Create a child directly under the instance
    pub fn add_child(&mut self, name: &str) -> Result<NodeId> {
        self.graph.add_child(self.instance, name)
    }

    /// Create a child under `parent`, which must belong to this instance
    pub fn add_child_to(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        self.check_within(parent)?;
        self.graph.add_child(parent, name)
    }

    /// Attach an object directly to the instance
    pub fn add_object(
        &mut self,
        type_name: &str,
        params: BTreeMap<String, Value>,
    ) -> Result<ObjectId> {
        self.graph.add_object(self.instance, type_name, params)
    }

    /// Attach an object to `parent`, which must belong to this instance
    pub fn add_object_to(
        &mut self,
        parent: NodeId,
        type_name: &str,
        params: BTreeMap<String, Value>,
    ) -> Result<ObjectId> {
        self.check_within(parent)?;
        self.graph.add_object(parent, type_name, params)
    }

    /// Live value of one of the instance's fields
    pub fn field(&self, name: &str) -> Result<&Value> {
        self.graph.field_value(self.instance, name)
    }

    /// Write one of the instance's fields.
    ///
    /// A change made here does not affect the running build; the instance
    /// becomes stale and is rebuilt once more at the next step.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.graph.set_field(self.instance, name, value)
    }

    /// Write a field of `node`, which must belong to this instance
    pub fn set_field_on(
        &mut self,
        node: NodeId,
        name: &str,
        value: impl Into<Value>,
    ) -> Result<bool> {
        self.check_within(node)?;
        self.graph.set_field(node, name, value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_args_accessors() {
        let args = PrefabArgs::new(vec![
            ("size".to_string(), Value::Int(2)),
            ("color".to_string(), Value::from("red")),
            ("visible".to_string(), Value::Bool(true)),
        ]);
        assert_eq!(args.get_double("size"), Some(2.0));
        assert_eq!(args.get_int("size"), Some(2));
        assert_eq!(args.get_str("color"), Some("red"));
        assert_eq!(args.get_bool("visible"), Some(true));
        assert_eq!(args.get("missing"), None);
        let names: Vec<_> = args.iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["size", "color", "visible"]);
    }

    #[test]
    fn test_context_rejects_foreign_nodes() {
        let mut graph = SceneGraph::new();
        let instance = graph.add_root("instance");
        let other = graph.add_root("other");

        let mut ctx = BuildContext::new(&mut graph, instance, "box");
        let child = ctx.add_child("A").unwrap();
        ctx.add_child_to(child, "B").unwrap();
        ctx.add_object_to(child, "Mass", BTreeMap::new()).unwrap();

        assert!(matches!(
            ctx.add_child_to(other, "C"),
            Err(Error::OutsideSubtree { .. })
        ));
        assert!(matches!(
            ctx.add_object_to(other, "Mass", BTreeMap::new()),
            Err(Error::OutsideSubtree { .. })
        ));
        assert_eq!(ctx.name().unwrap(), "instance");
    }
}
