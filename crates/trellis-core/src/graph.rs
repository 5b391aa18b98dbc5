//! In-process scene graph host
//!
//! Nodes form a forest. Each node owns child nodes, typed leaf objects and
//! named field bindings. Field writes that change a value are pushed to every
//! subscriber of the owning node over a channel; nothing is delivered for
//! writes of an equal value.

use crate::error::{Error, Result};
use crate::provenance::Provenance;
use crate::value::{FieldType, Value};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::mpsc::{Receiver, Sender, channel};

/// Node attribute names that fields may not shadow
pub const RESERVED_ATTRIBUTES: &[&str] = &["name", "children", "objects", "parent"];

/// Handle to a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a leaf object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Everything needed to create a field binding
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub default: Value,
    pub help: String,
    pub group: String,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, default: Value) -> Self {
        Self {
            name: name.into(),
            field_type,
            default,
            help: String::new(),
            group: String::new(),
        }
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

/// A named, typed, observable storage cell owned by a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: String,
    pub field_type: FieldType,
    pub value: Value,
    pub default: Value,
    pub help: String,
    pub group: String,
}

/// Reference to a field binding by owner and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub node: NodeId,
    pub name: String,
}

impl FieldRef {
    pub fn get<'g>(&self, graph: &'g SceneGraph) -> Result<&'g Value> {
        graph.field_value(self.node, &self.name)
    }

    /// Write through the graph so subscribers are notified
    pub fn set(&self, graph: &mut SceneGraph, value: impl Into<Value>) -> Result<bool> {
        graph.set_field(self.node, &self.name, value)
    }
}

/// Notification that a field value changed
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub node: NodeId,
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// A structural node
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    objects: Vec<ObjectId>,
    fields: Vec<Field>,
    provenance: Option<Provenance>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn objects(&self) -> &[ObjectId] {
        &self.objects
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Where the node's definition came from, if recorded
    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }
}

/// A typed leaf object attached to a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Object {
    pub owner: NodeId,
    pub type_name: String,
    pub params: BTreeMap<String, Value>,
}

impl Object {
    /// The `name` parameter, if given
    pub fn name(&self) -> Option<&str> {
        self.params.get("name").and_then(Value::as_str)
    }
}

/// Serializable view of a subtree
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub fields: Vec<Field>,
    pub objects: Vec<Object>,
    pub children: Vec<NodeSnapshot>,
}

/// The scene graph
#[derive(Default)]
pub struct SceneGraph {
    nodes: HashMap<NodeId, Node>,
    objects: HashMap<ObjectId, Object>,
    roots: Vec<NodeId>,
    next_id: u64,
    subscribers: HashMap<NodeId, Vec<Sender<FieldChange>>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn new_node(name: &str, parent: Option<NodeId>) -> Node {
        Node {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            objects: Vec::new(),
            fields: Vec::new(),
            provenance: None,
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id))
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create a parentless node
    pub fn add_root(&mut self, name: &str) -> NodeId {
        let id = NodeId(self.next());
        self.nodes.insert(id, Self::new_node(name, None));
        self.roots.push(id);
        id
    }

    /// Create a child node under `parent`
    pub fn add_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId> {
        if !self.contains(parent) {
            return Err(Error::UnknownNode(parent));
        }
        let id = NodeId(self.next());
        self.nodes.insert(id, Self::new_node(name, Some(parent)));
        self.node_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Attach a typed leaf object to `parent`
    pub fn add_object(
        &mut self,
        parent: NodeId,
        type_name: &str,
        params: BTreeMap<String, Value>,
    ) -> Result<ObjectId> {
        if !self.contains(parent) {
            return Err(Error::UnknownNode(parent));
        }
        let id = ObjectId(self.next());
        self.objects.insert(
            id,
            Object {
                owner: parent,
                type_name: type_name.to_string(),
                params,
            },
        );
        self.node_mut(parent)?.objects.push(id);
        Ok(id)
    }

    pub fn set_provenance(&mut self, node: NodeId, provenance: Provenance) -> Result<()> {
        self.node_mut(node)?.provenance = Some(provenance);
        Ok(())
    }

    /// Remove every child node and object below `node`, keeping the node itself
    pub fn clear_subtree(&mut self, node: NodeId) -> Result<()> {
        let target = self.node_mut(node)?;
        let children = std::mem::take(&mut target.children);
        let objects = std::mem::take(&mut target.objects);

        for object in objects {
            self.objects.remove(&object);
        }
        for child in children {
            self.drop_recursive(child);
        }
        Ok(())
    }

    /// Remove `node` and everything below it
    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        let parent = self
            .nodes
            .get(&node)
            .ok_or(Error::UnknownNode(node))?
            .parent;

        match parent {
            Some(parent) => {
                if let Some(p) = self.nodes.get_mut(&parent) {
                    p.children.retain(|c| *c != node);
                }
            }
            None => self.roots.retain(|r| *r != node),
        }

        self.drop_recursive(node);
        Ok(())
    }

    fn drop_recursive(&mut self, node: NodeId) {
        let Some(removed) = self.nodes.remove(&node) else {
            return;
        };
        self.subscribers.remove(&node);
        for object in removed.objects {
            self.objects.remove(&object);
        }
        for child in removed.children {
            self.drop_recursive(child);
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn node(&self, node: NodeId) -> Result<&Node> {
        self.nodes.get(&node).ok_or(Error::UnknownNode(node))
    }

    pub fn object(&self, object: ObjectId) -> Option<&Object> {
        self.objects.get(&object)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// First direct child of `parent` called `name`
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent = self.nodes.get(&parent)?;
        parent
            .children
            .iter()
            .copied()
            .find(|c| self.nodes.get(c).is_some_and(|n| n.name == name))
    }

    /// Resolve a `/`-separated path of node names, starting at the roots
    pub fn find_path(&self, path: &str) -> Option<NodeId> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next()?;
        let mut current = self
            .roots
            .iter()
            .copied()
            .find(|r| self.nodes.get(r).is_some_and(|n| n.name == first))?;
        for part in parts {
            current = self.find_child(current, part)?;
        }
        Some(current)
    }

    /// True if `node` is `ancestor` or lies below it
    pub fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }

    /// Child node names of `node`, in creation order
    pub fn child_names(&self, node: NodeId) -> Result<Vec<String>> {
        Ok(self
            .node(node)?
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c))
            .map(|n| n.name.clone())
            .collect())
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Bind a field on `owner`.
    ///
    /// Registering a name that is already a field is a no-op returning the
    /// existing binding. Names of node attributes are rejected.
    pub fn add_field(&mut self, owner: NodeId, spec: FieldSpec) -> Result<FieldRef> {
        let node = self.node_mut(owner)?;

        if RESERVED_ATTRIBUTES.contains(&spec.name.as_str()) {
            return Err(Error::Registration {
                node: node.name.clone(),
                field: spec.name,
                reason: "the name is a node attribute".to_string(),
            });
        }

        if node.field(&spec.name).is_none() {
            node.fields.push(Field {
                name: spec.name.clone(),
                field_type: spec.field_type,
                value: spec.default.clone(),
                default: spec.default,
                help: spec.help,
                group: spec.group,
            });
        }

        Ok(FieldRef {
            node: owner,
            name: spec.name,
        })
    }

    /// Replace the binding of an existing field with `spec`, keeping its
    /// position.
    ///
    /// The current value is carried over when the new type accepts it and
    /// reset to the new default otherwise. Subscribers are notified if the
    /// stored value changes.
    pub fn retype_field(&mut self, owner: NodeId, spec: FieldSpec) -> Result<bool> {
        let node = self.node_mut(owner)?;
        let node_name = node.name.clone();
        let field = node
            .fields
            .iter_mut()
            .find(|f| f.name == spec.name)
            .ok_or_else(|| Error::UnknownField {
                node: node_name,
                field: spec.name.clone(),
            })?;

        let value = spec
            .field_type
            .coerce(field.value.clone())
            .unwrap_or_else(|| spec.default.clone());
        let old = std::mem::replace(
            field,
            Field {
                name: spec.name.clone(),
                field_type: spec.field_type,
                value: value.clone(),
                default: spec.default,
                help: spec.help,
                group: spec.group,
            },
        );

        if old.value == value {
            return Ok(false);
        }
        self.notify(FieldChange {
            node: owner,
            field: spec.name,
            old: old.value,
            new: value,
        });
        Ok(true)
    }

    /// Drop a field binding, returning it
    pub fn remove_field(&mut self, owner: NodeId, name: &str) -> Result<Field> {
        let node = self.node_mut(owner)?;
        let index = node
            .fields
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| Error::UnknownField {
                node: node.name.clone(),
                field: name.to_string(),
            })?;
        Ok(node.fields.remove(index))
    }

    pub fn field(&self, node: NodeId, name: &str) -> Result<&Field> {
        let owner = self.node(node)?;
        owner.field(name).ok_or_else(|| Error::UnknownField {
            node: owner.name.clone(),
            field: name.to_string(),
        })
    }

    pub fn field_value(&self, node: NodeId, name: &str) -> Result<&Value> {
        self.field(node, name).map(|f| &f.value)
    }

    /// Write a field value.
    ///
    /// Returns whether the value changed. Subscribers of `node` are notified
    /// only on change.
    pub fn set_field(&mut self, node: NodeId, name: &str, value: impl Into<Value>) -> Result<bool> {
        let owner = self.node_mut(node)?;
        let owner_name = owner.name.clone();
        let field = owner
            .fields
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::UnknownField {
                node: owner_name,
                field: name.to_string(),
            })?;

        let value = value.into();
        let found = value.field_type();
        let value = field
            .field_type
            .coerce(value)
            .ok_or_else(|| Error::TypeMismatch {
                field: name.to_string(),
                expected: field.field_type,
                found,
            })?;

        if field.value == value {
            return Ok(false);
        }

        let old = std::mem::replace(&mut field.value, value.clone());
        self.notify(FieldChange {
            node,
            field: name.to_string(),
            old,
            new: value,
        });
        Ok(true)
    }

    /// Receive a [`FieldChange`] for every changing write to a field of `node`
    pub fn subscribe(&mut self, node: NodeId) -> Result<Receiver<FieldChange>> {
        if !self.contains(node) {
            return Err(Error::UnknownNode(node));
        }
        let (tx, rx) = channel();
        self.subscribers.entry(node).or_default().push(tx);
        Ok(rx)
    }

    fn notify(&mut self, change: FieldChange) {
        if let Some(senders) = self.subscribers.get_mut(&change.node) {
            // Dropped receivers unsubscribe implicitly
            senders.retain(|tx| tx.send(change.clone()).is_ok());
        }
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Serializable copy of the subtree rooted at `node`
    pub fn snapshot(&self, node: NodeId) -> Result<NodeSnapshot> {
        let n = self.node(node)?;
        Ok(NodeSnapshot {
            name: n.name.clone(),
            provenance: n.provenance.clone(),
            fields: n.fields.clone(),
            objects: n
                .objects
                .iter()
                .filter_map(|o| self.objects.get(o))
                .cloned()
                .collect(),
            children: n
                .children
                .iter()
                .map(|c| self.snapshot(*c))
                .collect::<Result<_>>()?,
        })
    }

    /// Indented text rendering of the subtree rooted at `node`
    pub fn print_tree(&self, node: NodeId) -> Result<String> {
        let mut out = String::new();
        self.print_into(node, 0, &mut out)?;
        Ok(out)
    }

    fn print_into(&self, node: NodeId, depth: usize, out: &mut String) -> Result<()> {
        let n = self.node(node)?;
        let pad = "  ".repeat(depth);
        out.push_str(&format!("{pad}{}\n", n.name));
        for field in &n.fields {
            out.push_str(&format!(
                "{pad}  .{} = {} ({})\n",
                field.name, field.value, field.field_type
            ));
        }
        for object in n.objects.iter().filter_map(|o| self.objects.get(o)) {
            out.push_str(&format!("{pad}  <{}", object.type_name));
            for (key, value) in &object.params {
                out.push_str(&format!(" {key}={value}"));
            }
            out.push_str(">\n");
        }
        for child in &n.children {
            self.print_into(*child, depth + 1, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn size_field() -> FieldSpec {
        FieldSpec::new("size", FieldType::Double, Value::Double(1.0)).help("Edge length")
    }

    #[test]
    fn test_children_and_objects() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("root");
        let child = graph.add_child(root, "child").unwrap();
        graph
            .add_object(child, "MechanicalObject", BTreeMap::new())
            .unwrap();

        assert_eq!(graph.child_names(root).unwrap(), ["child"]);
        assert_eq!(graph.node(child).unwrap().objects().len(), 1);
        assert_eq!(graph.find_path("root/child"), Some(child));
        assert!(graph.is_within(child, root));
        assert!(!graph.is_within(root, child));
    }

    #[test]
    fn test_clear_subtree_keeps_node_and_fields() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("root");
        graph.add_field(root, size_field()).unwrap();
        let child = graph.add_child(root, "child").unwrap();
        graph.add_child(child, "grandchild").unwrap();
        graph.add_object(root, "Light", BTreeMap::new()).unwrap();

        graph.clear_subtree(root).unwrap();

        assert!(graph.node(root).unwrap().children().is_empty());
        assert!(graph.node(root).unwrap().objects().is_empty());
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.object_count(), 0);
        assert!(graph.field(root, "size").is_ok());
    }

    #[test]
    fn test_remove_detaches_from_parent() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("root");
        let child = graph.add_child(root, "child").unwrap();
        graph.remove(child).unwrap();
        assert!(!graph.contains(child));
        assert!(graph.node(root).unwrap().children().is_empty());

        graph.remove(root).unwrap();
        assert!(graph.roots().is_empty());
        assert!(matches!(graph.remove(root), Err(Error::UnknownNode(_))));
    }

    #[test]
    fn test_add_field_is_idempotent() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        graph.add_field(node, size_field()).unwrap();
        graph.set_field(node, "size", 3.0).unwrap();

        // Re-registering keeps the current value and metadata
        let again = FieldSpec::new("size", FieldType::String, Value::from("x"));
        graph.add_field(node, again).unwrap();

        let field = graph.field(node, "size").unwrap();
        assert_eq!(field.value, Value::Double(3.0));
        assert_eq!(field.field_type, FieldType::Double);
        assert_eq!(graph.node(node).unwrap().fields().len(), 1);
    }

    #[test]
    fn test_reserved_attribute_rejected() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        let spec = FieldSpec::new("name", FieldType::String, Value::from("x"));
        assert!(matches!(
            graph.add_field(node, spec),
            Err(Error::Registration { .. })
        ));
    }

    #[test]
    fn test_set_field_notifies_only_on_change() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        let size = graph.add_field(node, size_field()).unwrap();
        let changes = graph.subscribe(node).unwrap();

        assert!(!size.set(&mut graph, 1.0).unwrap());
        assert!(changes.try_recv().is_err());

        assert!(size.set(&mut graph, 2).unwrap());
        let change = changes.try_recv().unwrap();
        assert_eq!(change.field, "size");
        assert_eq!(change.old, Value::Double(1.0));
        assert_eq!(change.new, Value::Double(2.0));
        assert_eq!(size.get(&graph).unwrap(), &Value::Double(2.0));
    }

    #[test]
    fn test_set_field_type_mismatch() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        graph.add_field(node, size_field()).unwrap();
        assert!(matches!(
            graph.set_field(node, "size", "big"),
            Err(Error::TypeMismatch {
                expected: FieldType::Double,
                found: FieldType::String,
                ..
            })
        ));
        assert!(matches!(
            graph.set_field(node, "missing", 1),
            Err(Error::UnknownField { .. })
        ));
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        graph.add_field(node, size_field()).unwrap();
        drop(graph.subscribe(node).unwrap());
        assert!(graph.set_field(node, "size", 5.0).unwrap());
    }

    #[test]
    fn test_print_tree() {
        let mut graph = SceneGraph::new();
        let root = graph.add_root("root");
        graph.add_field(root, size_field()).unwrap();
        let child = graph.add_child(root, "child").unwrap();
        graph
            .add_object(
                child,
                "MechanicalObject",
                BTreeMap::from([("name".to_string(), Value::from("dofs"))]),
            )
            .unwrap();

        let text = graph.print_tree(root).unwrap();
        assert_eq!(
            text,
            "root\n  .size = 1.0 (double)\n  child\n    <MechanicalObject name=\"dofs\">\n"
        );
    }

    #[test]
    fn test_retype_field_keeps_or_resets_value() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        graph.add_field(node, size_field()).unwrap();
        graph
            .add_field(node, FieldSpec::new("label", FieldType::String, Value::from("north")))
            .unwrap();
        graph.set_field(node, "size", 4.0).unwrap();
        let changes = graph.subscribe(node).unwrap();

        // A string cannot become an int: reset to the new default
        let changed = graph
            .retype_field(node, FieldSpec::new("label", FieldType::Int, Value::Int(5)))
            .unwrap();
        assert!(changed);
        let label = graph.field(node, "label").unwrap();
        assert_eq!(label.field_type, FieldType::Int);
        assert_eq!(label.value, Value::Int(5));
        assert!(graph.set_field(node, "label", 3).unwrap());

        // Any value fits an unknown field
        let changed = graph
            .retype_field(node, FieldSpec::new("size", FieldType::Unknown, Value::Nil))
            .unwrap();
        assert!(!changed);
        assert_eq!(graph.field_value(node, "size").unwrap(), &Value::Double(4.0));

        assert_eq!(changes.try_iter().count(), 2);
        let names: Vec<_> = graph.node(node).unwrap().fields().iter().map(|f| f.name.clone()).collect();
        assert_eq!(names, ["size", "label"]);
    }

    #[test]
    fn test_remove_field() {
        let mut graph = SceneGraph::new();
        let node = graph.add_root("node");
        graph.add_field(node, size_field()).unwrap();

        let removed = graph.remove_field(node, "size").unwrap();
        assert_eq!(removed.value, Value::Double(1.0));
        assert!(matches!(graph.field(node, "size"), Err(Error::UnknownField { .. })));
        assert!(graph.remove_field(node, "size").is_err());
    }
}
