use super::builder::{BuildContext, PrefabArgs, PrefabBuilder};
use crate::error::{Error, Result};
use crate::graph::{FieldSpec, NodeId, RESERVED_ATTRIBUTES, SceneGraph};
use crate::provenance::Provenance;
use crate::schema::{Schema, SchemaDeriver};
use crate::value::{FieldType, Value};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Field holding the prefab's declared name
pub const PREFABNAME_FIELD: &str = "prefabname";
/// Field holding the builder's documentation
pub const DOCSTRING_FIELD: &str = "docstring";
/// Group of the informational fields
pub const INFO_GROUP: &str = "Infos";
/// Group of the fields derived from the builder signature
pub const PREFAB_GROUP: &str = "Prefab";

/// Constructor for instances of one prefab.
///
/// Cheap to clone; clones share the builder and the schema.
#[derive(Clone)]
pub struct PrefabFactory {
    inner: Rc<FactoryInner>,
}

struct FactoryInner {
    name: String,
    doc: String,
    schema: Arc<Schema>,
    provenance: Provenance,
    builder: Box<dyn PrefabBuilder>,
}

impl PrefabFactory {
    /// Wrap `builder`, recording the caller's location as the definition site
    #[track_caller]
    pub fn wrap(builder: impl PrefabBuilder + 'static) -> Result<Self> {
        Self::wrap_with(builder, &SchemaDeriver::new(), Provenance::caller())
    }

    /// Wrap `builder` with an explicit deriver and definition site
    pub fn wrap_with(
        builder: impl PrefabBuilder + 'static,
        deriver: &SchemaDeriver,
        provenance: Provenance,
    ) -> Result<Self> {
        let signature = builder.signature();
        let name = signature.name().to_string();

        let schema = deriver.derive(signature).map_err(|source| Error::Schema {
            prefab: name.clone(),
            provenance: provenance.clone(),
            source,
        })?;

        for reserved in [PREFABNAME_FIELD, DOCSTRING_FIELD] {
            if schema.get(reserved).is_some() {
                return Err(Error::Registration {
                    node: name,
                    field: reserved.to_string(),
                    reason: "the name is reserved for prefab information".to_string(),
                });
            }
        }
        if let Some(attribute) = schema.names().find(|n| RESERVED_ATTRIBUTES.contains(n)) {
            return Err(Error::Registration {
                field: attribute.to_string(),
                node: name,
                reason: "the name is a node attribute".to_string(),
            });
        }

        let doc = signature.doc_text().unwrap_or_default().to_string();
        tracing::debug!(prefab = %name, at = %provenance, fields = schema.len(), "wrapped prefab");

        Ok(Self {
            inner: Rc::new(FactoryInner {
                name,
                doc,
                schema: Arc::new(schema),
                provenance,
                builder: Box::new(builder),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn doc(&self) -> &str {
        &self.inner.doc
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Where the prefab was declared
    pub fn provenance(&self) -> &Provenance {
        &self.inner.provenance
    }

    /// True if both handles refer to the same wrapped builder
    pub fn same_as(&self, other: &PrefabFactory) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Bind the informational fields and one field per schema descriptor.
    ///
    /// Fields that already exist on the node are left as they are.
    pub(crate) fn register_fields(
        &self,
        graph: &mut SceneGraph,
        node: NodeId,
        help_placeholder: &str,
    ) -> Result<()> {
        graph.add_field(
            node,
            FieldSpec::new(PREFABNAME_FIELD, FieldType::String, Value::from(self.name()))
                .help("The prefab's name")
                .group(INFO_GROUP),
        )?;
        graph.add_field(
            node,
            FieldSpec::new(DOCSTRING_FIELD, FieldType::String, Value::from(self.doc()))
                .help("This prefab's docstring")
                .group(INFO_GROUP),
        )?;

        for descriptor in self.inner.schema.iter() {
            let existing = graph.node(node)?.field(&descriptor.name).is_some();
            if existing {
                continue;
            }
            let help = descriptor.help.as_deref().unwrap_or(help_placeholder);
            graph.add_field(
                node,
                FieldSpec::new(
                    descriptor.name.clone(),
                    descriptor.field_type,
                    descriptor.default.clone(),
                )
                .help(help)
                .group(PREFAB_GROUP),
            )?;
        }
        Ok(())
    }

    /// Bring the fields of an instance made by another factory in line with
    /// this factory's schema.
    ///
    /// Fields whose type changed are retyped, keeping the value when it fits
    /// the new type. Schema fields that are no longer declared are dropped.
    /// New fields start at their defaults; other values are kept.
    pub(crate) fn rebind_fields(
        &self,
        graph: &mut SceneGraph,
        node: NodeId,
        help_placeholder: &str,
    ) -> Result<()> {
        let stale: Vec<String> = graph
            .node(node)?
            .fields()
            .iter()
            .filter(|f| f.group == PREFAB_GROUP && self.inner.schema.get(&f.name).is_none())
            .map(|f| f.name.clone())
            .collect();
        for name in stale {
            graph.remove_field(node, &name)?;
        }

        for descriptor in self.inner.schema.iter() {
            let retype = graph
                .node(node)?
                .field(&descriptor.name)
                .is_some_and(|f| f.field_type != descriptor.field_type);
            if retype {
                let help = descriptor.help.as_deref().unwrap_or(help_placeholder);
                graph.retype_field(
                    node,
                    FieldSpec::new(
                        descriptor.name.clone(),
                        descriptor.field_type,
                        descriptor.default.clone(),
                    )
                    .help(help)
                    .group(PREFAB_GROUP),
                )?;
            }
        }

        self.register_fields(graph, node, help_placeholder)?;
        graph.set_field(node, PREFABNAME_FIELD, self.name())?;
        graph.set_field(node, DOCSTRING_FIELD, self.doc())?;
        Ok(())
    }

    /// Snapshot the instance's fields as builder arguments.
    ///
    /// Every declared parameter after the first is present, in order;
    /// parameters without a default are passed as `nil`.
    pub(crate) fn snapshot(&self, graph: &SceneGraph, node: NodeId) -> Result<PrefabArgs> {
        let params = self.inner.builder.signature().params();
        let mut values = Vec::with_capacity(params.len().saturating_sub(1));
        for param in params.iter().skip(1) {
            let value = if self.inner.schema.get(&param.name).is_some() {
                graph.field_value(node, &param.name)?.clone()
            } else {
                Value::Nil
            };
            values.push((param.name.clone(), value));
        }
        Ok(PrefabArgs::new(values))
    }

    /// Discard the subtree of `node` and run the builder against it
    pub(crate) fn rebuild(&self, graph: &mut SceneGraph, node: NodeId) -> Result<()> {
        let args = self.snapshot(graph, node)?;
        graph.clear_subtree(node)?;
        let instance = graph.node(node)?.name().to_string();

        let _span = tracing::debug_span!("rebuild", prefab = %self.name(), instance = %instance)
            .entered();

        let mut ctx = BuildContext::new(graph, node, self.name());
        self.inner
            .builder
            .build(&mut ctx, &args)
            .map_err(|e| Error::Build {
                prefab: self.name().to_string(),
                instance,
                provenance: self.provenance().clone(),
                message: format!("{e:#}"),
            })
    }
}

impl fmt::Debug for PrefabFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefabFactory")
            .field("name", &self.inner.name)
            .field("provenance", &self.inner.provenance)
            .field("schema", &self.inner.schema)
            .finish_non_exhaustive()
    }
}
