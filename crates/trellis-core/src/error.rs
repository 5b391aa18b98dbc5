//! Error types for Trellis

use crate::graph::NodeId;
use crate::provenance::Provenance;
use crate::value::FieldType;
use thiserror::Error;

/// Result type alias using Trellis's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// A builder signature that cannot be turned into a field schema
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// The builder has no parameter to receive the instance
    #[error("MissingSelfParameter: the builder declares no parameters, the first one must receive the instance")]
    MissingSelfParameter,

    /// The instance parameter was given a default value
    #[error("the instance parameter '{0}' cannot have a default value")]
    DefaultedSelfParameter(String),

    /// Two parameters share a name
    #[error("parameter '{0}' is declared more than once")]
    DuplicateParameter(String),

    /// A parameter without a default follows one with a default
    #[error("parameter '{name}' has no default but follows defaulted parameter '{after}'")]
    NonTrailingDefault { name: String, after: String },

    /// The default value has no primitive field type (strict derivation only)
    #[error("parameter '{name}' has a default of unsupported type: {value}")]
    UnsupportedType { name: String, value: String },
}

/// Errors that can occur in Trellis operations
#[derive(Error, Debug)]
pub enum Error {
    /// The prefab's builder signature is malformed
    #[error("prefab '{prefab}' (defined at {provenance}) has an invalid signature: {source}")]
    Schema {
        prefab: String,
        provenance: Provenance,
        #[source]
        source: SchemaError,
    },

    /// The builder failed while (re)building an instance
    #[error("prefab '{prefab}' (defined at {provenance}) failed to build '{instance}': {message}")]
    Build {
        prefab: String,
        instance: String,
        provenance: Provenance,
        message: String,
    },

    /// A field cannot be bound on a node
    #[error("cannot register field '{field}' on '{node}': {reason}")]
    Registration {
        node: String,
        field: String,
        reason: String,
    },

    /// The node id does not exist in the graph
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// The node has no field with this name
    #[error("node '{node}' has no field '{field}'")]
    UnknownField { node: String, field: String },

    /// The value does not fit the field's declared type
    #[error("field '{field}' holds {expected} values, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },

    /// A builder tried to attach structure outside of its own instance
    #[error("node {node} is outside the subtree of '{instance}'")]
    OutsideSubtree { node: NodeId, instance: String },

    /// The node exists but is not a prefab instance
    #[error("node {0} is not a prefab instance")]
    NotAnInstance(NodeId),
}
