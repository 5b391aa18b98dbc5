//! # Trellis Core
//!
//! Reactive, parameterized sub-graphs for a scene-graph simulation host.
//!
//! A *prefab* is an ordinary builder function plus a typed field schema derived
//! from its signature. Instantiating a prefab creates a node whose fields are
//! live bindings; whenever one of them changes, the builder runs again and the
//! node's subtree is rebuilt from scratch.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_core::prelude::*;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut runtime = PrefabRuntime::default();
//!
//! let signature = Signature::new("box")
//!     .param("node")
//!     .param_with_default("size", 1.0)
//!     .param_with_default("color", "red");
//!
//! let factory = runtime.wrap(FnBuilder::new(signature, |ctx, args| {
//!     let size = args.get_double("size").unwrap_or_default();
//!     ctx.add_object("Cube", [("size".to_string(), Value::from(size))].into())?;
//!     Ok(())
//! }))?;
//!
//! let node = runtime.instantiate(&factory, "mybox")?;
//! runtime.set_field(node, "size", 2.0)?;
//! runtime.step();
//! # Ok(())
//! # }
//! ```
//!
//! ## Conventions
//!
//! - **Threading**: everything is single-threaded and cooperative. Reactive
//!   rebuilds are deferred to [`PrefabRuntime::step`].
//! - **Same-value writes**: setting a field to the value it already holds does
//!   not notify observers and does not schedule a rebuild.

pub mod config;
pub mod diagnostics;
pub mod graph;
pub mod prefab;
pub mod provenance;
pub mod schema;
pub mod value;

mod error;

pub use error::{Error, Result, SchemaError};

/// Prelude module for convenient imports
pub mod prelude {
    // Values and schemas
    pub use crate::schema::{ParameterDescriptor, Schema, SchemaDeriver, Signature};
    pub use crate::value::{FieldType, Value};

    // Scene graph
    pub use crate::graph::{FieldChange, FieldRef, FieldSpec, NodeId, ObjectId, SceneGraph};

    // Prefabs
    pub use crate::prefab::{
        BuildContext, FnBuilder, InstanceState, PrefabArgs, PrefabBuilder, PrefabFactory,
        PrefabRuntime, StepReport,
    };

    // Diagnostics and provenance
    pub use crate::diagnostics::{DiagnosticSink, MemorySink, Message, Severity, TracingSink};
    pub use crate::provenance::Provenance;

    // Configuration
    pub use crate::config::RuntimeConfig;

    // Error handling
    pub use crate::{Error, Result, SchemaError};
}
