//! Prefabs: builders wrapped into reactive, reinitializable scene nodes
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized --build--> Built --field change--> Stale --step--> Built
//!                                                        \--fail--> Failed
//! ```
//!
//! A [`PrefabFactory`] is created once per builder; it owns the derived
//! [`Schema`](crate::schema::Schema) and the definition provenance. The
//! [`PrefabRuntime`] owns the scene graph, constructs instances and runs
//! deferred rebuilds in [`PrefabRuntime::step`].

mod builder;
mod factory;
mod runtime;

pub use builder::{BuildContext, FnBuilder, PrefabArgs, PrefabBuilder};
pub use factory::{DOCSTRING_FIELD, INFO_GROUP, PREFAB_GROUP, PREFABNAME_FIELD, PrefabFactory};
pub use runtime::{InstanceState, PrefabRuntime, StepReport};
