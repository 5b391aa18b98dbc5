//! Trellis Script - Rhai scripting integration
//!
//! Prefabs can be written as Rhai functions. A script defines builder
//! functions and declares which of them are prefabs; Trellis derives the field
//! schema from the function's parameters and the declared defaults.
//!
//! ## Example Script
//!
//! ```rhai
//! // A beam made of `segments` boxes
//! fn beam(node, segments, length, material) {
//!     let step = length / segments;
//!     for i in 0..segments {
//!         let segment = node.add_child("segment" + i);
//!         segment.add_object("Cube", #{ size: step, material: material });
//!     }
//!     msg_info(node, "built " + segments + " segments");
//! }
//!
//! prefab("beam", #{ segments: 4, length: 2.0, material: "steel" },
//!        "A straight beam split into equal segments",
//!        #{ segments: "Number of segments" });
//! ```
//!
//! ## Node API
//!
//! Inside a builder the instance and its descendants offer `add_child(name)`,
//! `add_object(type)`, `add_object(type, params)`, `get(field)`,
//! `set(field, value)`, `has_field(field)`, `name()` and `children()`.
//! Writing a field of the instance from its own builder schedules exactly one
//! more rebuild.

pub mod convert;
pub mod engine;
pub mod graph_api;
pub mod message_api;
pub mod prefab_api;

#[cfg(feature = "file-watcher")]
pub mod watcher;

pub use convert::{ConvertError, to_dynamic, to_value};
pub use engine::ScriptEngine;
pub use graph_api::{BuildScope, ScriptNode, ScriptObject, register_graph_api};
pub use message_api::register_message_api;
pub use prefab_api::{PrefabDeclaration, PrefabLibrary, ScriptBuilder, register_prefab_api};

#[cfg(feature = "file-watcher")]
pub use watcher::{ScriptWatcher, WatchEvent};
