//! Runtime configuration

use crate::diagnostics::{DEFAULT_CAPACITY, MemorySink};
use crate::schema::SchemaDeriver;
use serde::{Deserialize, Serialize};

/// Help text used for fields whose parameter carries none
pub const DEFAULT_HELP_PLACEHOLDER: &str = "Undefined";

/// Settings for a [`PrefabRuntime`](crate::prefab::PrefabRuntime)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Rebuild passes per step before remaining stale instances wait for the next step
    pub max_rebuild_passes: usize,
    /// Reject defaults whose type cannot be inferred instead of binding `unknown` fields
    pub strict_types: bool,
    /// Help text for fields without their own
    pub help_placeholder: String,
    /// Messages kept by in-memory diagnostic buffers
    pub diagnostics_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_rebuild_passes: 8,
            strict_types: false,
            help_placeholder: DEFAULT_HELP_PLACEHOLDER.to_string(),
            diagnostics_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Parse a JSON document; missing keys take their defaults
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// In-memory diagnostic buffer holding up to `diagnostics_capacity` messages
    pub fn memory_sink(&self) -> MemorySink {
        MemorySink::with_capacity(self.diagnostics_capacity)
    }

    /// Schema deriver matching `strict_types`
    pub fn deriver(&self) -> SchemaDeriver {
        if self.strict_types {
            SchemaDeriver::strict()
        } else {
            SchemaDeriver::new()
        }
    }
}
