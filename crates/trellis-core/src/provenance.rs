//! Source locations attached to prefab definitions
//!
//! A prefab records where it was *declared*, not where each instance was
//! built. Diagnostics about an instance point back to that declaration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::Location;

/// A source file and line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    /// Path or name of the defining source
    pub source_file: String,
    /// 1-based line number, 0 when unknown
    pub source_line: u32,
}

impl Provenance {
    pub fn new(source_file: impl Into<String>, source_line: u32) -> Self {
        Self {
            source_file: source_file.into(),
            source_line,
        }
    }

    /// Location of the caller, propagated through `#[track_caller]` frames
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line())
    }

    /// Placeholder for definitions whose origin is not known
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_file, self.source_line)
    }
}
