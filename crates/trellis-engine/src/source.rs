//! Loaded script bookkeeping for the Trellis engine

use std::path::{Path, PathBuf};
use thiserror::Error;
use trellis_core::value::FieldType;

/// Errors raised by the engine itself
#[derive(Error, Debug)]
pub enum EngineError {
    /// No script has been loaded yet
    #[error("No script loaded")]
    NoScript,

    /// The loaded script declares no prefab with this name
    #[error("Unknown prefab '{name}' (available: {available})")]
    UnknownPrefab { name: String, available: String },

    /// A `field=value` assignment without `=`
    #[error("Invalid assignment '{0}', expected field=value")]
    InvalidAssignment(String),

    /// The text does not parse as the field's type
    #[error("Cannot parse '{value}' as {expected} for field '{field}'")]
    InvalidValue {
        field: String,
        value: String,
        expected: FieldType,
    },
}

/// The script the engine's prefabs came from
#[derive(Debug, Clone)]
pub struct ScriptSource {
    /// Name used in provenance (the file path, or a label for inline code)
    pub name: String,

    /// Script text as last loaded
    pub code: String,

    /// Source file path (if loaded from file)
    pub path: Option<PathBuf>,
}

impl ScriptSource {
    pub fn inline(code: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            code: code.to_string(),
            path: None,
        }
    }

    pub fn file(path: &Path, code: String) -> Self {
        Self {
            name: path.display().to_string(),
            code,
            path: Some(path.to_path_buf()),
        }
    }

    /// Check if this script was loaded from a file
    pub fn has_file(&self) -> bool {
        self.path.is_some()
    }

    /// True if `changed` refers to this script's file
    pub fn is_file(&self, changed: &Path) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        if path == changed {
            return true;
        }
        match (path.canonicalize(), changed.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// Split `field=value` into its trimmed parts
pub fn split_assignment(text: &str) -> Result<(&str, &str), EngineError> {
    let (field, value) = text
        .split_once('=')
        .ok_or_else(|| EngineError::InvalidAssignment(text.to_string()))?;
    let field = field.trim();
    if field.is_empty() {
        return Err(EngineError::InvalidAssignment(text.to_string()));
    }
    Ok((field, value.trim()))
}
