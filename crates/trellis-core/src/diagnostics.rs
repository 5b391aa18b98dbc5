//! Leveled diagnostic messages
//!
//! The runtime never logs on its own behalf when something user-facing goes
//! wrong; it hands a [`Message`] to a [`DiagnosticSink`]. [`TracingSink`]
//! forwards messages to `tracing`, [`MemorySink`] keeps them for inspection.

use crate::provenance::Provenance;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Default number of messages kept by a [`MemorySink`]
pub const DEFAULT_CAPACITY: usize = 1000;

/// Message severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Deprecated,
    Warning,
    Error,
}

impl Severity {
    /// Short prefix for display
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Deprecated => "DEPRECATED",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// A diagnostic message with optional emitter and source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub emitter: Option<String>,
    pub source: Option<Provenance>,
}

impl Message {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            emitter: None,
            source: None,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }

    pub fn deprecated(text: impl Into<String>) -> Self {
        Self::new(Severity::Deprecated, text)
    }

    /// Name of the component the message is about
    pub fn with_emitter(mut self, emitter: impl Into<String>) -> Self {
        self.emitter = Some(emitter.into());
        self
    }

    pub fn with_source(mut self, source: Provenance) -> Self {
        self.source = Some(source);
        self
    }

    /// Shorthand for [`Message::with_source`] from a file and line
    pub fn at(self, file: impl Into<String>, line: u32) -> Self {
        self.with_source(Provenance::new(file, line))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.severity.prefix())?;
        if let Some(emitter) = &self.emitter {
            write!(f, " [{emitter}]")?;
        }
        write!(f, " {}", self.text)?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

/// Receives diagnostic messages
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, message: Message);
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, message: Message) {
        let emitter = message.emitter.as_deref().unwrap_or("");
        let source = message
            .source
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        match message.severity {
            Severity::Info => tracing::info!(emitter = %emitter, source = %source, "{}", message.text),
            Severity::Deprecated | Severity::Warning => {
                tracing::warn!(emitter = %emitter, source = %source, "{}", message.text);
            }
            Severity::Error => tracing::error!(emitter = %emitter, source = %source, "{}", message.text),
        }
    }
}

/// Thread-safe bounded buffer of messages
#[derive(Clone)]
pub struct MemorySink {
    entries: Arc<RwLock<Vec<Message>>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            capacity: capacity.max(1),
        }
    }

    /// Get a snapshot of all entries
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.read().clone()
    }

    /// Entries at or above `severity`
    pub fn at_least(&self, severity: Severity) -> Vec<Message> {
        self.entries
            .read()
            .iter()
            .filter(|m| m.severity >= severity)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink for MemorySink {
    fn emit(&self, message: Message) {
        let mut entries = self.entries.write();
        entries.push(message);

        // Trim oldest entries if over limit
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(0..excess);
        }
    }
}

/// Sends every message to several sinks
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DiagnosticSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DiagnosticSink>>) -> Self {
        Self { sinks }
    }
}

impl DiagnosticSink for FanoutSink {
    fn emit(&self, message: Message) {
        for sink in &self.sinks {
            sink.emit(message.clone());
        }
    }
}

/// Format an error and its causes as a single error message.
///
/// ```text
/// prefab 'box' failed to build 'mybox': size must be positive
///   caused by: ...
/// ```
pub fn translate_error(error: &anyhow::Error) -> Message {
    let mut text = error.to_string();
    for cause in error.chain().skip(1) {
        text.push_str("\n  caused by: ");
        text.push_str(&cause.to_string());
    }
    Message::error(text)
}
