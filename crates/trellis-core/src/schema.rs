//! Builder signatures and the field schemas derived from them
//!
//! Rust closures cannot be inspected at runtime, so builders declare their
//! parameter list explicitly with a [`Signature`]. [`SchemaDeriver`] is the
//! only place that turns a signature into a [`Schema`]; script hosts build a
//! `Signature` from whatever reflection they have and reuse the same rules.

use crate::error::SchemaError;
use crate::value::{FieldType, Value};
use serde::Serialize;
use std::collections::HashSet;

/// One declared builder parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
    pub help: Option<String>,
}

/// The declared interface of a builder
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: String,
    params: Vec<Param>,
    doc: Option<String>,
}

impl Signature {
    /// Start a signature for the builder called `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            doc: None,
        }
    }

    /// Declare a parameter without a default
    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
            help: None,
        });
        self
    }

    /// Declare a parameter with a default value
    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
            help: None,
        });
        self
    }

    /// Attach help text to the most recently declared parameter
    pub fn help(mut self, text: impl Into<String>) -> Self {
        if let Some(param) = self.params.last_mut() {
            param.help = Some(text.into());
        }
        self
    }

    /// Attach documentation to the builder itself
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn doc_text(&self) -> Option<&str> {
        self.doc.as_deref()
    }
}

/// A configurable field derived from a defaulted parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    pub field_type: FieldType,
    pub default: Value,
    pub help: Option<String>,
}

/// Ordered field descriptors of one builder
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Schema {
    descriptors: Vec<ParameterDescriptor>,
}

impl Schema {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.descriptors.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.descriptors.iter().map(|d| d.name.as_str())
    }
}

/// Derives a [`Schema`] from a [`Signature`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaDeriver {
    strict: bool,
}

impl SchemaDeriver {
    /// Deriver that reports `unknown` types instead of rejecting them
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Deriver that rejects defaults without a primitive type
    pub fn strict() -> Self {
        Self { strict: true }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn derive(&self, signature: &Signature) -> Result<Schema, SchemaError> {
        let Some((instance, rest)) = signature.params.split_first() else {
            return Err(SchemaError::MissingSelfParameter);
        };
        if instance.default.is_some() {
            return Err(SchemaError::DefaultedSelfParameter(instance.name.clone()));
        }

        let mut seen = HashSet::from([instance.name.as_str()]);
        let mut last_defaulted: Option<&str> = None;
        let mut descriptors = Vec::new();

        for param in rest {
            if !seen.insert(param.name.as_str()) {
                return Err(SchemaError::DuplicateParameter(param.name.clone()));
            }

            let Some(default) = &param.default else {
                // Context parameter; only legal before the defaulted tail
                if let Some(after) = last_defaulted {
                    return Err(SchemaError::NonTrailingDefault {
                        name: param.name.clone(),
                        after: after.to_string(),
                    });
                }
                continue;
            };

            let field_type = FieldType::of(default);
            if self.strict && field_type == FieldType::Unknown {
                return Err(SchemaError::UnsupportedType {
                    name: param.name.clone(),
                    value: default.to_string(),
                });
            }

            descriptors.push(ParameterDescriptor {
                name: param.name.clone(),
                field_type,
                default: default.clone(),
                help: param.help.clone(),
            });
            last_defaulted = Some(param.name.as_str());
        }

        tracing::trace!(
            builder = %signature.name,
            fields = descriptors.len(),
            "derived prefab schema"
        );

        Ok(Schema { descriptors })
    }
}
