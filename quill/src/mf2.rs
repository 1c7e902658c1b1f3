pub mod normalize;

use std::collections::BTreeMap;

use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag given to documents that don't declare one.
pub const DEFAULT_TYPE: &str = "h-entry";
/// Prefix reserved for server commands, eg. `mp-slug`.
pub const COMMAND_PREFIX: &str = "mp-";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("document type tags must not be empty")]
    EmptyType,
    #[error("property names must not be empty")]
    EmptyPropertyName,
}

/// A single property value.
///
/// Embedded objects, eg. an `h-card` author or a `{"html": ...}` content
/// value, are carried opaquely and never normalized further, so their
/// structure survives a round trip through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Object(serde_json::Map<String, serde_json::Value>),
}

impl Value {
    /// Convert a JSON scalar into a property value. Nulls and arrays have
    /// no place in a value sequence and are dropped.
    pub fn from_scalar(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::String(s)),
            serde_json::Value::Number(n) => Some(Self::Number(n)),
            serde_json::Value::Bool(b) => Some(Self::Bool(b)),
            serde_json::Value::Object(map) => Some(Self::Object(map)),
            serde_json::Value::Null | serde_json::Value::Array(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

/// The canonical content object: one or more type tags plus a mapping from
/// property name to an ordered sequence of values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "type")]
    pub types: NonEmpty<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Vec<Value>>,
}

impl Document {
    pub fn new(types: NonEmpty<String>) -> Self {
        Self {
            types,
            properties: BTreeMap::new(),
        }
    }

    /// An empty document with the default `h-entry` type.
    pub fn entry() -> Self {
        Self::new(NonEmpty::new(DEFAULT_TYPE.to_owned()))
    }

    /// The first non-empty string value of the given property, if any.
    pub fn first_string(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)?
            .iter()
            .filter_map(Value::as_str)
            .find(|s| !s.is_empty())
    }

    /// Check the document invariants: no empty type tag, no empty property
    /// name. Invalid documents are rejected before they reach storage.
    pub fn validate(&self) -> Result<(), Error> {
        if self.types.iter().any(|tag| tag.is_empty()) {
            return Err(Error::EmptyType);
        }
        if self.properties.keys().any(|name| name.is_empty()) {
            return Err(Error::EmptyPropertyName);
        }
        Ok(())
    }

    /// Strip every server-command property from the document and return the
    /// slug suggested by `mp-slug`, if one was given. Commands are never
    /// persisted, recognized or not.
    pub fn take_commands(&mut self) -> Option<String> {
        let slug = self.first_string("mp-slug").map(ToOwned::to_owned);
        self.properties
            .retain(|name, _| !name.starts_with(COMMAND_PREFIX));

        slug
    }
}
