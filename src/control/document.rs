//! The live configuration document exchanged with the control thread.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("invalid JSON document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("configuration document must be a JSON object")]
    NotAnObject,
}

/// Hierarchical configuration document.
///
/// Always a JSON object at the top level; replaced wholesale, never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigDocument(Value);

impl ConfigDocument {
    pub fn new() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Parse a document from JSON text.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        Self::try_from(serde_json::from_str::<Value>(text)?)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Serialize for the wire: pretty JSON followed by a newline.
    pub fn to_wire(&self) -> String {
        let mut text =
            serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| String::from("{}"));
        text.push('\n');
        text
    }
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Value> for ConfigDocument {
    type Error = DocumentError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        if value.is_object() {
            Ok(Self(value))
        } else {
            Err(DocumentError::NotAnObject)
        }
    }
}
