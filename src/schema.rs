//! Typed tool parameter schemas.
//!
//! Servers describe parameters with the wire shape
//! `{ "type": ..., "properties": ..., "required": [...] }`. Rather than
//! carrying that around as an untyped JSON bag, it is parsed into a tagged
//! variant and argument payloads are validated against it at the boundary,
//! before anything is forwarded to a server. Full JSON Schema (enums,
//! ranges, unions) is out of scope; servers remain the authority on the
//! finer constraints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A parameter schema node.
///
/// The `type` field on the wire selects the variant, so serialization
/// round-trips the exact shape servers publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ParameterSchema {
    String {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        items: Option<Box<ParameterSchema>>,
    },
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        properties: BTreeMap<String, ParameterSchema>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        required: Vec<String>,
    },
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::empty_object()
    }
}

impl ParameterSchema {
    /// An object schema with no properties; the default for tools that
    /// publish no parameter description.
    pub fn empty_object() -> Self {
        ParameterSchema::Object {
            description: None,
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// The wire name of this node's type.
    pub fn kind(&self) -> &'static str {
        match self {
            ParameterSchema::String { .. } => "string",
            ParameterSchema::Number { .. } => "number",
            ParameterSchema::Integer { .. } => "integer",
            ParameterSchema::Boolean { .. } => "boolean",
            ParameterSchema::Array { .. } => "array",
            ParameterSchema::Object { .. } => "object",
        }
    }

    /// Validate an argument value against this schema.
    ///
    /// Checks value types recursively and that every `required` field of an
    /// object is present. Returns a human-readable description of the first
    /// violation found.
    pub fn validate(&self, value: &serde_json::Value) -> Result<(), String> {
        self.validate_at(value, "arguments")
    }

    fn validate_at(&self, value: &serde_json::Value, path: &str) -> Result<(), String> {
        match self {
            ParameterSchema::String { .. } => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(format!("{path}: expected string"))
                }
            }
            ParameterSchema::Number { .. } => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(format!("{path}: expected number"))
                }
            }
            ParameterSchema::Integer { .. } => {
                if value.is_i64() || value.is_u64() {
                    Ok(())
                } else {
                    Err(format!("{path}: expected integer"))
                }
            }
            ParameterSchema::Boolean { .. } => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(format!("{path}: expected boolean"))
                }
            }
            ParameterSchema::Array { items, .. } => {
                let elements = value
                    .as_array()
                    .ok_or_else(|| format!("{path}: expected array"))?;
                if let Some(item_schema) = items {
                    for (i, element) in elements.iter().enumerate() {
                        item_schema.validate_at(element, &format!("{path}[{i}]"))?;
                    }
                }
                Ok(())
            }
            ParameterSchema::Object {
                properties,
                required,
                ..
            } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| format!("{path}: expected object"))?;
                for field in required {
                    if !obj.contains_key(field) {
                        return Err(format!("{path}: missing required field '{field}'"));
                    }
                }
                for (key, field_value) in obj {
                    // Fields the schema does not describe pass through; the
                    // server remains the authority on extras.
                    if let Some(field_schema) = properties.get(key) {
                        field_schema.validate_at(field_value, &format!("{path}.{key}"))?;
                    }
                }
                Ok(())
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
