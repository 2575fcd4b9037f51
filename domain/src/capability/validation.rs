//! Argument validation against a tool's input schema.
//!
//! [`ArgumentValidator`] is a pure, synchronous trait so both the gateway
//! (fail fast before any network call) and the backend-side executor
//! (before touching the wrapped system) can share it. The full JSON Schema
//! implementation lives in the infrastructure layer; [`BasicArgumentValidator`]
//! covers the structural subset used when no richer validator is wired in.

use super::descriptor::ToolDescriptor;
use crate::invocation::error::SchemaViolation;
use serde_json::Value;

/// Validator for tool arguments.
pub trait ArgumentValidator: Send + Sync {
    /// Validate `args` against `tool.input_schema`, returning every violation.
    fn validate(&self, tool: &ToolDescriptor, args: &Value) -> Result<(), Vec<SchemaViolation>>;
}

/// Structural validator: object shape, required fields, top-level types,
/// `enum` membership and `additionalProperties: false`.
#[derive(Debug, Clone, Default)]
pub struct BasicArgumentValidator;

impl ArgumentValidator for BasicArgumentValidator {
    fn validate(&self, tool: &ToolDescriptor, args: &Value) -> Result<(), Vec<SchemaViolation>> {
        let schema = &tool.input_schema;
        let Some(object) = args.as_object() else {
            return Err(vec![SchemaViolation::new(
                "",
                "type",
                format!("arguments for '{}' must be an object", tool.name),
            )]);
        };

        let mut violations = Vec::new();

        for field in tool.required_fields() {
            if !object.contains_key(field) {
                violations.push(SchemaViolation::new(
                    format!("/{}", field),
                    "required",
                    format!("missing required field '{}'", field),
                ));
            }
        }

        let properties = schema.get("properties").and_then(|p| p.as_object());

        for (key, value) in object {
            match properties.and_then(|p| p.get(key)) {
                Some(property) => {
                    let path = format!("/{}", key);
                    if let Some(expected) = property.get("type")
                        && !type_matches(expected, value)
                    {
                        violations.push(SchemaViolation::new(
                            &path,
                            "type",
                            format!("field '{}' must be of type {}", key, expected),
                        ));
                    }
                    if let Some(allowed) = property.get("enum").and_then(|e| e.as_array())
                        && !allowed.contains(value)
                    {
                        violations.push(SchemaViolation::new(
                            &path,
                            "enum",
                            format!("field '{}' must be one of {}", key, Value::from(allowed.clone())),
                        ));
                    }
                }
                None => {
                    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
                        violations.push(SchemaViolation::new(
                            format!("/{}", key),
                            "additionalProperties",
                            format!("unexpected field '{}'", key),
                        ));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => single_type_matches(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .any(|name| single_type_matches(name, value)),
        _ => true,
    }
}

fn single_type_matches(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}
