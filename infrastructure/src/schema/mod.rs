//! JSON Schema argument validation.

mod json_schema;

pub use json_schema::JsonSchemaValidator;
