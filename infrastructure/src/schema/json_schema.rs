//! [`ArgumentValidator`] backed by the `jsonschema` crate.
//!
//! Compiled validators are cached per tool and recompiled only when the
//! tool's schema changes. A schema that fails to compile falls back to
//! [`BasicArgumentValidator`] rather than rejecting every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use jsonschema::error::ValidationErrorKind;
use serde_json::Value;
use toolgate_domain::{ArgumentValidator, BasicArgumentValidator, SchemaViolation, ToolDescriptor};
use tracing::warn;

enum Compiled {
    Schema(Arc<jsonschema::Validator>),
    Fallback,
}

struct CacheEntry {
    schema: Value,
    compiled: Arc<Compiled>,
}

#[derive(Default)]
pub struct JsonSchemaValidator {
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl JsonSchemaValidator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compiled(&self, tool: &ToolDescriptor) -> Arc<Compiled> {
        let key = format!("{}.{}", tool.backend, tool.name);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.get(&key)
            && entry.schema == tool.input_schema
        {
            return Arc::clone(&entry.compiled);
        }

        let compiled = match jsonschema::validator_for(&tool.input_schema) {
            Ok(validator) => Compiled::Schema(Arc::new(validator)),
            Err(e) => {
                warn!(tool = %key, error = %e, "Invalid input schema, using structural checks");
                Compiled::Fallback
            }
        };
        let compiled = Arc::new(compiled);
        cache.insert(
            key,
            CacheEntry {
                schema: tool.input_schema.clone(),
                compiled: Arc::clone(&compiled),
            },
        );
        compiled
    }
}

impl ArgumentValidator for JsonSchemaValidator {
    fn validate(&self, tool: &ToolDescriptor, args: &Value) -> Result<(), Vec<SchemaViolation>> {
        let validator = match self.compiled(tool).as_ref() {
            Compiled::Schema(validator) => Arc::clone(validator),
            Compiled::Fallback => return BasicArgumentValidator.validate(tool, args),
        };

        let violations: Vec<SchemaViolation> = validator
            .iter_errors(args)
            .map(|error| {
                let mut path = error.instance_path.to_string();
                if let ValidationErrorKind::Required { property } = &error.kind {
                    let field = property
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(|| property.to_string());
                    path = format!("{}/{}", path, field);
                }
                let schema_path = error.schema_path.to_string();
                let constraint = schema_path
                    .rsplit('/')
                    .find(|segment| !segment.is_empty() && segment.parse::<usize>().is_err())
                    .unwrap_or("schema")
                    .to_string();
                SchemaViolation::new(path, constraint, error.to_string())
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}
