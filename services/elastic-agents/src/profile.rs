//! Elastic profile metadata and validation.
//!
//! An elastic profile is the set of properties the server attaches to
//! every create request for a given kind of worker.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::ValidationError;
use crate::pod::{invalid_memory, parse_environment, parse_size};

pub const IMAGE: &str = "Image";
pub const MAX_MEMORY: &str = "MaxMemory";
pub const MAX_CPU: &str = "MaxCPU";
pub const ENVIRONMENT: &str = "Environment";

/// Describes one profile property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Field {
    pub key: &'static str,
    pub metadata: FieldMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldMetadata {
    pub required: bool,
    pub secure: bool,
}

const fn field(key: &'static str, required: bool) -> Field {
    Field {
        key,
        metadata: FieldMetadata {
            required,
            secure: false,
        },
    }
}

/// Properties understood by this plugin, in display order.
pub const FIELDS: [Field; 4] = [
    field(IMAGE, true),
    field(MAX_MEMORY, false),
    field(MAX_CPU, false),
    field(ENVIRONMENT, false),
];

/// Validate profile properties, returning every problem found.
pub fn validate(properties: &BTreeMap<String, String>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let value = |key: &str| {
        properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    };

    for field in FIELDS.iter().filter(|f| f.metadata.required) {
        if value(field.key).is_none() {
            errors.push(ValidationError::new(
                field.key,
                format!("{} must not be blank.", field.key),
            ));
        }
    }

    if let Some(raw) = value(MAX_MEMORY) {
        if parse_size(raw).is_none() {
            errors.push(invalid_memory(raw));
        }
    }

    if let Some(raw) = value(ENVIRONMENT) {
        if let Err(e) = parse_environment(raw) {
            errors.push(e);
        }
    }

    let known: Vec<_> = FIELDS.iter().map(|f| f.key).collect();
    for key in properties.keys().filter(|k| !known.contains(&k.as_str())) {
        errors.push(ValidationError::new(
            key.clone(),
            "Is an unknown property",
        ));
    }

    errors
}
