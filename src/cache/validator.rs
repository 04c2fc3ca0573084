//! Injected item validation.
//!
//! The engine never interprets resource payloads itself. Each resource gets
//! an [`ItemValidator`] that answers two questions:
//! - does the value match the resource's schema
//! - is the item semantically acceptable (references, plugin config, ...)
//!
//! A rejection excludes one item; it never fails a reload or a batch.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

/// Validation hooks for one resource type.
pub trait ItemValidator: Send + Sync {
    /// Structural check of the decoded value.
    fn check_schema(&self, _value: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Semantic check, run after the schema check passed.
    fn check_item(&self, _id: &str, _value: &Value) -> Result<(), String> {
        Ok(())
    }
}

/// Accepts everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl ItemValidator for AcceptAll {}

/// Run both checks in order.
pub fn validate(validator: &dyn ItemValidator, id: &str, value: &Value) -> Result<(), String> {
    validator
        .check_schema(value)
        .map_err(|e| format!("schema: {}", e))?;
    validator
        .check_item(id, value)
        .map_err(|e| format!("check: {}", e))
}

/// Validators by resource name, falling back to [`AcceptAll`].
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: HashMap<String, Arc<dyn ItemValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, resource: &str, validator: Arc<dyn ItemValidator>) -> Self {
        self.validators.insert(resource.to_string(), validator);
        self
    }

    pub fn get(&self, resource: &str) -> Arc<dyn ItemValidator> {
        self.validators
            .get(resource)
            .cloned()
            .unwrap_or_else(|| Arc::new(AcceptAll))
    }
}
