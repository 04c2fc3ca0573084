//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, endpoints parse as URLs)
//! - Detect duplicate resource names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SyncConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;
use url::Url;

use crate::config::schema::SyncConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &SyncConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let store = &config.store;

    if store.endpoints.is_empty() {
        errors.push(ValidationError::new("store.endpoints", "at least one endpoint is required"));
    }
    for endpoint in &store.endpoints {
        if let Err(e) = Url::parse(endpoint) {
            errors.push(ValidationError::new(
                "store.endpoints",
                format!("'{}' is not a valid URL: {}", endpoint, e),
            ));
        }
    }

    if !store.prefix.starts_with('/') {
        errors.push(ValidationError::new("store.prefix", "must start with '/'"));
    }
    if store.prefix.ends_with('/') {
        errors.push(ValidationError::new("store.prefix", "must not end with '/'"));
    }

    for (field, value) in [
        ("store.request_timeout_secs", store.request_timeout_secs),
        ("store.watch_timeout_secs", store.watch_timeout_secs),
        ("store.health_check_timeout_secs", store.health_check_timeout_secs),
        ("sync.resync_delay_secs", config.sync.resync_delay_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }

    if config.sync.iterations_per_round == 0 {
        errors.push(ValidationError::new("sync.iterations_per_round", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for resource in &config.resources {
        if resource.name.is_empty() || resource.name.contains('/') {
            errors.push(ValidationError::new(
                "resources",
                format!("invalid resource name '{}'", resource.name),
            ));
        }
        if !seen.insert(resource.name.as_str()) {
            errors.push(ValidationError::new(
                "resources",
                format!("duplicate resource '{}'", resource.name),
            ));
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
