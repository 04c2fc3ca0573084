//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::SyncConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load, apply environment overrides, and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<SyncConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: SyncConfig = toml::from_str(&content)?;
    finish(config, |var| std::env::var(var).ok())
}

/// Same as [`load_config`] for an in-memory document.
pub fn load_config_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let config: SyncConfig = toml::from_str(content)?;
    finish(config, |var| std::env::var(var).ok())
}

/// Built-in defaults plus environment overrides, for runs without a file.
pub fn load_defaults() -> Result<SyncConfig, ConfigError> {
    finish(SyncConfig::default(), |var| std::env::var(var).ok())
}

fn finish<F>(mut config: SyncConfig, lookup: F) -> Result<SyncConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    apply_env_overrides(&mut config, lookup)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay `GATEWAY_SYNC_*` variables onto `config`.
///
/// `lookup` abstracts the environment so callers can inject values.
pub fn apply_env_overrides<F>(config: &mut SyncConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(prefix) = lookup("GATEWAY_SYNC_PREFIX") {
        config.store.prefix = prefix;
    }
    if let Some(raw) = lookup("GATEWAY_SYNC_ENDPOINTS") {
        config.store.endpoints = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(raw) = lookup("GATEWAY_SYNC_RESYNC_DELAY") {
        config.sync.resync_delay_secs = parse_env("GATEWAY_SYNC_RESYNC_DELAY", raw)?;
    }
    if let Some(raw) = lookup("GATEWAY_SYNC_HEALTH_CHECK_TIMEOUT") {
        config.store.health_check_timeout_secs =
            parse_env("GATEWAY_SYNC_HEALTH_CHECK_TIMEOUT", raw)?;
    }
    if let Some(raw) = lookup("GATEWAY_SYNC_WATCH_TIMEOUT") {
        config.store.watch_timeout_secs = parse_env("GATEWAY_SYNC_WATCH_TIMEOUT", raw)?;
    }
    if let Some(raw) = lookup("GATEWAY_SYNC_SKIP_INITIAL_SYNC") {
        config.sync.skip_initial_sync = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" | "" => false,
            _ => {
                return Err(ConfigError::Env {
                    var: "GATEWAY_SYNC_SKIP_INITIAL_SYNC",
                    value: raw,
                })
            }
        };
    }
    Ok(())
}

fn parse_env(var: &'static str, raw: String) -> Result<u64, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value: raw })
}
