//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the sync
//! worker. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the sync worker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote config store connection settings.
    pub store: StoreConfig,

    /// Resync loop tuning.
    pub sync: SyncSettings,

    /// Resources to mirror. Empty means the built-in resource table.
    pub resources: Vec<ResourceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Remote config store connection settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Store endpoints (e.g., "http://127.0.0.1:2379").
    pub endpoints: Vec<String>,

    /// Root of the configuration namespace.
    pub prefix: String,

    /// Timeout for unary requests in seconds.
    pub request_timeout_secs: u64,

    /// Server-side long-poll window in seconds.
    pub watch_timeout_secs: u64,

    /// How long a failed endpoint stays out of rotation, in seconds.
    pub health_check_timeout_secs: u64,

    /// Consecutive failures before an endpoint is marked unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            prefix: "/apisix".to_string(),
            request_timeout_secs: 30,
            watch_timeout_secs: 50,
            health_check_timeout_secs: 10,
            unhealthy_threshold: 1,
        }
    }
}

/// Resync loop tuning.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    /// Base delay for the jittered backoff, in seconds.
    pub resync_delay_secs: u64,

    /// Pause after a sync that made no progress, in milliseconds.
    pub no_progress_delay_ms: u64,

    /// Iterations a supervisor runs before yielding to the scheduler.
    pub iterations_per_round: u32,

    /// Skip the bootstrap scan; every cache does its own first read.
    pub skip_initial_sync: bool,

    /// Identity reported on the status board. Empty means a random UUID.
    pub worker_id: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            resync_delay_secs: 5,
            no_progress_delay_ms: 500,
            iterations_per_round: 32,
            skip_initial_sync: false,
            worker_id: String::new(),
        }
    }
}

/// One mirrored resource.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResourceConfig {
    /// Directory name under the prefix (e.g., "routes").
    pub name: String,

    /// The resource is one value at its own key, not a directory.
    #[serde(default)]
    pub single_item: bool,
}

impl ResourceConfig {
    pub fn directory(name: &str) -> Self {
        Self {
            name: name.to_string(),
            single_item: false,
        }
    }

    pub fn single(name: &str) -> Self {
        Self {
            name: name.to_string(),
            single_item: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9091".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin server.
    pub enabled: bool,

    /// Admin server bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:9180".to_string(),
            api_key: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: SyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.store, StoreConfig::default());
        assert_eq!(config.sync.iterations_per_round, 32);
        assert!(config.resources.is_empty());
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_full_config() {
        let raw = r#"
            [store]
            endpoints = ["http://10.0.0.1:2379", "http://10.0.0.2:2379"]
            prefix = "/gateway"
            watch_timeout_secs = 20

            [sync]
            resync_delay_secs = 2
            worker_id = "worker-a"

            [[resources]]
            name = "routes"

            [[resources]]
            name = "plugins"
            single_item = true

            [observability]
            log_format = "json"
        "#;
        let config: SyncConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.store.endpoints.len(), 2);
        assert_eq!(config.store.prefix, "/gateway");
        assert_eq!(config.store.request_timeout_secs, 30);
        assert_eq!(config.sync.worker_id, "worker-a");
        assert_eq!(
            config.resources,
            vec![ResourceConfig::directory("routes"), ResourceConfig::single("plugins")]
        );
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
