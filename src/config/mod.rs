//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → GATEWAY_SYNC_* environment overrides
//!     → validation.rs (semantic checks)
//!     → SyncConfig (validated, immutable)
//!     → handed to SyncWorker::start
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_str, load_defaults, ConfigError};
pub use schema::{
    AdminConfig, LogFormat, ObservabilityConfig, ResourceConfig, StoreConfig, SyncConfig,
    SyncSettings,
};
pub use validation::ValidationError;
