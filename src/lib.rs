//! API gateway configuration synchronization engine.
//!
//! Mirrors the resource directories of a revisioned key-value store into
//! per-resource in-memory caches, kept current by one shared watch stream.

pub mod admin;
pub mod bootstrap;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod supervisor;
pub mod watch;

pub use cache::{Item, ResourceCache, ValidatorRegistry};
pub use config::schema::SyncConfig;
pub use error::{ClientError, SyncError};
pub use lifecycle::{Shutdown, SyncWorker, WorkerHandle};
