//! Resource cache subsystem.
//!
//! # Data Flow
//! ```text
//! BootstrapLoader bucket / ConfigClient::readdir
//!     → resource.rs full reload (decode, validate, reuse unchanged items)
//! Shared EventLog
//!     → Subscription → resource.rs incremental apply
//!     → slots + index (O(1) lookups for the data plane)
//! superseded / deleted Item
//!     → item.rs Disposable handlers (exactly once)
//! ```
//!
//! # Design Decisions
//! - Validation is injected per resource (validator.rs)
//! - Readers never block on sync; lookups take a short read lock

pub mod item;
pub mod resource;
pub mod validator;

pub use item::{Disposable, Item};
pub use resource::{ResourceCache, ResourceSpec, SyncOutcome};
pub use validator::{AcceptAll, ItemValidator, ValidatorRegistry};
