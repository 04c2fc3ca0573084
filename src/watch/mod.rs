//! Shared watch subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigClient::watch (one stream for the whole namespace)
//!     → broker.rs (decode, revision checks, signals)
//!     → log.rs (append-only EventLog, wake every consumer)
//!     → Subscription (one cursor per ResourceCache)
//! ```
//!
//! # Design Decisions
//! - The broker is constructed once per worker and handed to every cache
//! - Each consumer owns a single-slot notification channel; a post while a
//!   post is pending is dropped
//! - Compaction runs on the consumer side, behind the slowest cursor

pub mod broker;
pub mod log;

pub use broker::{BrokerState, Subscription, WatchBroker};
pub use log::{BrokerSignal, EventLog, LogEntry};
