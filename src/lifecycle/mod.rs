//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → ClientProvider → Bootstrap → Broker → Caches → Supervisors
//!
//! Shutdown (shutdown.rs):
//!     trigger → every pause and wait returns → broker publishes Exiting
//!             → supervisors stop → join
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One shutdown handle is cloned into every long-lived task
//! - Shutdown is level-triggered: late subscribers still observe it

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::{SyncWorker, WorkerHandle};
