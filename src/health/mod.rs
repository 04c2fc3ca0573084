//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! Store endpoint health (client/endpoint.rs):
//!     Request failure observed
//!     → Increment failure count
//!     → Quarantine endpoint for health_check_timeout
//!
//! Worker readiness (state.rs):
//!     Supervisor completes first load
//!     → SyncStatus::mark_loaded(worker_id)
//!     → GET /status reads it
//! ```
//!
//! # Design Decisions
//! - Readiness is reported outward only; the engine never consults it

pub mod state;

pub use state::SyncStatus;
