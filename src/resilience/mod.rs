//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Failed sync iteration:
//!     → all endpoints unhealthy: ExponentialBackoff (bounded, doubling)
//!     → anything else, or exponential budget spent: JitteredDelay
//! ```
//!
//! # Design Decisions
//! - Policies only compute delays; the caller owns the sleep so shutdown
//!   can interrupt it

pub mod backoff;

pub use backoff::{ExponentialBackoff, JitteredDelay};
