//! Error taxonomy for the synchronization engine.
//!
//! # Layers
//! ```text
//! ClientError (transport: HTTP, decode, endpoint health)
//!     → From<ClientError> for SyncError
//!     → SyncError (engine: what the supervisor classifies)
//!     → ErrorKind (Copy tag the supervisor matches on)
//! ```
//!
//! # Design Decisions
//! - Classification is by variant, never by message text
//! - Item validation failures are not errors here; they are logged at apply time
//! - `Exiting` is a clean stop, not a failure

use thiserror::Error;

use crate::client::Revision;

/// Errors raised by a [`ConfigClient`](crate::client::ConfigClient).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// Request or long-poll deadline elapsed.
    #[error("request timed out")]
    Timeout,

    /// Every configured endpoint is currently marked unhealthy.
    #[error("has no healthy endpoint available")]
    NoHealthyEndpoint,

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("store returned status {code}: {message}")]
    Status { code: u16, message: String },

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Errors surfaced by [`ResourceCache::sync`](crate::cache::ResourceCache::sync).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    /// Nothing arrived before the deadline. Expected; retried immediately.
    #[error("timeout")]
    Timeout,

    /// The store's revision went backwards underneath the watch.
    #[error("store restarted at revision {revision}")]
    Restarted { revision: Revision },

    /// The store discarded history the watch depended on.
    #[error("store compacted at revision {revision}")]
    Compacted { revision: Revision },

    /// No endpoint of the store is healthy.
    #[error("all endpoints unhealthy")]
    AllEndpointsUnhealthy,

    /// The store answered with something the engine could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The worker is shutting down.
    #[error("worker exited")]
    Exiting,

    /// Anything else.
    #[error("{0}")]
    Unclassified(String),
}

/// Copyable classification tag for [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    StoreRestarted,
    StoreCompacted,
    AllEndpointsUnhealthy,
    Malformed,
    Exiting,
    Unclassified,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "transport_timeout",
            ErrorKind::StoreRestarted => "store_restarted",
            ErrorKind::StoreCompacted => "store_compacted",
            ErrorKind::AllEndpointsUnhealthy => "store_unhealthy_all_endpoints",
            ErrorKind::Malformed => "malformed_response",
            ErrorKind::Exiting => "process_exiting",
            ErrorKind::Unclassified => "unclassified",
        }
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Timeout => ErrorKind::Timeout,
            SyncError::Restarted { .. } => ErrorKind::StoreRestarted,
            SyncError::Compacted { .. } => ErrorKind::StoreCompacted,
            SyncError::AllEndpointsUnhealthy => ErrorKind::AllEndpointsUnhealthy,
            SyncError::Malformed(_) => ErrorKind::Malformed,
            SyncError::Exiting => ErrorKind::Exiting,
            SyncError::Unclassified(_) => ErrorKind::Unclassified,
        }
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout => SyncError::Timeout,
            ClientError::NoHealthyEndpoint => SyncError::AllEndpointsUnhealthy,
            ClientError::Decode(msg) => SyncError::Malformed(msg),
            other => SyncError::Unclassified(other.to_string()),
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_normalize() {
        assert_eq!(SyncError::from(ClientError::Timeout).kind(), ErrorKind::Timeout);
        assert_eq!(
            SyncError::from(ClientError::NoHealthyEndpoint).kind(),
            ErrorKind::AllEndpointsUnhealthy
        );
        assert_eq!(
            SyncError::from(ClientError::Decode("bad json".into())).kind(),
            ErrorKind::Malformed
        );

        let err = SyncError::from(ClientError::Status { code: 500, message: "boom".into() });
        assert_eq!(err.kind(), ErrorKind::Unclassified);
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_signal_kinds() {
        assert_eq!(SyncError::Compacted { revision: 3 }.kind(), ErrorKind::StoreCompacted);
        assert_eq!(SyncError::Restarted { revision: 3 }.kind(), ErrorKind::StoreRestarted);
        assert_eq!(SyncError::Exiting.to_string(), "worker exited");
    }
}
