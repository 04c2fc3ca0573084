//! Remote configuration store client subsystem.
//!
//! # Data Flow
//! ```text
//! ClientFactory (etcd.rs / memory.rs)
//!     → ClientProvider (lazy, memoised handle shared by broker and caches)
//!     → ConfigClient
//!         read(key)                     point read
//!         readdir(key)                  subtree read
//!         watch(prefix, rev, timeout)   long-poll stream of WatchResponse
//! ```
//!
//! # Design Decisions
//! - Wire decoding happens here, once per response
//! - Values stay as raw bytes; interpreting them is the cache's job
//! - Dropping a `WatchStream` cancels the watch

pub mod endpoint;
pub mod etcd;
pub mod memory;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::sync::OnceCell;

use crate::error::ClientError;

pub use etcd::{EtcdClient, EtcdClientFactory};
pub use memory::MemoryStore;

/// Store-assigned mutation counter.
pub type Revision = i64;

/// One key as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: Revision,
    pub mod_revision: Revision,
}

/// Result of a point or subtree read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadResponse {
    /// Store revision at the time of the read.
    pub revision: Revision,
    pub kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A single mutation inside a watch batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub kv: KeyValue,
}

/// Payload of one long-poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchMessage {
    /// Watch registration acknowledgment.
    Created,
    /// The store cancelled the watch, usually because history was compacted.
    Canceled {
        compact_revision: Option<Revision>,
        reason: Option<String>,
    },
    /// Mutations in store order. May be empty (progress notification).
    Events(Vec<WatchEvent>),
}

/// One decoded long-poll response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchResponse {
    /// Header revision; `None` when the store sent no parseable header.
    pub revision: Option<Revision>,
    pub message: WatchMessage,
}

/// Stream of watch responses. Ends on normal close.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchResponse, ClientError>> + Send>>;

/// Capability surface of the remote store.
#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// Point read of exactly `key`.
    async fn read(&self, key: &str) -> Result<ReadResponse, ClientError>;

    /// Read of `key` and everything under it.
    async fn readdir(&self, key: &str) -> Result<ReadResponse, ClientError>;

    /// Long-poll everything under `prefix` starting at `from_revision`.
    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        timeout: Duration,
    ) -> Result<WatchStream, ClientError>;
}

/// Produces client handles.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ConfigClient>, ClientError>;
}

/// Lazily connected, shared client handle.
pub struct ClientProvider {
    factory: Arc<dyn ClientFactory>,
    client: OnceCell<Arc<dyn ConfigClient>>,
}

impl ClientProvider {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            client: OnceCell::new(),
        }
    }

    /// Return the handle, connecting on first use.
    ///
    /// A failed connect is not memoised; the next call tries again.
    pub async fn get(&self) -> Result<Arc<dyn ConfigClient>, ClientError> {
        self.client
            .get_or_try_init(|| async {
                let client = self.factory.connect().await?;
                tracing::info!("Config store client connected");
                Ok::<_, ClientError>(client)
            })
            .await
            .cloned()
    }
}

/// Smallest key strictly greater than every key that starts with `prefix`.
pub fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Prefix of all 0xff bytes: range to the end of the keyspace.
    vec![0]
}

/// True when `key` is `prefix` itself or lives under `prefix/`.
pub fn key_belongs_to(key: &str, prefix: &str) -> bool {
    match key.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyFactory {
        attempts: AtomicUsize,
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl ClientFactory for FlakyFactory {
        async fn connect(&self) -> Result<Arc<dyn ConfigClient>, ClientError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(ClientError::Transport("connection refused".into()));
            }
            Ok(self.store.clone() as Arc<dyn ConfigClient>)
        }
    }

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end("/apisix"), b"/apisiy".to_vec());
        assert_eq!(prefix_range_end("a\u{7f}"), b"a\x80".to_vec());
        assert_eq!(prefix_range_end(""), vec![0]);
    }

    #[test]
    fn test_key_belongs_to() {
        assert!(key_belongs_to("/apisix/routes/1", "/apisix/routes"));
        assert!(key_belongs_to("/apisix/routes", "/apisix/routes"));
        assert!(!key_belongs_to("/apisix/routes2/1", "/apisix/routes"));
        assert!(!key_belongs_to("/apisix/upstreams/1", "/apisix/routes"));
    }

    #[tokio::test]
    async fn test_provider_retries_failed_connect() {
        let factory = Arc::new(FlakyFactory {
            attempts: AtomicUsize::new(0),
            store: Arc::new(MemoryStore::new()),
        });
        let provider = ClientProvider::new(factory.clone());

        assert!(provider.get().await.is_err());
        assert!(provider.get().await.is_ok());
        assert!(provider.get().await.is_ok());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }
}
