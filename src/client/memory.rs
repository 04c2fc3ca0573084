//! In-process revisioned store.
//!
//! Behaves like a single-node etcd for the purposes of the sync engine:
//! every mutation bumps the revision, history can be compacted, the store
//! can be "restarted" with a lower revision, and faults can be injected
//! into the next reads or watches. Used by tests and local runs.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::client::{
    ClientFactory, ConfigClient, EventKind, KeyValue, ReadResponse, Revision,
    WatchEvent, WatchMessage, WatchResponse, WatchStream,
};
use crate::error::ClientError;

type WatchSender = mpsc::UnboundedSender<Result<WatchResponse, ClientError>>;

struct Watcher {
    prefix: String,
    tx: WatchSender,
}

#[derive(Default)]
struct StoreState {
    revision: Revision,
    compacted: Revision,
    data: BTreeMap<String, KeyValue>,
    history: Vec<WatchEvent>,
    watchers: Vec<Watcher>,
    read_faults: VecDeque<ClientError>,
    watch_faults: VecDeque<ClientError>,
}

impl StoreState {
    fn broadcast(&mut self, event: WatchEvent) {
        let revision = self.revision;
        self.watchers.retain(|w| {
            if !event.kv.key.starts_with(&w.prefix) {
                return true;
            }
            w.tx
                .send(Ok(WatchResponse {
                    revision: Some(revision),
                    message: WatchMessage::Events(vec![event.clone()]),
                }))
                .is_ok()
        });
        self.history.push(event);
    }
}

/// In-memory config store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap the store as a factory handing out itself.
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ClientFactory> {
        Arc::new(MemoryFactory(self.clone()))
    }

    pub fn revision(&self) -> Revision {
        self.state.lock().revision
    }

    /// Number of `read`/`readdir` calls served or failed so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Store `value` at `key`, returning the new revision.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Revision {
        let mut state = self.state.lock();
        state.revision += 1;
        let revision = state.revision;
        let create_revision = state
            .data
            .get(key)
            .map(|kv| kv.create_revision)
            .unwrap_or(revision);

        let kv = KeyValue {
            key: key.to_string(),
            value: value.into(),
            create_revision,
            mod_revision: revision,
        };
        state.data.insert(key.to_string(), kv.clone());
        state.broadcast(WatchEvent {
            kind: EventKind::Put,
            kv,
        });
        revision
    }

    /// Store a JSON document at `key`.
    pub fn put_json(&self, key: &str, value: &serde_json::Value) -> Revision {
        self.put(key, value.to_string())
    }

    /// Delete `key`; `None` when it did not exist.
    pub fn delete(&self, key: &str) -> Option<Revision> {
        let mut state = self.state.lock();
        let previous = state.data.remove(key)?;
        state.revision += 1;
        let revision = state.revision;
        state.broadcast(WatchEvent {
            kind: EventKind::Delete,
            kv: KeyValue {
                key: previous.key,
                value: Vec::new(),
                create_revision: previous.create_revision,
                mod_revision: revision,
            },
        });
        Some(revision)
    }

    /// Discard history older than `revision`.
    pub fn compact(&self, revision: Revision) {
        let mut state = self.state.lock();
        state.compacted = revision.min(state.revision);
        let floor = state.compacted;
        state.history.retain(|ev| ev.kv.mod_revision >= floor);
    }

    /// Simulate a restart that lost every revision above `revision`.
    ///
    /// Data is kept, history and active watches are dropped.
    pub fn restart(&self, revision: Revision) {
        let mut state = self.state.lock();
        state.revision = revision;
        state.compacted = 0;
        state.history.clear();
        state.watchers.clear();
        for kv in state.data.values_mut() {
            kv.mod_revision = kv.mod_revision.min(revision);
            kv.create_revision = kv.create_revision.min(revision);
        }
    }

    /// Fail the next `times` reads with `err`.
    pub fn fail_reads(&self, err: ClientError, times: usize) {
        let mut state = self.state.lock();
        state.read_faults.extend(std::iter::repeat(err).take(times));
    }

    /// Fail the next `times` watch calls with `err`.
    pub fn fail_watches(&self, err: ClientError, times: usize) {
        let mut state = self.state.lock();
        state.watch_faults.extend(std::iter::repeat(err).take(times));
    }

    /// End every active watch stream, as a server-side close would.
    pub fn close_watches(&self) {
        self.state.lock().watchers.clear();
    }

    fn range<F>(&self, filter: F) -> Result<ReadResponse, ClientError>
    where
        F: Fn(&str) -> bool,
    {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        if let Some(err) = state.read_faults.pop_front() {
            return Err(err);
        }
        Ok(ReadResponse {
            revision: state.revision,
            kvs: state
                .data
                .values()
                .filter(|kv| filter(&kv.key))
                .cloned()
                .collect(),
        })
    }
}

#[async_trait]
impl ConfigClient for MemoryStore {
    async fn read(&self, key: &str) -> Result<ReadResponse, ClientError> {
        self.range(|k| k == key)
    }

    async fn readdir(&self, key: &str) -> Result<ReadResponse, ClientError> {
        self.range(|k| k.starts_with(key))
    }

    async fn watch(
        &self,
        prefix: &str,
        from_revision: Revision,
        _timeout: Duration,
    ) -> Result<WatchStream, ClientError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.state.lock();
            if let Some(err) = state.watch_faults.pop_front() {
                return Err(err);
            }

            let current = state.revision;
            if from_revision > 0 && from_revision < state.compacted {
                let _ = tx.send(Ok(WatchResponse {
                    revision: Some(current),
                    message: WatchMessage::Canceled {
                        compact_revision: Some(state.compacted),
                        reason: Some("required revision has been compacted".into()),
                    },
                }));
            } else {
                let _ = tx.send(Ok(WatchResponse {
                    revision: Some(current),
                    message: WatchMessage::Created,
                }));

                let replay: Vec<WatchEvent> = state
                    .history
                    .iter()
                    .filter(|ev| ev.kv.mod_revision >= from_revision && ev.kv.key.starts_with(prefix))
                    .cloned()
                    .collect();
                if !replay.is_empty() {
                    let _ = tx.send(Ok(WatchResponse {
                        revision: Some(current),
                        message: WatchMessage::Events(replay),
                    }));
                } else if from_revision > current + 1 {
                    // Future revision: report where the store actually is.
                    let _ = tx.send(Ok(WatchResponse {
                        revision: Some(current),
                        message: WatchMessage::Events(Vec::new()),
                    }));
                }

                state.watchers.push(Watcher {
                    prefix: prefix.to_string(),
                    tx,
                });
            }
        }

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(Box::pin(stream))
    }
}

struct MemoryFactory(Arc<MemoryStore>);

#[async_trait]
impl ClientFactory for MemoryFactory {
    async fn connect(&self) -> Result<Arc<dyn ConfigClient>, ClientError> {
        Ok(self.0.clone() as Arc<dyn ConfigClient>)
    }
}
