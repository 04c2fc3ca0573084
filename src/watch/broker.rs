//! Watch Broker: one long-poll stream, many consumers.
//!
//! # State Machine
//! ```text
//! Uninitialized ──first use──▶ Starting ──created ack──▶ Streaming
//!                                 ▲  ▲                      │    │
//!                                 │  └─ compacted/restarted ─┘    │ stream error
//!                                 └────────── backoff ─────── Failed ◀┘
//! ```
//!
//! # Per-response handling
//! - created ack (or any accepted batch): stream is live, state `Streaming`
//! - canceled with compact revision: resume from it, publish `Compacted`
//! - no parseable header revision: malformed, restart from current revision
//! - revision went backwards: adopt it as current and base revision,
//!   publish `Restarted`
//! - events: append one batch, current revision becomes `revision + 1`
//! - progress only: advance current revision, append nothing
//!
//! # Design Decisions
//! - A normal close or an elapsed long-poll window is not an error
//! - The streaming loop races the shutdown signal; whichever finishes first
//!   cancels the other, then `Exiting` is published to every consumer
//! - Consumers read the shared log through their own [`Subscription`]

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bootstrap::BootstrapLoader;
use crate::client::{ClientProvider, ConfigClient, Revision, WatchMessage, WatchResponse};
use crate::error::{ClientError, SyncError, SyncResult};
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::watch::log::{BrokerSignal, EventLog, LogEntry, WatcherId};

/// Pause before retrying a failed base read or a failed stream.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Uninitialized = 0,
    Starting = 1,
    Streaming = 2,
    Failed = 3,
}

impl BrokerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerState::Uninitialized => "uninitialized",
            BrokerState::Starting => "starting",
            BrokerState::Streaming => "streaming",
            BrokerState::Failed => "failed",
        }
    }
}

impl From<u8> for BrokerState {
    fn from(val: u8) -> Self {
        match val {
            1 => BrokerState::Starting,
            2 => BrokerState::Streaming,
            3 => BrokerState::Failed,
            _ => BrokerState::Uninitialized,
        }
    }
}

/// What the stream loop does after handling one response.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Restart,
    RestartAfterDelay,
}

/// Process-wide watch multiplexer.
pub struct WatchBroker {
    prefix: String,
    clients: Arc<ClientProvider>,
    bootstrap: Option<Arc<BootstrapLoader>>,
    watch_timeout: Duration,
    shutdown: Shutdown,
    state: AtomicU8,
    /// Revision the next watch call starts from.
    revision: AtomicI64,
    /// First revision the stream covers; 0 until fixed.
    base_revision: AtomicI64,
    ready: watch::Sender<bool>,
    log: Mutex<EventLog>,
    task: Mutex<Option<JoinHandle<()>>>,
    exit_published: AtomicBool,
}

impl WatchBroker {
    pub fn new(
        prefix: &str,
        clients: Arc<ClientProvider>,
        bootstrap: Option<Arc<BootstrapLoader>>,
        watch_timeout: Duration,
        shutdown: Shutdown,
    ) -> Arc<Self> {
        let (ready, _) = watch::channel(false);
        Arc::new(Self {
            prefix: prefix.to_string(),
            clients,
            bootstrap,
            watch_timeout,
            shutdown,
            state: AtomicU8::new(BrokerState::Uninitialized as u8),
            revision: AtomicI64::new(0),
            base_revision: AtomicI64::new(0),
            ready,
            log: Mutex::new(EventLog::new()),
            task: Mutex::new(None),
            exit_published: AtomicBool::new(false),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn state(&self) -> BrokerState {
        BrokerState::from(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: BrokerState) {
        let previous = BrokerState::from(self.state.swap(state as u8, Ordering::SeqCst));
        if previous != state {
            tracing::debug!(from = ?previous, to = ?state, "Watch broker state change");
        }
    }

    /// Revision the next long-poll starts from.
    pub fn revision(&self) -> Revision {
        self.revision.load(Ordering::SeqCst)
    }

    /// First revision the shared log is guaranteed to cover, 0 before start.
    pub fn base_revision(&self) -> Revision {
        self.base_revision.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub fn is_exiting(&self) -> bool {
        self.shutdown.is_exiting()
    }

    /// Slots currently held by the shared log.
    pub fn log_len(&self) -> usize {
        self.log.lock().retained()
    }

    /// Register a consumer for keys under `prefix`. Its cursor starts at the tail.
    pub fn register(self: &Arc<Self>, prefix: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let (id, cursor) = self.log.lock().register(tx);
        tracing::debug!(prefix, watcher = id, cursor, "Registered watch consumer");
        Subscription {
            broker: self.clone(),
            id,
            cursor,
            notify: rx,
        }
    }

    /// Spawn the broker task unless it is alive or the worker is exiting.
    pub fn ensure_running(self: &Arc<Self>) {
        if self.is_exiting() {
            return;
        }
        let mut task = self.task.lock();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                return;
            }
            tracing::warn!(prefix = %self.prefix, "Watch broker task ended, restarting");
            metrics::record_watch_restart("task_ended");
        }
        if self.state() == BrokerState::Uninitialized {
            self.set_state(BrokerState::Starting);
        }
        *task = Some(tokio::spawn(self.clone().run()));
    }

    /// Wait until the base revision is fixed.
    pub async fn wait_ready(&self, timeout: Duration) -> SyncResult<()> {
        if self.is_exiting() {
            return Err(SyncError::Exiting);
        }
        let mut ready = self.ready.subscribe();
        let became_ready = async move {
            loop {
                let is_ready = *ready.borrow_and_update();
                if is_ready {
                    return true;
                }
                if ready.changed().await.is_err() {
                    return false;
                }
            }
        };
        tokio::select! {
            res = tokio::time::timeout(timeout, became_ready) => match res {
                Ok(true) => Ok(()),
                Ok(false) => Err(SyncError::Exiting),
                Err(_) => Err(SyncError::Timeout),
            },
            _ = self.shutdown.wait() => Err(SyncError::Exiting),
        }
    }

    /// Release every blocked consumer and stop the streaming task.
    pub fn shutdown(&self) {
        self.publish_exiting();
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    pub(crate) fn publish(&self, entry: LogEntry) {
        let mut log = self.log.lock();
        log.append(entry);
        metrics::record_event_log_size(log.retained());
    }

    fn publish_exiting(&self) {
        if !self.exit_published.swap(true, Ordering::SeqCst) {
            tracing::info!(prefix = %self.prefix, "Watch broker exiting");
            self.publish(LogEntry::Signal(BrokerSignal::Exiting));
        }
    }

    async fn run(self: Arc<Self>) {
        let shutdown = self.shutdown.clone();
        tokio::select! {
            _ = self.stream_loop() => {}
            _ = shutdown.wait() => {}
        }
        if shutdown.is_exiting() {
            self.publish_exiting();
        }
    }

    async fn stream_loop(&self) {
        let client = self.connect().await;

        if self.base_revision() == 0 {
            let base = self.fetch_base_revision(client.as_ref()).await;
            self.revision.store(base, Ordering::SeqCst);
            self.base_revision.store(base, Ordering::SeqCst);
            tracing::info!(prefix = %self.prefix, revision = base, "Watch broker base revision fixed");
        }
        self.ready.send_replace(true);

        loop {
            match self.watch_once(client.as_ref()).await {
                Ok(Flow::RestartAfterDelay) => tokio::time::sleep(RETRY_DELAY).await,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        prefix = %self.prefix,
                        revision = self.revision(),
                        error = %e,
                        "Watch stream failed"
                    );
                    metrics::record_watch_restart("error");
                    self.set_state(BrokerState::Failed);
                    tokio::time::sleep(RETRY_DELAY).await;
                    self.set_state(BrokerState::Starting);
                }
            }
        }
    }

    async fn connect(&self) -> Arc<dyn ConfigClient> {
        loop {
            match self.clients.get().await {
                Ok(client) => return client,
                Err(e) => {
                    tracing::warn!(error = %e, "Watch broker could not obtain a store client");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// Bootstrap revision + 1, or a point read of the namespace + 1.
    async fn fetch_base_revision(&self, client: &dyn ConfigClient) -> Revision {
        if let Some(revision) = self.bootstrap.as_ref().map(|b| b.revision()) {
            return revision + 1;
        }
        loop {
            match client.read(&self.prefix).await {
                Ok(resp) => return resp.revision + 1,
                Err(e) => {
                    tracing::warn!(prefix = %self.prefix, error = %e, "Base revision read failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    /// One long-poll call. `Ok` covers every way the stream ends normally.
    async fn watch_once(&self, client: &dyn ConfigClient) -> Result<Flow, ClientError> {
        let from = self.revision();
        let mut stream = client.watch(&self.prefix, from, self.watch_timeout).await?;
        let deadline = Instant::now() + self.watch_timeout;

        loop {
            let resp = match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) | Ok(None) | Ok(Some(Err(ClientError::Timeout))) => return Ok(Flow::Continue),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(resp))) => resp,
            };
            match self.handle_response(resp) {
                Flow::Continue => {}
                other => return Ok(other),
            }
        }
    }

    fn handle_response(&self, resp: WatchResponse) -> Flow {
        let current = self.revision();
        match resp.message {
            WatchMessage::Created => {
                self.set_state(BrokerState::Streaming);
                Flow::Continue
            }
            WatchMessage::Canceled {
                compact_revision: Some(revision),
                ..
            } => {
                tracing::warn!(
                    prefix = %self.prefix,
                    current,
                    compact_revision = revision,
                    "Watch canceled by store compaction"
                );
                metrics::record_watch_restart("compacted");
                self.revision.store(revision, Ordering::SeqCst);
                self.publish(LogEntry::Signal(BrokerSignal::Compacted { revision }));
                self.set_state(BrokerState::Starting);
                Flow::Restart
            }
            WatchMessage::Canceled {
                compact_revision: None,
                reason,
            } => {
                tracing::warn!(
                    prefix = %self.prefix,
                    current,
                    reason = reason.as_deref().unwrap_or("unknown"),
                    "Watch canceled by store"
                );
                metrics::record_watch_restart("canceled");
                Flow::RestartAfterDelay
            }
            WatchMessage::Events(events) => {
                let Some(revision) = resp.revision else {
                    tracing::error!(
                        prefix = %self.prefix,
                        current,
                        "Watch response without revision header, restarting stream"
                    );
                    metrics::record_watch_restart("malformed");
                    return Flow::RestartAfterDelay;
                };

                // A progress notification reports the store's own revision,
                // which trails `current` by one when nothing changed.
                let floor = if events.is_empty() { current - 1 } else { current };
                if revision < floor {
                    tracing::warn!(
                        prefix = %self.prefix,
                        current,
                        revision,
                        "Store revision went backwards, store restarted"
                    );
                    metrics::record_watch_restart("restarted");
                    // The restarted store's history begins at `revision`.
                    self.revision.store(revision, Ordering::SeqCst);
                    self.base_revision.store(revision, Ordering::SeqCst);
                    self.publish(LogEntry::Signal(BrokerSignal::Restarted { revision }));
                    self.set_state(BrokerState::Starting);
                    return Flow::Restart;
                }

                self.revision.fetch_max(revision + 1, Ordering::SeqCst);
                self.set_state(BrokerState::Streaming);
                if !events.is_empty() {
                    tracing::trace!(revision, events = events.len(), "Watch batch received");
                    self.publish(LogEntry::Batch { revision, events });
                }
                Flow::Continue
            }
        }
    }
}

/// A consumer's read cursor into the shared log.
///
/// Dropping it unregisters the cursor so compaction can pass it.
pub struct Subscription {
    broker: Arc<WatchBroker>,
    id: WatcherId,
    cursor: u64,
    notify: mpsc::Receiver<()>,
}

impl Subscription {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Entries from the cursor on, without waiting.
    pub fn pending(&self) -> Vec<(u64, Arc<LogEntry>)> {
        self.broker.log.lock().read_from(self.cursor)
    }

    /// Entries from the cursor on, waiting up to `timeout` if there are none.
    ///
    /// `None` when the wait timed out. An empty vector means the wake-up
    /// found nothing new.
    pub async fn next_entries(&mut self, timeout: Duration) -> Option<Vec<(u64, Arc<LogEntry>)>> {
        let entries = self.pending();
        if !entries.is_empty() {
            return Some(entries);
        }
        match tokio::time::timeout(timeout, self.notify.recv()).await {
            Ok(Some(())) => Some(self.pending()),
            Ok(None) | Err(_) => None,
        }
    }

    /// Mark every entry before `to` as consumed.
    pub fn advance(&mut self, to: u64) {
        if to <= self.cursor {
            return;
        }
        self.cursor = to;
        let mut log = self.broker.log.lock();
        log.advance(self.id, to);
        metrics::record_event_log_size(log.retained());
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.log.lock().unregister(self.id);
    }
}
