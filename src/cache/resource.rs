//! Resource Cache: a versioned snapshot of one configuration directory.
//!
//! # Layout
//! ```text
//! slots:  [ Live(1) ][ Tomb ][ Live(3) ][ Live(7) ][ Tomb ] ...
//! index:  "1" → 0, "3" → 2, "7" → 3
//! ```
//! Deletes tombstone their slot; after enough deletions the slots are
//! rebuilt without tombstones and the index recomputed.
//!
//! # Sync
//! Each `sync()` does at most one unit of work:
//! - a full reload when one is pending (first load, compaction, restart,
//!   or a gap between this cache and the broker's base revision)
//! - otherwise a drain of new shared-log entries, waiting for some if none
//!
//! # Invariants
//! - `index[k]` always points at a live slot holding key `k`
//! - `last_applied` never decreases, except when adopting the revision of
//!   a store that restarted underneath the watch
//! - `generation` changes iff the visible item set changed
//! - Items are disposed exactly once, after the view lock is released

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::Value;

use crate::bootstrap::BootstrapLoader;
use crate::cache::item::Item;
use crate::cache::validator::{validate, ItemValidator};
use crate::client::{key_belongs_to, ClientProvider, EventKind, KeyValue, ReadResponse, Revision, WatchEvent};
use crate::error::{SyncError, SyncResult};
use crate::observability::metrics;
use crate::watch::{BrokerSignal, LogEntry, Subscription, WatchBroker};

/// Processed deletions that trigger a slot rebuild.
pub const COMPACT_THRESHOLD: usize = 100;

/// Identity of one mirrored resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSpec {
    /// Resource name, e.g. `routes`.
    pub name: String,
    /// Full store key, e.g. `/apisix/routes`.
    pub key: String,
    /// One value at `key` instead of a directory below it.
    pub single_item: bool,
}

/// What one successful `sync()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Full reload installed `items` live items.
    Reloaded { items: usize },
    /// Drained shared-log entries; `changes` mutations were visible.
    Applied { changes: usize },
    /// Woken up but found nothing new.
    NoProgress,
}

enum Slot {
    Live(Arc<Item>),
    Tombstone,
}

#[derive(Default)]
struct CacheView {
    slots: Vec<Slot>,
    index: HashMap<String, usize>,
    last_applied: Revision,
    generation: u64,
    loaded: bool,
}

impl CacheView {
    fn get(&self, id: &str) -> Option<&Arc<Item>> {
        match self.slots.get(*self.index.get(id)?) {
            Some(Slot::Live(item)) => Some(item),
            _ => None,
        }
    }

    fn live(&self) -> impl Iterator<Item = &Arc<Item>> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Live(item) => Some(item),
            Slot::Tombstone => None,
        })
    }

    fn compact(&mut self) {
        self.slots.retain(|slot| matches!(slot, Slot::Live(_)));
        self.index = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| match slot {
                Slot::Live(item) => Some((item.id.clone(), pos)),
                Slot::Tombstone => None,
            })
            .collect();
    }
}

/// Reader-side state. Only one `sync()` runs at a time.
struct ReadState {
    subscription: Subscription,
    deletions: usize,
    /// The pending reload follows a store restart.
    after_restart: bool,
}

/// One logical resource directory mirrored in memory.
pub struct ResourceCache {
    spec: ResourceSpec,
    broker: Arc<WatchBroker>,
    clients: Arc<ClientProvider>,
    bootstrap: Option<Arc<BootstrapLoader>>,
    validator: Arc<dyn ItemValidator>,
    sync_timeout: Duration,
    view: RwLock<CacheView>,
    reader: tokio::sync::Mutex<ReadState>,
    needs_full_reload: AtomicBool,
    running: AtomicBool,
}

impl ResourceCache {
    pub fn new(
        spec: ResourceSpec,
        broker: Arc<WatchBroker>,
        clients: Arc<ClientProvider>,
        bootstrap: Option<Arc<BootstrapLoader>>,
        validator: Arc<dyn ItemValidator>,
        sync_timeout: Duration,
    ) -> Self {
        let subscription = broker.register(&spec.key);
        Self {
            spec,
            broker,
            clients,
            bootstrap,
            validator,
            sync_timeout,
            view: RwLock::new(CacheView::default()),
            reader: tokio::sync::Mutex::new(ReadState {
                subscription,
                deletions: 0,
                after_restart: false,
            }),
            needs_full_reload: AtomicBool::new(true),
            running: AtomicBool::new(true),
        }
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Point lookup by key relative to the resource (`"1"` for `/apisix/routes/1`).
    ///
    /// Single-item resources are addressed by their name.
    pub fn get(&self, id: &str) -> Option<Arc<Item>> {
        self.view.read().get(id).cloned()
    }

    /// Live items in slot order.
    pub fn values(&self) -> Vec<Arc<Item>> {
        self.view.read().live().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.view.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn generation(&self) -> u64 {
        self.view.read().generation
    }

    pub fn last_revision(&self) -> Revision {
        self.view.read().last_applied
    }

    pub fn needs_full_reload(&self) -> bool {
        self.needs_full_reload.load(Ordering::SeqCst)
    }

    /// True once the first full load completed.
    pub fn is_loaded(&self) -> bool {
        self.view.read().loaded
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop accepting sync calls. Cached items stay readable.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Advance the cache by at most one unit of work.
    pub async fn sync(&self) -> SyncResult<SyncOutcome> {
        if !self.is_running() || self.broker.is_exiting() {
            return Err(SyncError::Exiting);
        }
        let mut reader = self.reader.lock().await;
        self.broker.ensure_running();

        if self.needs_full_reload() {
            return self.full_reload(&mut reader).await;
        }

        self.broker.wait_ready(self.sync_timeout).await?;
        let base = self.broker.base_revision();
        if self.last_revision() + 1 < base {
            tracing::debug!(
                resource = %self.spec.name,
                last_applied = self.last_revision(),
                base,
                "Cache behind the watch base revision, reloading"
            );
            return self.full_reload(&mut reader).await;
        }

        let Some(entries) = reader.subscription.next_entries(self.sync_timeout).await else {
            return Err(SyncError::Timeout);
        };
        if entries.is_empty() {
            return Ok(SyncOutcome::NoProgress);
        }
        self.apply_entries(&mut reader, entries)
    }

    async fn full_reload(&self, reader: &mut ReadState) -> SyncResult<SyncOutcome> {
        let response = match self.bootstrap.as_ref().and_then(|b| b.take(&self.spec.key)) {
            Some(bucket) => {
                tracing::debug!(resource = %self.spec.name, "Using bootstrap snapshot");
                bucket
            }
            None => self.read_remote().await?,
        };

        let (items, count, changed, superseded) = {
            let current = self.view.read();
            self.build_items(&current, response.kvs)
        };

        let revision = {
            let mut view = self.view.write();
            view.index = items
                .iter()
                .enumerate()
                .map(|(pos, item)| (item.id.clone(), pos))
                .collect();
            view.slots = items.into_iter().map(Slot::Live).collect();
            if changed {
                view.generation += 1;
            }
            view.last_applied = if reader.after_restart {
                response.revision
            } else {
                view.last_applied.max(response.revision)
            };
            view.loaded = true;
            view.last_applied
        };

        reader.deletions = 0;
        reader.after_restart = false;
        self.needs_full_reload.store(false, Ordering::SeqCst);

        for item in superseded {
            item.dispose();
        }

        metrics::record_full_reload(&self.spec.name);
        metrics::record_cache_state(&self.spec.name, revision, count);
        tracing::info!(
            resource = %self.spec.name,
            revision,
            items = count,
            "Resource cache reloaded"
        );
        Ok(SyncOutcome::Reloaded { items: count })
    }

    async fn read_remote(&self) -> SyncResult<ReadResponse> {
        let client = self.clients.get().await?;
        let response = if self.spec.single_item {
            client.read(&self.spec.key).await?
        } else {
            client.readdir(&self.spec.key).await?
        };
        Ok(response)
    }

    /// Decode a full read into the next item list, reusing unchanged items.
    ///
    /// Returns the items, their count, whether the visible set changed, and
    /// the previous items that did not survive.
    fn build_items(
        &self,
        current: &CacheView,
        kvs: Vec<KeyValue>,
    ) -> (Vec<Arc<Item>>, usize, bool, Vec<Arc<Item>>) {
        let mut items: Vec<Arc<Item>> = Vec::with_capacity(kvs.len());
        let mut seen = HashSet::new();
        let mut changed = false;

        for kv in kvs {
            let Some(id) = self.item_id(&kv.key) else {
                continue;
            };
            let value = match self.decode(&id, &kv.value) {
                Ok(value) => value,
                Err(reason) => {
                    self.reject(&kv.key, kv.mod_revision, &reason);
                    continue;
                }
            };
            if !seen.insert(id.clone()) {
                continue;
            }

            match current.get(&id) {
                Some(old) if old.modified_revision == kv.mod_revision && old.value == value => {
                    items.push(old.clone());
                }
                _ => {
                    changed = true;
                    items.push(Arc::new(Item::new(
                        kv.key,
                        id,
                        value,
                        kv.create_revision,
                        kv.mod_revision,
                    )));
                }
            }
        }

        let superseded: Vec<Arc<Item>> = current
            .live()
            .filter(|old| !items.iter().any(|new| Arc::ptr_eq(old, new)))
            .cloned()
            .collect();
        if !superseded.is_empty() {
            changed = true;
        }
        let count = items.len();
        (items, count, changed, superseded)
    }

    fn apply_entries(
        &self,
        reader: &mut ReadState,
        entries: Vec<(u64, Arc<LogEntry>)>,
    ) -> SyncResult<SyncOutcome> {
        let mut next_cursor = reader.subscription.cursor();
        let mut superseded = Vec::new();
        let mut changes = 0usize;
        let mut signal = None;

        let (revision, count) = {
            let mut view = self.view.write();
            for (offset, entry) in entries {
                next_cursor = offset + 1;
                match entry.as_ref() {
                    LogEntry::Batch { revision, events } => {
                        if *revision <= view.last_applied {
                            continue;
                        }
                        for event in events {
                            if event.kv.mod_revision <= view.last_applied {
                                continue;
                            }
                            let Some(id) = self.item_id(&event.kv.key) else {
                                continue;
                            };
                            if self.apply_event(&mut view, reader, id, event, &mut superseded) {
                                changes += 1;
                                view.generation += 1;
                            }
                            view.last_applied = view.last_applied.max(event.kv.mod_revision);
                        }
                    }
                    LogEntry::Signal(s) => {
                        signal = Some(*s);
                        break;
                    }
                }
            }

            if reader.deletions > COMPACT_THRESHOLD {
                view.compact();
                reader.deletions = 0;
            }
            (view.last_applied, view.index.len())
        };

        reader.subscription.advance(next_cursor);
        for item in superseded {
            item.dispose();
        }
        if changes > 0 {
            metrics::record_events_applied(&self.spec.name, changes);
            metrics::record_cache_state(&self.spec.name, revision, count);
        }

        match signal {
            Some(BrokerSignal::Compacted { revision }) => {
                self.needs_full_reload.store(true, Ordering::SeqCst);
                Err(SyncError::Compacted { revision })
            }
            Some(BrokerSignal::Restarted { revision }) => {
                self.needs_full_reload.store(true, Ordering::SeqCst);
                reader.after_restart = true;
                Err(SyncError::Restarted { revision })
            }
            Some(BrokerSignal::Exiting) => Err(SyncError::Exiting),
            None => Ok(SyncOutcome::Applied { changes }),
        }
    }

    /// Apply one event. Returns true when the visible set changed.
    fn apply_event(
        &self,
        view: &mut CacheView,
        reader: &mut ReadState,
        id: String,
        event: &WatchEvent,
        superseded: &mut Vec<Arc<Item>>,
    ) -> bool {
        match event.kind {
            EventKind::Delete => {
                let Some(pos) = view.index.remove(&id) else {
                    return false;
                };
                if let Slot::Live(old) = std::mem::replace(&mut view.slots[pos], Slot::Tombstone) {
                    superseded.push(old);
                }
                reader.deletions += 1;
                true
            }
            EventKind::Put => {
                let value = match self.decode(&id, &event.kv.value) {
                    Ok(value) => value,
                    Err(reason) => {
                        self.reject(&event.kv.key, event.kv.mod_revision, &reason);
                        return false;
                    }
                };
                let item = Arc::new(Item::new(
                    event.kv.key.clone(),
                    id.clone(),
                    value,
                    event.kv.create_revision,
                    event.kv.mod_revision,
                ));
                match view.index.get(&id) {
                    Some(&pos) => {
                        if let Slot::Live(old) = std::mem::replace(&mut view.slots[pos], Slot::Live(item)) {
                            superseded.push(old);
                        }
                    }
                    None => {
                        view.slots.push(Slot::Live(item));
                        view.index.insert(id, view.slots.len() - 1);
                    }
                }
                true
            }
        }
    }

    /// Key relative to this resource, or `None` if the key is not ours.
    fn item_id(&self, key: &str) -> Option<String> {
        if self.spec.single_item {
            return (key == self.spec.key).then(|| self.spec.name.clone());
        }
        if key == self.spec.key || !key_belongs_to(key, &self.spec.key) {
            return None;
        }
        Some(key[self.spec.key.len() + 1..].to_string())
    }

    fn decode(&self, id: &str, raw: &[u8]) -> Result<Value, String> {
        let value: Value = serde_json::from_slice(raw).map_err(|e| format!("invalid JSON: {}", e))?;
        if !self.spec.single_item && !value.is_object() {
            return Err("item must be a JSON object".to_string());
        }
        validate(self.validator.as_ref(), id, &value)?;
        Ok(value)
    }

    fn reject(&self, key: &str, revision: Revision, reason: &str) {
        tracing::warn!(
            resource = %self.spec.name,
            key,
            revision,
            reason,
            "Rejected invalid configuration item"
        );
        metrics::record_event_rejected(&self.spec.name);
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
            .field("spec", &self.spec)
            .field("last_revision", &self.last_revision())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::validator::AcceptAll;
    use crate::client::MemoryStore;
    use crate::lifecycle::Shutdown;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct RejectDisabled;

    impl ItemValidator for RejectDisabled {
        fn check_item(&self, _id: &str, value: &Value) -> Result<(), String> {
            if value.get("disabled") == Some(&json!(true)) {
                return Err("disabled items are not accepted".into());
            }
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        broker: Arc<WatchBroker>,
        _shutdown: Shutdown,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            let shutdown = Shutdown::new();
            let broker = WatchBroker::new(
                "/apisix",
                Arc::new(ClientProvider::new(store.factory())),
                None,
                Duration::from_secs(50),
                shutdown.clone(),
            );
            Self {
                store,
                broker,
                _shutdown: shutdown,
            }
        }

        fn cache(&self, name: &str, single_item: bool, validator: Arc<dyn ItemValidator>) -> ResourceCache {
            ResourceCache::new(
                ResourceSpec {
                    name: name.to_string(),
                    key: format!("/apisix/{}", name),
                    single_item,
                },
                self.broker.clone(),
                Arc::new(ClientProvider::new(self.store.factory())),
                None,
                validator,
                Duration::from_secs(5),
            )
        }

        /// Run syncs until the cache has caught up with the store.
        async fn catch_up(&self, cache: &ResourceCache) {
            for _ in 0..50 {
                if cache.last_revision() >= self.store.revision() && !cache.needs_full_reload() {
                    return;
                }
                let _ = cache.sync().await;
            }
            panic!("cache did not catch up to revision {}", self.store.revision());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_reload_skips_invalid_items() {
        let h = Harness::new();
        h.store.put("/apisix/routes", "");
        h.store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        h.store.put("/apisix/routes/2", "not json");
        h.store.put_json("/apisix/routes/3", &json!(["not", "an", "object"]));
        h.store.put_json("/apisix/routes2/1", &json!({"uri": "/other"}));

        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        assert!(!cache.is_loaded());
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Reloaded { items: 1 });

        assert!(cache.is_loaded());
        assert_eq!(cache.get("1").unwrap().value, json!({"uri": "/a"}));
        assert!(cache.get("2").is_none());
        assert!(cache.get("3").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.last_revision(), 5);
        assert_eq!(cache.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incremental_update_and_delete() {
        let h = Harness::new();
        h.store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        cache.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();

        let first = cache.get("1").unwrap();
        let disposed = Arc::new(AtomicUsize::new(0));
        let counter = disposed.clone();
        first.on_dispose(move |_: &Item| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.store.put_json("/apisix/routes/1", &json!({"uri": "/b"}));
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Applied { changes: 1 });
        assert_eq!(cache.get("1").unwrap().value, json!({"uri": "/b"}));
        assert_eq!(cache.last_revision(), 2);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(first.is_disposed());

        let generation = cache.generation();
        h.store.delete("/apisix/routes/1");
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Applied { changes: 1 });
        assert!(cache.get("1").is_none());
        assert_eq!(cache.last_revision(), 3);
        assert_eq!(cache.generation(), generation + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_update_keeps_last_known_good() {
        let h = Harness::new();
        h.store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        let cache = h.cache("routes", false, Arc::new(RejectDisabled));
        cache.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();
        let generation = cache.generation();

        h.store.put_json("/apisix/routes/1", &json!({"uri": "/a", "disabled": true}));
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Applied { changes: 0 });
        assert_eq!(cache.get("1").unwrap().value, json!({"uri": "/a"}));
        assert_eq!(cache.last_revision(), 2);
        assert_eq!(cache.generation(), generation);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_resources_are_ignored() {
        let h = Harness::new();
        let routes = h.cache("routes", false, Arc::new(AcceptAll));
        routes.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();

        h.store.put_json("/apisix/upstreams/1", &json!({"nodes": {}}));
        assert_eq!(routes.sync().await.unwrap(), SyncOutcome::Applied { changes: 0 });
        assert!(routes.is_empty());
        assert_eq!(routes.generation(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_compacted_signal_forces_one_reload() {
        let h = Harness::new();
        for i in 0..10 {
            h.store.put_json(&format!("/apisix/routes/{}", i), &json!({"id": i}));
        }
        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        cache.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.last_revision(), 10);

        h.broker
            .publish(LogEntry::Signal(BrokerSignal::Compacted { revision: 3 }));
        assert_eq!(cache.sync().await, Err(SyncError::Compacted { revision: 3 }));
        assert!(cache.needs_full_reload());
        assert_eq!(cache.last_revision(), 10);

        let reads = h.store.read_count();
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Reloaded { items: 10 });
        assert_eq!(h.store.read_count(), reads + 1);
        assert!(!cache.needs_full_reload());
        assert_eq!(cache.last_revision(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_reuses_unchanged_items() {
        let h = Harness::new();
        h.store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        h.store.put_json("/apisix/routes/2", &json!({"uri": "/b"}));
        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        cache.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();
        let kept = cache.get("1").unwrap();
        let dropped = cache.get("2").unwrap();
        let generation = cache.generation();

        // Nothing changed: a reload keeps the same items and generation.
        h.broker
            .publish(LogEntry::Signal(BrokerSignal::Compacted { revision: 2 }));
        let _ = cache.sync().await;
        cache.sync().await.unwrap();
        assert!(Arc::ptr_eq(&kept, &cache.get("1").unwrap()));
        assert_eq!(cache.generation(), generation);

        h.store.delete("/apisix/routes/2");
        h.broker
            .publish(LogEntry::Signal(BrokerSignal::Compacted { revision: 3 }));
        let _ = cache.sync().await;
        h.catch_up(&cache).await;
        assert!(Arc::ptr_eq(&kept, &cache.get("1").unwrap()));
        assert!(cache.get("2").is_none());
        assert!(dropped.is_disposed());
        assert!(!kept.is_disposed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_item_resource() {
        let h = Harness::new();
        h.store.put_json("/apisix/plugins", &json!([{"name": "limit-count"}]));
        h.store.put_json("/apisix/plugins/ignored", &json!({}));

        let cache = h.cache("plugins", true, Arc::new(AcceptAll));
        assert_eq!(cache.sync().await.unwrap(), SyncOutcome::Reloaded { items: 1 });
        let item = cache.get("plugins").unwrap();
        assert_eq!(item.key, "/apisix/plugins");
        assert_eq!(item.value, json!([{"name": "limit-count"}]));
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();

        h.store.put_json("/apisix/plugins", &json!([]));
        h.catch_up(&cache).await;
        assert_eq!(cache.get("plugins").unwrap().value, json!([]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_compaction_after_many_deletes() {
        let h = Harness::new();
        for i in 0..150 {
            h.store.put_json(&format!("/apisix/routes/{}", i), &json!({"id": i}));
        }
        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        cache.sync().await.unwrap();
        h.broker.wait_ready(Duration::from_secs(5)).await.unwrap();

        for i in 0..120 {
            h.store.delete(&format!("/apisix/routes/{}", i));
        }
        h.catch_up(&cache).await;

        assert_eq!(cache.len(), 30);
        assert_eq!(cache.values().len(), 30);
        let view = cache.view.read();
        assert!(view.slots.len() < 150);
        for (id, pos) in &view.index {
            match &view.slots[*pos] {
                Slot::Live(item) => assert_eq!(&item.id, id),
                Slot::Tombstone => panic!("index points at a tombstone"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_cache_reports_exiting() {
        let h = Harness::new();
        let cache = h.cache("routes", false, Arc::new(AcceptAll));
        cache.close();
        assert_eq!(cache.sync().await, Err(SyncError::Exiting));
    }
}
