//! Shared helpers for the integration tests.

use std::sync::Arc;
use std::time::Duration;

use gateway_sync::cache::{ResourceCache, ValidatorRegistry};
use gateway_sync::client::MemoryStore;
use gateway_sync::config::{ResourceConfig, SyncConfig};
use gateway_sync::lifecycle::{Shutdown, SyncWorker};
use serde_json::Value;

/// Fresh store whose revision has been advanced to `revision` by writes
/// outside every resource directory.
pub fn store_at(revision: i64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    while store.revision() < revision {
        store.put("/apisix/unrelated/counter", "{}");
    }
    store
}

/// Start a worker on `store` mirroring `resources`.
pub async fn start_worker<F>(
    store: &Arc<MemoryStore>,
    resources: Vec<ResourceConfig>,
    configure: F,
) -> (SyncWorker, Shutdown)
where
    F: FnOnce(&mut SyncConfig),
{
    let mut config = SyncConfig::default();
    config.resources = resources;
    config.sync.worker_id = "test-worker".into();
    configure(&mut config);

    let shutdown = Shutdown::new();
    let worker = SyncWorker::start(
        &config,
        store.factory(),
        ValidatorRegistry::new(),
        shutdown.clone(),
    )
    .await;
    (worker, shutdown)
}

/// Poll `check` every 100ms of (paused) time until it holds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..600 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Current value of item `id`.
#[allow(dead_code)]
pub fn value_of(cache: &ResourceCache, id: &str) -> Option<Value> {
    cache.get(id).map(|item| item.value.clone())
}

/// `(id, value, create revision, mod revision)` of every live item, sorted by id.
#[allow(dead_code)]
pub fn snapshot(cache: &ResourceCache) -> Vec<(String, Value, i64, i64)> {
    let mut items: Vec<_> = cache
        .values()
        .iter()
        .map(|item| {
            (
                item.id.clone(),
                item.value.clone(),
                item.create_revision,
                item.modified_revision,
            )
        })
        .collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items
}
