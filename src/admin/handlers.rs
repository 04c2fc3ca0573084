use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::ResourceCache;
use crate::client::Revision;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub worker_id: String,
    pub ready: bool,
    pub broker_state: &'static str,
    pub broker_revision: Revision,
}

#[derive(Serialize)]
pub struct CacheSummary {
    pub name: String,
    pub key: String,
    pub single_item: bool,
    pub loaded: bool,
    pub needs_full_reload: bool,
    pub revision: Revision,
    pub generation: u64,
    pub items: usize,
}

impl CacheSummary {
    fn of(cache: &ResourceCache) -> Self {
        Self {
            name: cache.name().to_string(),
            key: cache.spec().key.clone(),
            single_item: cache.spec().single_item,
            loaded: cache.is_loaded(),
            needs_full_reload: cache.needs_full_reload(),
            revision: cache.last_revision(),
            generation: cache.generation(),
            items: cache.len(),
        }
    }
}

#[derive(Serialize)]
pub struct ItemSummary {
    pub id: String,
    pub key: String,
    pub modified_revision: Revision,
}

#[derive(Serialize)]
pub struct CacheDetail {
    #[serde(flatten)]
    pub summary: CacheSummary,
    pub keys: Vec<ItemSummary>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let worker = &state.worker;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        worker_id: worker.worker_id().to_string(),
        ready: worker.is_loaded(),
        broker_state: worker.broker().state().as_str(),
        broker_revision: worker.broker().revision(),
    })
}

pub async fn list_caches(State(state): State<AdminState>) -> Json<Vec<CacheSummary>> {
    Json(
        state
            .worker
            .caches()
            .iter()
            .map(|cache| CacheSummary::of(cache))
            .collect(),
    )
}

pub async fn get_cache(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<CacheDetail>, StatusCode> {
    let cache = state.worker.cache(&name).ok_or(StatusCode::NOT_FOUND)?;
    let mut keys: Vec<ItemSummary> = cache
        .values()
        .iter()
        .map(|item| ItemSummary {
            id: item.id.clone(),
            key: item.key.clone(),
            modified_revision: item.modified_revision,
        })
        .collect();
    keys.sort_by(|a, b| a.key.cmp(&b.key));

    Ok(Json(CacheDetail {
        summary: CacheSummary::of(cache),
        keys,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{header::AUTHORIZATION, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::admin::{setup_admin_router, AdminState};
    use crate::cache::ValidatorRegistry;
    use crate::client::MemoryStore;
    use crate::config::{ResourceConfig, SyncConfig};
    use crate::lifecycle::{Shutdown, SyncWorker};

    async fn worker(store: &Arc<MemoryStore>, shutdown: &Shutdown) -> SyncWorker {
        let mut config = SyncConfig::default();
        config.sync.worker_id = "admin-test".into();
        config.resources = vec![
            ResourceConfig::directory("routes"),
            ResourceConfig::single("plugins"),
        ];
        let worker = SyncWorker::start(
            &config,
            store.factory(),
            ValidatorRegistry::new(),
            shutdown.clone(),
        )
        .await;
        for _ in 0..100 {
            if worker.caches().iter().all(|c| c.is_loaded()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        worker
    }

    async fn get(router: axum::Router, uri: &str, key: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(key) = key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key));
        }
        let response = router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_is_public() {
        let store = Arc::new(MemoryStore::new());
        store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        let shutdown = Shutdown::new();
        let worker = worker(&store, &shutdown).await;
        let router = setup_admin_router(AdminState::new(worker.handle(), "secret"));

        let (status, body) = get(router, "/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["worker_id"], "admin-test");
        assert_eq!(body["ready"], true);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_caches_require_key() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let worker = worker(&store, &shutdown).await;
        let router = setup_admin_router(AdminState::new(worker.handle(), "secret"));

        let (status, _) = get(router.clone(), "/admin/caches", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = get(router.clone(), "/admin/caches", Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = get(router, "/admin/caches", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["routes", "plugins"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_key_never_authenticates() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = Shutdown::new();
        let worker = worker(&store, &shutdown).await;
        let router = setup_admin_router(AdminState::new(worker.handle(), ""));

        let (status, _) = get(router, "/admin/caches", Some("")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_detail() {
        let store = Arc::new(MemoryStore::new());
        store.put_json("/apisix/routes/2", &json!({"uri": "/b"}));
        store.put_json("/apisix/routes/1", &json!({"uri": "/a"}));
        let shutdown = Shutdown::new();
        let worker = worker(&store, &shutdown).await;
        let router = setup_admin_router(AdminState::new(worker.handle(), "secret"));

        let (status, body) = get(router.clone(), "/admin/caches/routes", Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["items"], 2);
        assert_eq!(body["revision"], 2);
        assert_eq!(body["keys"][0]["key"], "/apisix/routes/1");
        assert_eq!(body["keys"][1]["id"], "2");

        let (status, _) = get(router, "/admin/caches/missing", Some("secret")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
