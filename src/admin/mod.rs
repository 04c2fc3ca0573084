//! Admin HTTP surface.
//!
//! # Routes
//! ```text
//! GET /status               public    worker id, readiness, broker state
//! GET /admin/caches         bearer    one summary per resource cache
//! GET /admin/caches/{name}  bearer    summary plus item keys
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::lifecycle::WorkerHandle;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub worker: WorkerHandle,
    pub api_key: Arc<str>,
}

impl AdminState {
    pub fn new(worker: WorkerHandle, api_key: &str) -> Self {
        Self {
            worker,
            api_key: api_key.into(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    let protected = Router::new()
        .route("/admin/caches", get(list_caches))
        .route("/admin/caches/{name}", get(get_cache))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/status", get(get_status))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
