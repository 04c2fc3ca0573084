//! gateway-sync
//!
//! Keeps an API gateway's in-memory configuration in step with a remote
//! revisioned key-value store.
//!
//! # Architecture Overview
//!
//! ```text
//!            config store (etcd v3 HTTP gateway)
//!                 │                     │
//!          bootstrap read        one watch stream
//!                 │                     │
//!                 ▼                     ▼
//!          ┌────────────┐      ┌─────────────────┐
//!          │ bootstrap  │      │  watch broker   │──▶ shared event log
//!          └─────┬──────┘      └─────────────────┘         │
//!                │ one bucket per resource                  │ one cursor per cache
//!                ▼                                          ▼
//!          ┌──────────────────────────────────────────────────────┐
//!          │ resource caches (routes, upstreams, plugins, ...)    │
//!          │   each driven by its own resync supervisor           │
//!          └──────────────────────────────────────────────────────┘
//!                │
//!                ▼
//!          admin HTTP (/status, /admin/caches)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_sync::admin::{setup_admin_router, AdminState};
use gateway_sync::cache::ValidatorRegistry;
use gateway_sync::client::EtcdClientFactory;
use gateway_sync::config::{load_config, load_defaults};
use gateway_sync::lifecycle::{wait_for_signal, Shutdown, SyncWorker};
use gateway_sync::observability::{init_tracing, metrics};

#[derive(Parser)]
#[command(name = "gateway-sync")]
#[command(about = "Mirror API gateway configuration from a remote store", long_about = None)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_defaults()?,
    };

    init_tracing(&config.observability.log_level, config.observability.log_format);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway-sync starting");
    tracing::info!(
        endpoints = ?config.store.endpoints,
        prefix = %config.store.prefix,
        watch_timeout_secs = config.store.watch_timeout_secs,
        resync_delay_secs = config.sync.resync_delay_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let factory = EtcdClientFactory::new(config.store.clone());
    let worker = SyncWorker::start(
        &config,
        std::sync::Arc::new(factory),
        ValidatorRegistry::new(),
        shutdown.clone(),
    )
    .await;

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState::new(worker.handle(), &config.admin.api_key));
        let admin_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { admin_shutdown.wait().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
        }))
    } else {
        None
    };

    let signals = shutdown.clone();
    tokio::spawn(async move { wait_for_signal(&signals).await });

    worker.join().await;
    if let Some(admin) = admin {
        let _ = admin.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
