//! Worker startup orchestration.
//!
//! # Responsibilities
//! - Build the shared client provider from the configured factory
//! - Take the bootstrap snapshot unless configured to skip it
//! - Construct the watch broker and one resource cache per resource
//! - Spawn one supervisor per cache and hand out a read-only handle
//!
//! # Design Decisions
//! - A failed bootstrap is logged and skipped; caches then read for themselves
//! - The broker is not started here; the first cache sync starts it
//! - Shutdown order: stop the broker (releases every waiting cache), then
//!   join the supervisors

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::bootstrap::{default_resources, resource_key, BootstrapLoader};
use crate::cache::{ResourceCache, ResourceSpec, ValidatorRegistry};
use crate::client::{ClientFactory, ClientProvider};
use crate::config::SyncConfig;
use crate::health::SyncStatus;
use crate::lifecycle::Shutdown;
use crate::supervisor::{Supervisor, SupervisorSettings};
use crate::watch::WatchBroker;

/// Cheap, cloneable view of a running worker.
#[derive(Clone)]
pub struct WorkerHandle {
    worker_id: Arc<str>,
    status: SyncStatus,
    broker: Arc<WatchBroker>,
    caches: Arc<Vec<Arc<ResourceCache>>>,
}

impl WorkerHandle {
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn status(&self) -> &SyncStatus {
        &self.status
    }

    pub fn is_loaded(&self) -> bool {
        self.status.is_loaded(&self.worker_id)
    }

    pub fn broker(&self) -> &Arc<WatchBroker> {
        &self.broker
    }

    pub fn caches(&self) -> &[Arc<ResourceCache>] {
        &self.caches
    }

    pub fn cache(&self, name: &str) -> Option<&Arc<ResourceCache>> {
        self.caches.iter().find(|c| c.name() == name)
    }
}

/// One synchronization worker: broker, caches, and their supervisors.
pub struct SyncWorker {
    handle: WorkerHandle,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncWorker {
    pub async fn start(
        config: &SyncConfig,
        factory: Arc<dyn ClientFactory>,
        validators: ValidatorRegistry,
        shutdown: Shutdown,
    ) -> Self {
        let worker_id: Arc<str> = if config.sync.worker_id.is_empty() {
            uuid::Uuid::new_v4().to_string().into()
        } else {
            config.sync.worker_id.as_str().into()
        };
        let prefix = config.store.prefix.as_str();
        let resources = if config.resources.is_empty() {
            default_resources()
        } else {
            config.resources.clone()
        };

        tracing::info!(
            worker_id = %worker_id,
            prefix,
            resources = resources.len(),
            endpoints = ?config.store.endpoints,
            "Starting sync worker"
        );

        let clients = Arc::new(ClientProvider::new(factory));

        let bootstrap = if config.sync.skip_initial_sync {
            tracing::info!("Initial bulk sync skipped by configuration");
            None
        } else {
            match clients.get().await {
                Ok(client) => match BootstrapLoader::load(client.as_ref(), prefix, &resources).await {
                    Ok(loader) => Some(Arc::new(loader)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Bootstrap read failed, caches will load individually");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Config store unreachable at startup, skipping bootstrap");
                    None
                }
            }
        };

        let watch_timeout = Duration::from_secs(config.store.watch_timeout_secs);
        let broker = WatchBroker::new(
            prefix,
            clients.clone(),
            bootstrap.clone(),
            watch_timeout,
            shutdown.clone(),
        );

        let caches: Vec<Arc<ResourceCache>> = resources
            .iter()
            .map(|resource| {
                Arc::new(ResourceCache::new(
                    ResourceSpec {
                        name: resource.name.clone(),
                        key: resource_key(prefix, &resource.name),
                        single_item: resource.single_item,
                    },
                    broker.clone(),
                    clients.clone(),
                    bootstrap.clone(),
                    validators.get(&resource.name),
                    watch_timeout,
                ))
            })
            .collect();

        let status = SyncStatus::new();
        status.register(&worker_id);

        let settings = SupervisorSettings::from_config(&config.sync, &worker_id);
        let tasks = caches
            .iter()
            .map(|cache| {
                let supervisor = Supervisor::new(
                    cache.clone(),
                    clients.clone(),
                    status.clone(),
                    shutdown.clone(),
                    settings.clone(),
                );
                tokio::spawn(supervisor.run())
            })
            .collect();

        Self {
            handle: WorkerHandle {
                worker_id,
                status,
                broker,
                caches: Arc::new(caches),
            },
            shutdown,
            tasks,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn worker_id(&self) -> &str {
        self.handle.worker_id()
    }

    pub fn status(&self) -> &SyncStatus {
        self.handle.status()
    }

    pub fn broker(&self) -> &Arc<WatchBroker> {
        self.handle.broker()
    }

    pub fn caches(&self) -> &[Arc<ResourceCache>] {
        self.handle.caches()
    }

    pub fn cache(&self, name: &str) -> Option<&Arc<ResourceCache>> {
        self.handle.cache(name)
    }

    /// Wait for shutdown, stop the broker, then wait for every supervisor.
    pub async fn join(self) {
        self.shutdown.wait().await;
        self.handle.broker.shutdown();
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Supervisor task failed");
            }
        }
        for cache in self.handle.caches.iter() {
            cache.close();
        }
        tracing::info!(worker_id = %self.handle.worker_id, "Sync worker stopped");
    }
}
