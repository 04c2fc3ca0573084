//! Resync Supervisor: keeps one resource cache syncing forever.
//!
//! # Iteration
//! ```text
//! obtain client ──fail──▶ log (throttled) + jittered backoff
//!     │
//!     ▼
//! cache.sync()
//!     ├─ ok / progress           → next iteration
//!     ├─ ok / no progress        → short fixed pause
//!     ├─ timeout                 → next iteration, silent
//!     ├─ compacted / restarted   → log (throttled), next iteration reloads
//!     ├─ all endpoints unhealthy → exponential retries, then jittered backoff
//!     ├─ worker exited           → stop
//!     └─ anything else / panic   → log (throttled) + jittered backoff
//! ```
//!
//! # Design Decisions
//! - Runs `iterations_per_round` iterations, then yields to the scheduler
//! - Every pause is cut short by shutdown
//! - A panic inside an iteration fails that iteration, not the worker

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

use crate::cache::{ResourceCache, SyncOutcome};
use crate::client::ClientProvider;
use crate::config::SyncSettings;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::health::SyncStatus;
use crate::lifecycle::Shutdown;
use crate::observability::{metrics, ErrorLogThrottle};
use crate::resilience::{ExponentialBackoff, JitteredDelay};

/// Supervisor tuning, derived from `[sync]`.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub resync_delay: Duration,
    pub no_progress_delay: Duration,
    pub iterations_per_round: u32,
    pub worker_id: String,
}

impl SupervisorSettings {
    pub fn from_config(settings: &SyncSettings, worker_id: &str) -> Self {
        Self {
            resync_delay: Duration::from_secs(settings.resync_delay_secs),
            no_progress_delay: Duration::from_millis(settings.no_progress_delay_ms),
            iterations_per_round: settings.iterations_per_round.max(1),
            worker_id: worker_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

enum Recovery {
    Recovered(SyncResult<SyncOutcome>),
    Exhausted(u32),
    Stopped,
}

/// Retry loop around one [`ResourceCache`].
pub struct Supervisor {
    cache: Arc<ResourceCache>,
    clients: Arc<ClientProvider>,
    status: SyncStatus,
    shutdown: Shutdown,
    settings: SupervisorSettings,
    backoff: JitteredDelay,
    throttle: ErrorLogThrottle,
    reported_loaded: bool,
}

impl Supervisor {
    pub fn new(
        cache: Arc<ResourceCache>,
        clients: Arc<ClientProvider>,
        status: SyncStatus,
        shutdown: Shutdown,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            backoff: JitteredDelay::new(settings.resync_delay),
            cache,
            clients,
            status,
            shutdown,
            settings,
            throttle: ErrorLogThrottle::default(),
            reported_loaded: false,
        }
    }

    /// Loop until the worker exits.
    pub async fn run(mut self) {
        tracing::debug!(resource = %self.cache.name(), "Resync supervisor started");
        loop {
            for _ in 0..self.settings.iterations_per_round {
                if self.iteration().await == Flow::Stop {
                    self.cache.close();
                    tracing::info!(resource = %self.cache.name(), "Resync supervisor stopped");
                    return;
                }
            }
            tokio::task::yield_now().await;
        }
    }

    async fn iteration(&mut self) -> Flow {
        match AssertUnwindSafe(self.step()).catch_unwind().await {
            Ok(flow) => flow,
            Err(panic) => {
                tracing::error!(
                    resource = %self.cache.name(),
                    revision = self.cache.last_revision(),
                    needs_full_reload = self.cache.needs_full_reload(),
                    panic = %panic_message(panic.as_ref()),
                    "Sync iteration panicked"
                );
                metrics::record_sync_error(ErrorKind::Unclassified);
                self.back_off().await
            }
        }
    }

    async fn step(&mut self) -> Flow {
        if self.shutdown.is_exiting() {
            return Flow::Stop;
        }

        if let Err(e) = self.clients.get().await {
            let err = SyncError::from(e);
            metrics::record_sync_error(err.kind());
            self.log_throttled(&err, "Failed to obtain config store client");
            return self.back_off().await;
        }

        let mut result = self.cache.sync().await;
        if matches!(&result, Err(SyncError::AllEndpointsUnhealthy)) {
            metrics::record_sync_error(ErrorKind::AllEndpointsUnhealthy);
            match self.wait_for_recovery().await {
                Recovery::Recovered(next) => {
                    tracing::info!(resource = %self.cache.name(), "Config store reconnected");
                    result = next;
                }
                Recovery::Exhausted(attempts) => {
                    self.log_throttled(
                        &SyncError::AllEndpointsUnhealthy,
                        &format!("Config store still unhealthy after {} attempts", attempts),
                    );
                    return self.back_off().await;
                }
                Recovery::Stopped => return Flow::Stop,
            }
        }

        self.settle(result).await
    }

    /// Bounded exponential retries while every endpoint is unhealthy.
    async fn wait_for_recovery(&mut self) -> Recovery {
        let mut backoff = ExponentialBackoff::default();
        while let Some(delay) = backoff.next_delay() {
            tracing::warn!(
                resource = %self.cache.name(),
                attempt = backoff.attempts(),
                delay_secs = delay.as_secs(),
                "All config store endpoints unhealthy, waiting"
            );
            if self.pause(delay).await == Flow::Stop {
                return Recovery::Stopped;
            }
            match self.cache.sync().await {
                Err(SyncError::AllEndpointsUnhealthy) => continue,
                other => return Recovery::Recovered(other),
            }
        }
        Recovery::Exhausted(backoff.attempts())
    }

    async fn settle(&mut self, result: SyncResult<SyncOutcome>) -> Flow {
        match result {
            Ok(SyncOutcome::NoProgress) => self.pause(self.settings.no_progress_delay).await,
            Ok(outcome) => {
                if let SyncOutcome::Reloaded { items } = outcome {
                    tracing::debug!(resource = %self.cache.name(), items, "Full reload complete");
                }
                self.report_loaded();
                Flow::Continue
            }
            Err(err) => {
                let kind = err.kind();
                if kind != ErrorKind::Timeout {
                    metrics::record_sync_error(kind);
                }
                match kind {
                    ErrorKind::Timeout => Flow::Continue,
                    ErrorKind::Exiting => Flow::Stop,
                    ErrorKind::StoreCompacted | ErrorKind::StoreRestarted => {
                        self.log_throttled(&err, "Watch history invalidated, reloading");
                        Flow::Continue
                    }
                    _ => {
                        self.log_throttled(&err, "Failed to sync resource");
                        self.back_off().await
                    }
                }
            }
        }
    }

    fn report_loaded(&mut self) {
        if !self.reported_loaded && self.cache.is_loaded() {
            self.reported_loaded = true;
            self.status.mark_loaded(&self.settings.worker_id);
        }
    }

    fn log_throttled(&mut self, err: &SyncError, context: &str) {
        let message = format!("{}: {}", context, err);
        if self.throttle.should_log(&message) {
            tracing::error!(
                resource = %self.cache.name(),
                kind = err.kind().as_str(),
                error = %err,
                "{}",
                context
            );
        }
    }

    async fn back_off(&self) -> Flow {
        self.pause(self.backoff.next_delay()).await
    }

    /// Sleep for `delay` unless shutdown comes first.
    async fn pause(&self, delay: Duration) -> Flow {
        tokio::select! {
            _ = tokio::time::sleep(delay) => Flow::Continue,
            _ = self.shutdown.wait() => Flow::Stop,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
