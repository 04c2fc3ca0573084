//! Metrics collection and exposition.
//!
//! # Metrics
//! - `config_sync_events_applied_total` (counter): watch events applied, by resource
//! - `config_sync_events_rejected_total` (counter): items failing validation, by resource
//! - `config_sync_full_reloads_total` (counter): full reloads, by resource
//! - `config_sync_revision` (gauge): last applied revision, by resource
//! - `config_sync_items` (gauge): live items, by resource
//! - `config_sync_errors_total` (counter): failed sync iterations, by error kind
//! - `config_sync_watch_restarts_total` (counter): broker stream restarts, by reason
//! - `config_sync_event_log_entries` (gauge): slots held by the shared event log
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exporter is optional and config-gated

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::client::Revision;
use crate::error::ErrorKind;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_events_applied(resource: &str, count: usize) {
    counter!("config_sync_events_applied_total", "resource" => resource.to_string())
        .increment(count as u64);
}

pub fn record_event_rejected(resource: &str) {
    counter!("config_sync_events_rejected_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_full_reload(resource: &str) {
    counter!("config_sync_full_reloads_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_cache_state(resource: &str, revision: Revision, items: usize) {
    gauge!("config_sync_revision", "resource" => resource.to_string()).set(revision as f64);
    gauge!("config_sync_items", "resource" => resource.to_string()).set(items as f64);
}

pub fn record_sync_error(kind: ErrorKind) {
    counter!("config_sync_errors_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_watch_restart(reason: &'static str) {
    counter!("config_sync_watch_restarts_total", "reason" => reason).increment(1);
}

pub fn record_event_log_size(entries: usize) {
    gauge!("config_sync_event_log_entries").set(entries as f64);
}
