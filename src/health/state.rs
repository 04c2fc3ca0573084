//! Worker readiness board.
//!
//! # States
//! - Registered: worker started, no resource loaded yet
//! - Loaded: at least one resource cache completed its first load
//!
//! # Design Decisions
//! - Keyed by worker identity so several workers can share one board
//! - Written by supervisors, read only by the status endpoint
//! - The flag only ever moves from false to true

use std::sync::Arc;

use dashmap::DashMap;

/// Shared status slots, one per worker.
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    workers: Arc<DashMap<String, bool>>,
}

impl SyncStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker with its flag cleared. Existing entries are kept.
    pub fn register(&self, worker_id: &str) {
        self.workers.entry(worker_id.to_string()).or_insert(false);
    }

    /// Record a completed first load. Returns true on the first call only.
    pub fn mark_loaded(&self, worker_id: &str) -> bool {
        let mut slot = self.workers.entry(worker_id.to_string()).or_insert(false);
        let first = !*slot;
        *slot = true;
        if first {
            tracing::info!(worker_id, "Worker completed first configuration load");
        }
        first
    }

    pub fn is_loaded(&self, worker_id: &str) -> bool {
        self.workers.get(worker_id).map(|v| *v).unwrap_or(false)
    }

    /// `(worker id, loaded)` pairs, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        let mut all: Vec<(String, bool)> = self
            .workers
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_loaded_once() {
        let status = SyncStatus::new();
        status.register("w1");
        assert!(!status.is_loaded("w1"));

        assert!(status.mark_loaded("w1"));
        assert!(!status.mark_loaded("w1"));
        assert!(status.is_loaded("w1"));

        status.register("w1");
        assert!(status.is_loaded("w1"));
        assert!(!status.is_loaded("w2"));
    }

    #[test]
    fn test_snapshot_sorted() {
        let status = SyncStatus::new();
        status.register("b");
        status.mark_loaded("a");
        assert_eq!(
            status.snapshot(),
            vec![("a".to_string(), true), ("b".to_string(), false)]
        );
    }
}
