//! Store endpoint pool.
//!
//! # Responsibilities
//! - Represent each configured store endpoint
//! - Track health state with a failure threshold
//! - Keep a failed endpoint out of rotation for the health-check timeout
//! - Rotate requests across healthy endpoints

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use url::Url;

/// Health State enum.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single store endpoint.
#[derive(Debug)]
pub struct Endpoint {
    /// Base URL, e.g. `http://127.0.0.1:2379`.
    pub url: Url,
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    /// When the endpoint may be probed again after being marked unhealthy.
    retry_at: Mutex<Option<Instant>>,
}

impl Endpoint {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            retry_at: Mutex::new(None),
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy, unknown, or unhealthy with an expired quarantine.
    pub fn is_available(&self, now: Instant) -> bool {
        if self.state() != HealthState::Unhealthy {
            return true;
        }
        match *self.retry_at.lock() {
            Some(at) => now >= at,
            None => true,
        }
    }

    /// Report a successful request.
    pub fn mark_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let previous = self.state.swap(HealthState::Healthy as u8, Ordering::Relaxed);
        if previous == HealthState::Unhealthy as u8 {
            *self.retry_at.lock() = None;
            tracing::info!(endpoint = %self.url, "Store endpoint recovered");
        }
    }

    /// Report a transport failure.
    pub fn mark_failure(&self, unhealthy_threshold: usize, quarantine: Duration) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold.max(1) {
            let previous = self.state.swap(HealthState::Unhealthy as u8, Ordering::Relaxed);
            *self.retry_at.lock() = Some(Instant::now() + quarantine);
            if previous != HealthState::Unhealthy as u8 {
                tracing::warn!(
                    endpoint = %self.url,
                    failures,
                    quarantine_secs = quarantine.as_secs(),
                    "Store endpoint marked unhealthy"
                );
            }
        }
    }
}

/// Endpoints of one store cluster with round-robin selection.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    counter: AtomicUsize,
    unhealthy_threshold: usize,
    quarantine: Duration,
}

impl EndpointPool {
    pub fn new(urls: Vec<Url>, unhealthy_threshold: usize, quarantine: Duration) -> Self {
        Self {
            endpoints: urls.into_iter().map(|u| Arc::new(Endpoint::new(u))).collect(),
            counter: AtomicUsize::new(0),
            unhealthy_threshold,
            quarantine,
        }
    }

    /// Next available endpoint, or `None` when every endpoint is quarantined.
    pub fn next_endpoint(&self) -> Option<Arc<Endpoint>> {
        if self.endpoints.is_empty() {
            return None;
        }

        let now = Instant::now();
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = self.endpoints.len();

        for i in 0..len {
            let endpoint = &self.endpoints[(start + i) % len];
            if endpoint.is_available(now) {
                return Some(endpoint.clone());
            }
        }
        None
    }

    pub fn report_failure(&self, endpoint: &Endpoint) {
        endpoint.mark_failure(self.unhealthy_threshold, self.quarantine);
    }

    pub fn all(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(threshold: usize, quarantine: Duration) -> EndpointPool {
        EndpointPool::new(
            vec![
                Url::parse("http://127.0.0.1:2379").unwrap(),
                Url::parse("http://127.0.0.1:2380").unwrap(),
            ],
            threshold,
            quarantine,
        )
    }

    #[test]
    fn test_round_robin() {
        let pool = pool(1, Duration::from_secs(10));

        let e1 = pool.next_endpoint().unwrap();
        let e2 = pool.next_endpoint().unwrap();
        let e3 = pool.next_endpoint().unwrap();
        assert_eq!(e1.url.port(), Some(2379));
        assert_eq!(e2.url.port(), Some(2380));
        assert_eq!(e3.url.port(), Some(2379));
    }

    #[test]
    fn test_unhealthy_endpoint_skipped() {
        let pool = pool(2, Duration::from_secs(10));
        let first = pool.all()[0].clone();

        pool.report_failure(&first);
        assert_eq!(first.state(), HealthState::Unknown);

        pool.report_failure(&first);
        assert_eq!(first.state(), HealthState::Unhealthy);

        for _ in 0..4 {
            assert_eq!(pool.next_endpoint().unwrap().url.port(), Some(2380));
        }

        first.mark_success();
        assert_eq!(first.state(), HealthState::Healthy);
    }

    #[test]
    fn test_all_quarantined() {
        let pool = pool(1, Duration::from_secs(10));
        for endpoint in pool.all().to_vec() {
            pool.report_failure(&endpoint);
        }
        assert!(pool.next_endpoint().is_none());
    }

    #[test]
    fn test_quarantine_expires() {
        let pool = pool(1, Duration::ZERO);
        for endpoint in pool.all().to_vec() {
            pool.report_failure(&endpoint);
        }
        assert!(pool.next_endpoint().is_some());
    }
}
