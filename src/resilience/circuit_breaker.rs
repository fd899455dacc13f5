//! Circuit breaker for destination protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: destination assumed down, requests fail fast
//! - Half-Open: testing if destination recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= threshold
//! Open → Half-Open: first admission check after the cool-down (issues the probe permit)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-destination circuit breaker (not global), shared through a registry
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open; permit issuance happens under the same lock as the
//!   transition so concurrent callers cannot both become the probe

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use url::Url;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; send normally.
    Allowed,
    /// Caller holds the single half-open probe permit.
    Probe,
    /// Breaker open (or a probe is already in flight).
    Rejected,
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    half_open_permit_issued: bool,
}

/// Failure/availability state machine for one destination.
#[derive(Debug)]
pub struct CircuitBreaker {
    destination: String,
    threshold: u32,
    timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(destination: impl Into<String>, threshold: u32, timeout: Duration) -> Self {
        Self {
            destination: destination.into(),
            threshold: threshold.max(1),
            timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                last_failure_at: None,
                half_open_permit_issued: false,
            }),
        }
    }

    /// Decide whether a request may go out, transitioning Open → Half-Open once the
    /// cool-down has elapsed.
    pub fn try_acquire(&self) -> Admission {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
                if elapsed < self.timeout {
                    return Admission::Rejected;
                }
                inner.state = CircuitState::HalfOpen;
                inner.half_open_permit_issued = true;
                drop(inner);
                tracing::info!(destination = %self.destination, "Circuit half-open, allowing probe");
                metrics::record_circuit_transition(&self.destination, CircuitState::HalfOpen);
                Admission::Probe
            }
            CircuitState::HalfOpen => {
                if inner.half_open_permit_issued {
                    Admission::Rejected
                } else {
                    inner.half_open_permit_issued = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Boolean form of [`try_acquire`](Self::try_acquire).
    pub fn can_attempt(&self) -> bool {
        self.try_acquire().is_allowed()
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.half_open_permit_issued = false;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            drop(inner);
            tracing::info!(destination = %self.destination, "Circuit closed after successful probe");
            metrics::record_circuit_transition(&self.destination, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure_at = Some(now);
        let failures = inner.consecutive_failures;

        let reopened = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed if failures >= self.threshold => true,
            _ => false,
        };
        if !reopened {
            return;
        }

        let from = inner.state;
        inner.state = CircuitState::Open;
        inner.opened_at = Some(now);
        inner.half_open_permit_issued = false;
        drop(inner);

        tracing::warn!(
            destination = %self.destination,
            from = from.as_str(),
            consecutive_failures = failures,
            cool_down = ?self.timeout,
            "Circuit opened"
        );
        metrics::record_circuit_transition(&self.destination, CircuitState::Open);
    }

    /// Hand back an unused probe permit (e.g. the probing send was cancelled) so the
    /// breaker does not stay half-open with no probe in flight.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_permit_issued = false;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Time of the most recent recorded failure.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner.lock().last_failure_at
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Table of breakers keyed by destination.
///
/// Constructed explicitly and passed down by `Arc`; every sender and transport that
/// addresses the same destination through one registry shares one breaker.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the breaker for `destination`, creating it on first use.
    ///
    /// Parameters are fixed at creation; later calls with different values get the
    /// existing instance.
    pub fn get_or_create(
        &self,
        destination: &str,
        threshold: u32,
        timeout: Duration,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(destination) {
            return existing.value().clone();
        }
        self.breakers
            .entry(destination.to_string())
            .or_insert_with(|| {
                tracing::debug!(destination = %destination, threshold, ?timeout, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(destination, threshold, timeout))
            })
            .value()
            .clone()
    }

    /// Like [`get_or_create`](Self::get_or_create) with parameters from config.
    pub fn breaker_for(&self, destination: &str, config: &CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.get_or_create(destination, config.threshold, config.timeout())
    }

    pub fn get(&self, destination: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(destination).map(|r| r.value().clone())
    }

    /// Drop all breaker state.
    pub fn clear(&self) {
        self.breakers.clear();
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Snapshot of `(destination, state, consecutive_failures)` for every breaker.
    pub fn snapshot(&self) -> Vec<(String, CircuitState, u32)> {
        let mut out: Vec<_> = self
            .breakers
            .iter()
            .map(|r| (r.key().clone(), r.state(), r.consecutive_failures()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Normalize a URL to the key its breaker is stored under: `scheme://host[:port]`,
/// lowercased, without path, query or default port.
pub fn destination_key(url: &Url) -> String {
    let origin = url.origin();
    if origin.is_tuple() {
        origin.ascii_serialization()
    } else {
        url.as_str().trim_end_matches('/').to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new("http://peer:8080", threshold, Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_opens_after_threshold() {
        for threshold in 1..=6 {
            let cb = breaker(threshold, 60_000);
            for _ in 0..threshold - 1 {
                cb.record_failure();
                assert_eq!(cb.state(), CircuitState::Closed);
            }
            cb.record_failure();
            assert_eq!(cb.state(), CircuitState::Open);
            assert_eq!(cb.consecutive_failures(), threshold);
            assert!(!cb.can_attempt());
        }
    }

    #[test]
    fn test_success_resets_failures() {
        let cb = breaker(3, 60_000);
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.consecutive_failures(), 0);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_until_timeout_then_single_probe() {
        let cb = breaker(1, 100);
        cb.record_failure();

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(!cb.can_attempt());
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cb.try_acquire(), Admission::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // Second caller during the probe is refused.
        assert!(!cb.can_attempt());
        assert!(!cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let cb = breaker(2, 50);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(cb.can_attempt());

        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert!(cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens_with_fresh_cool_down() {
        let cb = breaker(2, 50);
        cb.record_failure();
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(cb.can_attempt());

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.consecutive_failures() >= 2);

        // opened_at was refreshed, so the old elapsed time does not count.
        tokio::time::advance(Duration::from_millis(40)).await;
        assert!(!cb.can_attempt());
        tokio::time::advance(Duration::from_millis(10)).await;
        assert!(cb.can_attempt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_probe_allows_another_probe() {
        let cb = breaker(1, 10);
        cb.record_failure();
        tokio::time::advance(Duration::from_millis(10)).await;
        assert_eq!(cb.try_acquire(), Admission::Probe);
        assert_eq!(cb.try_acquire(), Admission::Rejected);

        cb.release_probe();
        assert_eq!(cb.try_acquire(), Admission::Probe);
    }

    #[test]
    fn test_concurrent_failures_are_counted_exactly() {
        let cb = Arc::new(breaker(1_000_000, 60_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cb = cb.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cb.consecutive_failures(), 2000);
    }

    #[test]
    fn test_concurrent_probe_issued_once() {
        let cb = Arc::new(CircuitBreaker::new("http://peer", 1, Duration::ZERO));
        cb.record_failure();

        let admitted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = cb.clone();
                let admitted = admitted.clone();
                thread::spawn(move || {
                    if cb.can_attempt() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(Ordering::SeqCst), 1);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_config_timeout_stays_open() {
        let config = CircuitBreakerConfig {
            enabled: true,
            threshold: 1,
            timeout: 1e20,
        };
        let registry = CircuitBreakerRegistry::new();
        let cb = registry.breaker_for("http://peer:8080", &config);
        assert_eq!(cb.timeout(), Duration::MAX);

        cb.record_failure();
        assert_eq!(cb.try_acquire(), Admission::Rejected);
        tokio::time::advance(Duration::from_secs(365 * 24 * 60 * 60)).await;
        assert_eq!(cb.try_acquire(), Admission::Rejected);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_registry_shares_instances() {
        let registry = CircuitBreakerRegistry::new();
        let a = registry.get_or_create("http://peer:8080", 3, Duration::from_secs(1));
        let b = registry.get_or_create("http://peer:8080", 10, Duration::from_secs(99));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.threshold(), 3);
        assert_eq!(b.timeout(), Duration::from_secs(1));

        a.record_failure();
        assert_eq!(b.consecutive_failures(), 1);

        let other = registry.get_or_create("http://other:8080", 3, Duration::from_secs(1));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        let fresh = registry.get_or_create("http://peer:8080", 3, Duration::from_secs(1));
        assert_eq!(fresh.consecutive_failures(), 0);
    }

    #[test]
    fn test_destination_key_normalization() {
        let a = Url::parse("HTTP://Peer.Example:80/envelopes?x=1").unwrap();
        let b = Url::parse("http://peer.example/").unwrap();
        assert_eq!(destination_key(&a), "http://peer.example");
        assert_eq!(destination_key(&a), destination_key(&b));

        let ws = Url::parse("ws://127.0.0.1:9000/ws").unwrap();
        assert_eq!(destination_key(&ws), "ws://127.0.0.1:9000");
    }
}
