//! Single-use nonce tracking.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Records nonces for a bounded time.
///
/// Implementations must make [`check_and_mark`](NonceStore::check_and_mark) atomic:
/// two concurrent calls with the same nonce must not both succeed.
pub trait NonceStore: Send + Sync {
    /// Whether `nonce` is recorded and unexpired.
    fn is_used(&self, nonce: &str) -> bool;

    /// Record `nonce` for `ttl`, replacing any earlier expiry.
    fn mark_used(&self, nonce: &str, ttl: Duration);

    /// Record `nonce` unless it is already recorded. Returns `true` when it was fresh.
    fn check_and_mark(&self, nonce: &str, ttl: Duration) -> bool;

    /// Forget `nonce`, so a later `check_and_mark` for it succeeds again.
    fn release(&self, nonce: &str);
}

/// Process-local nonce store. Expired entries are purged on every access.
#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        purge(&mut entries, Instant::now());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Expiry for entries whose TTL does not fit the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

fn purge(entries: &mut HashMap<String, Instant>, now: Instant) {
    entries.retain(|_, expires_at| *expires_at > now);
}

impl NonceStore for InMemoryNonceStore {
    fn is_used(&self, nonce: &str) -> bool {
        let mut entries = self.entries.lock();
        purge(&mut entries, Instant::now());
        entries.contains_key(nonce)
    }

    fn mark_used(&self, nonce: &str, ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        purge(&mut entries, now);
        entries.insert(nonce.to_string(), expiry(now, ttl));
    }

    fn check_and_mark(&self, nonce: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        purge(&mut entries, now);
        if entries.contains_key(nonce) {
            return false;
        }
        entries.insert(nonce.to_string(), expiry(now, ttl));
        true
    }

    fn release(&self, nonce: &str) {
        self.entries.lock().remove(nonce);
    }
}
