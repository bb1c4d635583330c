pub mod clock;
pub mod token_bucket;

use std::{
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        TryLockError,
    },
    time::{
        Duration,
        Instant,
    },
};

use dashmap::DashMap;

use crate::ratelimit::{
    clock::Clock,
    token_bucket::TokenBucket,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub requests_per_window: u32,
    pub window_seconds: u64,
    pub burst_multiplier: f64,
    pub cleanup_interval: Duration,
}

impl RateLimitPolicy {
    /// Long-run average admission rate, in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.requests_per_window as f64 / self.window_seconds as f64
    }

    /// Largest burst a fresh or fully rested client may send.
    pub fn capacity(&self) -> f64 {
        (self.requests_per_window as f64 * self.burst_multiplier).floor()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
    pub remaining: u64,
}

/// Per-client token bucket admission control.
///
/// Buckets are created full on first sight of a key and swept once they have
/// been idle for longer than the cleanup interval. The sweep piggybacks on
/// `admit` calls, so no background task is needed. Different keys only share
/// a map shard for the duration of a lookup; the read-modify-write of a single
/// bucket is serialized by that bucket's own mutex.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    buckets: DashMap<String, Arc<Mutex<TokenBucket>>>,
    last_cleanup: Mutex<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, clock: Arc<dyn Clock>) -> Self {
        let last_cleanup = Mutex::new(clock.now());
        Self {
            policy,
            buckets: DashMap::new(),
            last_cleanup,
            clock,
        }
    }

    pub fn admit(&self, client_key: &str) -> RateLimitDecision {
        let now = self.clock.now();
        self.maybe_cleanup(now);

        let bucket = self.bucket_for(client_key, now);
        let mut bucket = lock(&bucket);

        if bucket.consume(1.0, now) {
            return RateLimitDecision {
                allowed: true,
                retry_after_secs: 0,
                remaining: bucket.tokens().floor() as u64,
            };
        }

        // one extra second so a client honoring the hint never arrives early
        let wait = bucket.time_until_available(1.0, now);
        RateLimitDecision {
            allowed: false,
            retry_after_secs: (wait.as_secs_f64().ceil() as u64).saturating_add(1),
            remaining: 0,
        }
    }

    pub fn requests_per_window(&self) -> u32 {
        self.policy.requests_per_window
    }

    pub fn window_seconds(&self) -> u64 {
        self.policy.window_seconds
    }

    pub fn capacity(&self) -> f64 {
        self.policy.capacity()
    }

    pub fn refill_rate(&self) -> f64 {
        self.policy.refill_rate()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_for(&self, key: &str, now: Instant) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::full(
                    self.policy.capacity(),
                    self.policy.refill_rate(),
                    now,
                )))
            })
            .clone()
    }

    fn maybe_cleanup(&self, now: Instant) {
        let mut last_cleanup = match self.last_cleanup.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            // another request is already sweeping
            Err(TryLockError::WouldBlock) => return,
        };

        let interval = self.policy.cleanup_interval;
        if now.saturating_duration_since(*last_cleanup) < interval {
            return;
        }
        *last_cleanup = now;
        drop(last_cleanup);

        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            now.saturating_duration_since(lock(bucket).last_refill()) <= interval
        });
        let remaining = self.buckets.len();

        tracing::debug!(
            removed = before.saturating_sub(remaining),
            remaining,
            "cleaned up stale rate limit buckets"
        );
    }

    #[cfg(test)]
    fn tokens(&self, key: &str) -> Option<f64> {
        self.buckets.get(key).map(|bucket| lock(&bucket).tokens())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
