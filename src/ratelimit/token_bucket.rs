use std::time::{
    Duration,
    Instant,
};

/// Continuous token bucket. Refill is applied lazily from the elapsed time
/// before every read or mutation of `tokens`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// New bucket holding its full burst allowance.
    pub fn full(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: capacity,
            last_refill: now,
        }
    }

    pub fn consume(&mut self, n: f64, now: Instant) -> bool {
        self.refill(now);

        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    pub fn time_until_available(&mut self, n: f64, now: Instant) -> Duration {
        self.refill(now);

        if self.tokens >= n {
            return Duration::ZERO;
        }

        let needed = n - self.tokens;
        Duration::try_from_secs_f64(needed / self.refill_rate).unwrap_or(Duration::MAX)
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_refill(&self) -> Instant {
        self.last_refill
    }

    fn refill(&mut self, now: Instant) {
        // saturating: a clock that steps backwards refills nothing
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }
}
