use std::{
    sync::Arc,
    time::Duration,
};

use chrono::{
    DateTime,
    Utc,
};
use dashmap::DashMap;
use tokio::task::JoinHandle;

/// Daily per-client budget for outbound maps calls.
///
/// `check_quota` and `increment_usage` are separate steps: callers check
/// before spending and increment after the attempt. Concurrent requests for
/// the same key may overshoot the limit by the number in flight.
#[derive(Debug)]
pub struct QuotaTracker {
    daily_limit: u64,
    usage: DashMap<String, u64>,
}

impl QuotaTracker {
    pub fn new(daily_limit: u64) -> Self {
        Self {
            daily_limit,
            usage: DashMap::new(),
        }
    }

    pub fn daily_limit(&self) -> u64 {
        self.daily_limit
    }

    pub fn check_quota(&self, key: &str) -> bool {
        self.usage(key) < self.daily_limit
    }

    pub fn increment_usage(&self, key: &str, amount: u64) -> u64 {
        let mut entry = self.usage.entry(key.to_string()).or_insert(0);
        *entry = entry.saturating_add(amount);
        *entry
    }

    pub fn get_remaining(&self, key: &str) -> u64 {
        self.daily_limit.saturating_sub(self.usage(key))
    }

    pub fn usage(&self, key: &str) -> u64 {
        self.usage.get(key).map(|v| *v).unwrap_or(0)
    }

    pub fn reset_user(&self, key: &str) {
        self.usage.insert(key.to_string(), 0);
    }

    pub fn reset_all(&self) {
        self.usage.clear();
    }
}

/// Clears every client's usage at each UTC midnight.
pub fn spawn_daily_reset(tracker: Arc<QuotaTracker>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wait = until_next_utc_midnight(Utc::now());
            tracing::debug!(wait_secs = wait.as_secs(), "next daily quota reset scheduled");
            tokio::time::sleep(wait).await;

            let cleared = tracker.usage.len();
            tracker.reset_all();
            tracing::info!(cleared, "daily quota counters reset");
        }
    })
}

fn until_next_utc_midnight(now: DateTime<Utc>) -> Duration {
    let fallback = Duration::from_secs(24 * 60 * 60);
    let Some(midnight) = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
    else {
        return fallback;
    };

    (midnight.and_utc() - now)
        .to_std()
        .ok()
        .filter(|wait| !wait.is_zero())
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{
        TimeZone,
        Utc,
    };

    use super::{
        QuotaTracker,
        until_next_utc_midnight,
    };

    #[test]
    fn unknown_client_has_full_quota() {
        let quota = QuotaTracker::new(5);
        assert!(quota.check_quota("nobody"));
        assert_eq!(quota.get_remaining("nobody"), 5);
        assert_eq!(quota.usage("nobody"), 0);
    }

    #[test]
    fn checking_does_not_consume() {
        let quota = QuotaTracker::new(1);
        for _ in 0..10 {
            assert!(quota.check_quota("k"));
        }
        assert_eq!(quota.get_remaining("k"), 1);
    }

    #[test]
    fn thousandth_call_closes_the_quota() {
        let quota = QuotaTracker::new(1000);
        for _ in 0..999 {
            quota.increment_usage("10.1.1.1", 1);
        }
        assert!(quota.check_quota("10.1.1.1"));
        assert_eq!(quota.get_remaining("10.1.1.1"), 1);

        assert_eq!(quota.increment_usage("10.1.1.1", 1), 1000);
        assert_eq!(quota.get_remaining("10.1.1.1"), 0);
        assert!(!quota.check_quota("10.1.1.1"));
    }

    #[test]
    fn remaining_decreases_monotonically_and_floors_at_zero() {
        let quota = QuotaTracker::new(10);
        let mut previous = quota.get_remaining("k");

        for step in [1u64, 3, 2, 4, 5, 1] {
            quota.increment_usage("k", step);
            let remaining = quota.get_remaining("k");
            assert!(remaining < previous || remaining == 0);
            assert_eq!(quota.check_quota("k"), quota.usage("k") < 10);
            previous = remaining;
        }

        assert_eq!(quota.usage("k"), 16);
        assert_eq!(quota.get_remaining("k"), 0);
    }

    #[test]
    fn resets_clear_usage() {
        let quota = QuotaTracker::new(2);
        quota.increment_usage("a", 2);
        quota.increment_usage("b", 2);

        quota.reset_user("a");
        assert!(quota.check_quota("a"));
        assert!(!quota.check_quota("b"));

        quota.reset_all();
        assert_eq!(quota.get_remaining("b"), 2);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let quota = QuotaTracker::new(u64::MAX);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..250 {
                        quota.increment_usage("shared", 1);
                    }
                });
            }
        });

        assert_eq!(quota.usage("shared"), 2000);
    }

    #[test]
    fn next_reset_is_the_coming_utc_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 22, 30, 0).unwrap();
        assert_eq!(until_next_utc_midnight(now), Duration::from_secs(90 * 60));

        let at_midnight = Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap();
        assert_eq!(
            until_next_utc_midnight(at_midnight),
            Duration::from_secs(24 * 60 * 60)
        );
    }
}
