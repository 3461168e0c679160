//! Per-sender sliding-window usage limiter.
//!
//! Each sender owns a queue of accepted-message instants guarded by its own
//! mutex, so check-then-record for one sender never races while different
//! senders never contend. Stale instants are pruned on every access.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Default number of accepted messages per window.
pub const DEFAULT_LIMIT: usize = 10;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Limiter configuration
#[derive(Debug, Clone)]
pub struct UsageLimiterConfig {
    pub limit: usize,
    pub window: Duration,
    /// Senders that bypass every check.
    pub unmetered: HashSet<String>,
}

impl Default for UsageLimiterConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            unmetered: HashSet::new(),
        }
    }
}

type Window = Arc<Mutex<VecDeque<Instant>>>;

pub struct UsageLimiter {
    config: UsageLimiterConfig,
    windows: DashMap<String, Window>,
}

/// Locked view of one sender's window.
pub struct SenderUsage<'a> {
    timestamps: &'a mut VecDeque<Instant>,
    limit: usize,
    window: Duration,
    unmetered: bool,
}

impl SenderUsage<'_> {
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// True when another message may be accepted.
    pub fn can_proceed(&mut self) -> bool {
        if self.unmetered {
            return true;
        }
        self.prune(Instant::now());
        self.timestamps.len() < self.limit
    }

    /// Count an accepted message.
    pub fn record(&mut self) {
        let now = Instant::now();
        self.prune(now);
        self.timestamps.push_back(now);
    }

    /// Time until the oldest counted message leaves the window; zero while
    /// under the limit.
    pub fn time_until_reset(&mut self) -> Duration {
        if self.unmetered {
            return Duration::ZERO;
        }
        let now = Instant::now();
        self.prune(now);
        if self.timestamps.len() < self.limit {
            return Duration::ZERO;
        }
        match self.timestamps.front() {
            Some(oldest) => self
                .window
                .saturating_sub(now.saturating_duration_since(*oldest)),
            None => Duration::ZERO,
        }
    }

    pub fn count(&mut self) -> usize {
        self.prune(Instant::now());
        self.timestamps.len()
    }
}

impl UsageLimiter {
    pub fn new(config: UsageLimiterConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn config(&self) -> &UsageLimiterConfig {
        &self.config
    }

    pub fn is_unmetered(&self, sender_id: &str) -> bool {
        self.config.unmetered.contains(sender_id)
    }

    fn window_for(&self, sender_id: &str) -> Window {
        if let Some(window) = self.windows.get(sender_id) {
            return window.clone();
        }
        self.windows
            .entry(sender_id.to_string())
            .or_default()
            .clone()
    }

    /// Run `f` with the sender's window locked. Use this to combine
    /// `can_proceed` and `record` without a gap between them.
    pub fn with_sender<R>(&self, sender_id: &str, f: impl FnOnce(&mut SenderUsage<'_>) -> R) -> R {
        let window = self.window_for(sender_id);
        let mut timestamps = window.lock();
        let mut usage = SenderUsage {
            timestamps: &mut *timestamps,
            limit: self.config.limit,
            window: self.config.window,
            unmetered: self.is_unmetered(sender_id),
        };
        f(&mut usage)
    }

    pub fn can_proceed(&self, sender_id: &str) -> bool {
        self.with_sender(sender_id, |usage| usage.can_proceed())
    }

    pub fn record(&self, sender_id: &str) {
        self.with_sender(sender_id, |usage| usage.record())
    }

    pub fn time_until_reset(&self, sender_id: &str) -> Duration {
        self.with_sender(sender_id, |usage| usage.time_until_reset())
    }

    /// Check and record in one locked step. Returns the wait time when the
    /// sender is over the limit.
    pub fn try_acquire(&self, sender_id: &str) -> Result<(), Duration> {
        self.with_sender(sender_id, |usage| {
            if usage.can_proceed() {
                usage.record();
                Ok(())
            } else {
                Err(usage.time_until_reset())
            }
        })
    }
}

impl Default for UsageLimiter {
    fn default() -> Self {
        Self::new(UsageLimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: usize, window: Duration) -> UsageLimiter {
        UsageLimiter::new(UsageLimiterConfig {
            limit,
            window,
            unmetered: HashSet::from(["admin".to_string()]),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_reached_after_exact_count() {
        let limiter = limiter(10, DEFAULT_WINDOW);
        for _ in 0..10 {
            assert!(limiter.can_proceed("u1"));
            limiter.record("u1");
        }
        assert!(!limiter.can_proceed("u1"));
        let wait = limiter.time_until_reset("u1");
        assert!(wait > Duration::ZERO && wait <= DEFAULT_WINDOW);
        // Other senders are unaffected.
        assert!(limiter.can_proceed("u2"));
        assert_eq!(limiter.time_until_reset("u2"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eleventh_message_at_five_minutes_waits_five_minutes() {
        let limiter = limiter(10, DEFAULT_WINDOW);
        for _ in 0..10 {
            limiter.try_acquire("u1").unwrap();
        }
        tokio::time::advance(Duration::from_secs(5 * 60)).await;

        let wait = limiter.try_acquire("u1").unwrap_err();
        assert_eq!(wait, Duration::from_secs(5 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_until_reset_never_increases() {
        let limiter = limiter(3, Duration::from_secs(60));
        for _ in 0..3 {
            limiter.record("u1");
            tokio::time::advance(Duration::from_secs(5)).await;
        }

        let mut previous = limiter.time_until_reset("u1");
        for _ in 0..20 {
            tokio::time::advance(Duration::from_secs(3)).await;
            let current = limiter.time_until_reset("u1");
            assert!(current <= previous);
            previous = current;
        }
        assert_eq!(previous, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entries_pruned_on_access() {
        let limiter = limiter(2, Duration::from_secs(60));
        limiter.record("u1");
        limiter.record("u1");
        assert!(!limiter.can_proceed("u1"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.can_proceed("u1"));
        assert_eq!(limiter.with_sender("u1", |usage| usage.count()), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boundary_is_inclusive_of_window() {
        let limiter = limiter(1, Duration::from_secs(60));
        limiter.record("u1");
        tokio::time::advance(Duration::from_secs(60)).await;
        // Exactly `window` old is not yet stale.
        assert!(!limiter.can_proceed("u1"));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.can_proceed("u1"));
    }

    #[test]
    fn test_unmetered_sender_bypasses_limit() {
        let limiter = limiter(1, DEFAULT_WINDOW);
        for _ in 0..5 {
            assert!(limiter.try_acquire("admin").is_ok());
        }
        assert_eq!(limiter.time_until_reset("admin"), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_never_exceeds_limit() {
        let limiter = Arc::new(limiter(10, DEFAULT_WINDOW));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.try_acquire("u1").is_ok() }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 10);
    }
}
