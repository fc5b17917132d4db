//! Per-conversation rate limiter for automated sends.
//!
//! Each key gets a fixed window starting at its first permitted send; the
//! window resets once `window` has elapsed. State is process-local and
//! not shared between instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

/// Window state for one conversation key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindowState {
    pub window_start: Instant,
    pub count: u32,
}

type Windows = Arc<Mutex<HashMap<String, RateWindowState>>>;

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    windows: Windows,
    cleanup: Mutex<Option<JoinHandle<()>>>,
}

fn lock(windows: &Windows) -> MutexGuard<'_, HashMap<String, RateWindowState>> {
    windows.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
            cleanup: Mutex::new(None),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Consume a slot for `key` now. `false` means the send must be
    /// suppressed.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    /// Consume a slot for `key` at the given instant.
    pub fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut windows = lock(&self.windows);
        let state = windows.entry(key.to_string()).or_insert(RateWindowState {
            window_start: now,
            count: 0,
        });

        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }

        if state.count >= self.limit {
            debug!(key, limit = self.limit, "Rate limit reached");
            return false;
        }
        state.count += 1;
        true
    }

    /// Whether `key` has a free slot now, without consuming it.
    pub fn peek(&self, key: &str) -> bool {
        self.peek_at(key, Instant::now())
    }

    pub fn peek_at(&self, key: &str, now: Instant) -> bool {
        match lock(&self.windows).get(key) {
            Some(state) if now.saturating_duration_since(state.window_start) < self.window => {
                state.count < self.limit
            }
            _ => true,
        }
    }

    /// Current window for `key`, if one is tracked.
    pub fn state(&self, key: &str) -> Option<RateWindowState> {
        lock(&self.windows).get(key).copied()
    }

    /// Drop windows that have fully elapsed. Returns how many were removed.
    pub fn cleanup_at(&self, now: Instant) -> usize {
        prune(&self.windows, self.window, now)
    }

    /// Start a background task pruning expired windows every `interval`.
    /// Replaces any previously started task.
    pub fn spawn_cleanup(&self, interval: Duration) {
        let windows = self.windows.clone();
        let window = self.window;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let removed = prune(&windows, window, Instant::now());
                if removed > 0 {
                    debug!(removed, "Pruned expired rate windows");
                }
            }
        });

        let mut slot = self.cleanup.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(handle) {
            previous.abort();
        }
    }

    /// Stop the cleanup task. Safe to call more than once.
    pub fn dispose(&self) {
        let handle = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    pub fn has_cleanup_task(&self) -> bool {
        self.cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn prune(windows: &Windows, window: Duration, now: Instant) -> usize {
    let mut windows = lock(windows);
    let before = windows.len();
    windows.retain(|_, state| now.saturating_duration_since(state.window_start) < window);
    before - windows.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_limit_within_window_then_resets() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t = Instant::now();
        let eps = Duration::from_secs(1);

        assert!(limiter.check_at("c1", t));
        assert!(limiter.check_at("c1", t + eps));
        assert!(limiter.check_at("c1", t + eps * 2));
        assert!(!limiter.check_at("c1", t + Duration::from_secs(59)));
        assert!(limiter.check_at("c1", t + Duration::from_secs(61)));
        assert_eq!(limiter.state("c1").unwrap().count, 1);
    }

    #[test]
    fn peek_does_not_consume() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t = Instant::now();
        assert!(limiter.peek_at("c1", t));
        assert!(limiter.peek_at("c1", t));
        assert!(limiter.state("c1").is_none());

        assert!(limiter.check_at("c1", t));
        assert!(!limiter.peek_at("c1", t + Duration::from_secs(30)));
        assert!(limiter.peek_at("c1", t + Duration::from_secs(60)));
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let t = Instant::now();
        assert!(limiter.check_at("c1", t));
        assert!(!limiter.check_at("c1", t));
        assert!(limiter.check_at("c2", t));
    }

    #[test]
    fn cleanup_removes_elapsed_windows() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        let t = Instant::now();
        limiter.check_at("old", t);
        limiter.check_at("fresh", t + Duration::from_secs(8));
        assert_eq!(limiter.cleanup_at(t + Duration::from_secs(11)), 1);
        assert!(limiter.state("old").is_none());
        assert!(limiter.state("fresh").is_some());
    }

    #[tokio::test]
    async fn dispose_stops_cleanup_task() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        limiter.spawn_cleanup(Duration::from_secs(3600));
        assert!(limiter.has_cleanup_task());
        limiter.dispose();
        assert!(!limiter.has_cleanup_task());
        limiter.dispose();
    }
}
