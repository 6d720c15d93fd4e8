//! Fixed-Window Rate Limiter
//!
//! Admits at most `ceiling` calls per window. The window starts at
//! construction and restarts lazily on the first check made after it has
//! elapsed, at which point the counter returns to zero.
//!
//! One limiter instance guards each external budget (US provider, Indian
//! provider, text generation, inbound API). Instances are shared by `Arc`;
//! the counter is protected by a mutex so a check-and-increment is atomic.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

/// Mutable window state.
#[derive(Debug)]
struct WindowState {
    calls: u32,
    window_start: Instant,
    last_called: Option<Instant>,
    rejected_total: u64,
}

/// Fixed-window call budget.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    ceiling: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl RateLimiter {
    /// Create a limiter whose first window starts now.
    #[must_use]
    pub fn new(name: impl Into<String>, ceiling: u32, window: Duration) -> Self {
        Self::starting_at(name, ceiling, window, Instant::now())
    }

    /// Create a limiter whose first window starts at `start`.
    #[must_use]
    pub fn starting_at(
        name: impl Into<String>,
        ceiling: u32,
        window: Duration,
        start: Instant,
    ) -> Self {
        Self {
            name: name.into(),
            ceiling,
            window,
            state: Mutex::new(WindowState {
                calls: 0,
                window_start: start,
                last_called: None,
                rejected_total: 0,
            }),
        }
    }

    /// Limiter name, used in logs and metrics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum calls per window.
    #[must_use]
    pub const fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Check-and-count one call now. Returns `true` if the call may proceed.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Check-and-count one call at `now`.
    ///
    /// A denied call does not consume budget.
    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        if now.saturating_duration_since(state.window_start) >= self.window {
            state.calls = 0;
            state.window_start = now;
        }

        if state.calls >= self.ceiling {
            state.rejected_total += 1;
            tracing::debug!(
                limiter = %self.name,
                ceiling = self.ceiling,
                "Rate limit reached"
            );
            return false;
        }

        state.calls += 1;
        state.last_called = Some(now);
        true
    }

    /// Calls admitted in the current window.
    #[must_use]
    pub fn calls_in_window(&self) -> u32 {
        self.state.lock().calls
    }

    /// Time elapsed since the last admitted call.
    #[must_use]
    pub fn since_last_call(&self) -> Option<Duration> {
        self.state.lock().last_called.map(|at| at.elapsed())
    }

    /// Point-in-time counters.
    #[must_use]
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let state = self.state.lock();
        RateLimiterSnapshot {
            name: self.name.clone(),
            ceiling: self.ceiling,
            window_secs: self.window.as_secs(),
            calls_in_window: state.calls,
            rejected_total: state.rejected_total,
        }
    }
}

/// Serializable limiter counters, exposed on the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterSnapshot {
    /// Limiter name.
    pub name: String,
    /// Maximum calls per window.
    pub ceiling: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Calls admitted in the current window.
    pub calls_in_window: u32,
    /// Calls denied since start.
    pub rejected_total: u64,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn admits_exactly_ceiling_calls_per_window() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at("us", 5, MINUTE, start);

        for i in 0..5 {
            assert!(limiter.try_acquire_at(start + Duration::from_secs(i)), "call {i}");
        }
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(10)));
        assert_eq!(limiter.calls_in_window(), 5);
    }

    #[test]
    fn window_resets_after_elapsing() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at("us", 2, MINUTE, start);

        assert!(limiter.try_acquire_at(start));
        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start + Duration::from_secs(59)));
        assert!(limiter.try_acquire_at(start + MINUTE));
        assert_eq!(limiter.calls_in_window(), 1);
    }

    #[test]
    fn denied_calls_are_counted_not_charged() {
        let start = Instant::now();
        let limiter = RateLimiter::starting_at("insight", 1, MINUTE, start);

        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start));

        let snapshot = limiter.snapshot();
        assert_eq!(snapshot.calls_in_window, 1);
        assert_eq!(snapshot.rejected_total, 2);
        assert_eq!(snapshot.window_secs, 60);
    }

    #[test]
    fn zero_ceiling_denies_everything() {
        let limiter = RateLimiter::new("off", 0, MINUTE);
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn concurrent_callers_never_exceed_ceiling() {
        let limiter = Arc::new(RateLimiter::new("api", 30, MINUTE));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..10).filter(|_| limiter.try_acquire()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 30);
    }

    proptest::proptest! {
        #[test]
        fn ceiling_holds_for_any_burst(
            ceiling in 0u32..50,
            extra in 1u32..20,
            step_ms in 0u64..1_000,
        ) {
            let start = Instant::now();
            let limiter = RateLimiter::starting_at("prop", ceiling, MINUTE, start);

            let at = |i: u32| start + Duration::from_millis(u64::from(i) * step_ms / 50);
            let admitted = (0..ceiling + extra)
                .filter(|i| limiter.try_acquire_at(at(*i)))
                .count();
            proptest::prop_assert_eq!(admitted, ceiling as usize);
            proptest::prop_assert_eq!(limiter.snapshot().rejected_total, u64::from(extra));
            proptest::prop_assert_eq!(limiter.try_acquire_at(start + MINUTE), ceiling > 0);
        }
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let limiter = RateLimiter::new("in", 20, MINUTE);
        limiter.try_acquire();
        let json = serde_json::to_value(limiter.snapshot()).unwrap();
        assert_eq!(json["callsInWindow"], 1);
        assert_eq!(json["windowSecs"], 60);
    }
}
