//! Rolling-window invocation limiter keyed by `(session, method)`.
//!
//! Purely local bookkeeping: a rejected call never reaches the page.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Length of the rolling window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Per-minute flood control for `invokeMethod`.
pub struct RateLimiter {
    default_limit: i64,
    overrides: HashMap<String, i64>,
    windows: Mutex<HashMap<(String, String), VecDeque<Instant>>>,
}

impl RateLimiter {
    /// Create a limiter with a global default and per-method overrides.
    pub fn new(default_limit: i64, overrides: HashMap<String, i64>) -> Self {
        Self {
            default_limit,
            overrides,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Effective limit for `method`. `<= 0` means unlimited.
    pub fn limit_for(&self, method: &str) -> i64 {
        self.overrides
            .get(method)
            .copied()
            .unwrap_or(self.default_limit)
    }

    /// Record an invocation now, or return the limit that was hit.
    pub fn check(&self, session_id: &str, method: &str) -> Result<(), i64> {
        self.check_at(session_id, method, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, session_id: &str, method: &str, now: Instant) -> Result<(), i64> {
        let limit = self.limit_for(method);
        if limit <= 0 {
            return Ok(());
        }

        let mut windows = self.windows.lock();
        let window = windows
            .entry((session_id.to_owned(), method.to_owned()))
            .or_default();
        while window
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= WINDOW)
        {
            let _ = window.pop_front();
        }

        let used = i64::try_from(window.len()).unwrap_or(i64::MAX);
        if used >= limit {
            return Err(limit);
        }
        window.push_back(now);
        Ok(())
    }

    /// Drop every window of `session_id`. Called when its page disconnects.
    pub fn forget_session(&self, session_id: &str) -> usize {
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|(session, _), _| session != session_id);
        before - windows.len()
    }

    /// Number of `(session, method)` keys being tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Invocations currently counted for a key.
    pub fn in_window(&self, session_id: &str, method: &str) -> usize {
        self.windows
            .lock()
            .get(&(session_id.to_owned(), method.to_owned()))
            .map_or(0, VecDeque::len)
    }
}
