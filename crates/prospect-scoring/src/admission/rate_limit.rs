use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-key sliding window of admitted request timestamps.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Evicts timestamps older than the window, then records `now` if the key still has
    /// room. Returns `false` without recording when the window is full.
    pub fn try_acquire_at(&self, key: &str, now: Instant) -> bool {
        let mut guard = self.windows.lock().expect("rate limit mutex poisoned");
        let timestamps = guard.entry(key.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.limit {
            return false;
        }

        timestamps.push_back(now);
        true
    }

    /// Timestamps currently counted against `key`.
    pub fn in_window(&self, key: &str) -> usize {
        self.windows
            .lock()
            .expect("rate limit mutex poisoned")
            .get(key)
            .map_or(0, VecDeque::len)
    }
}
