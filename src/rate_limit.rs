//! Sliding-window admission control.
//!
//! Each caller key (usually the client IP) keeps the instants of its admitted
//! requests inside the trailing window. A request is admitted while fewer than
//! `max_requests` instants remain after dropping those whose age has reached
//! the window.

use crate::error::{Error, Result};
use crate::maintenance::PeriodicTask;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default ceiling per window.
pub const DEFAULT_MAX_REQUESTS: usize = 60;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Per-key sliding-window request limiter.
///
/// Keys are independent; there is no fairness between them.
#[derive(Clone)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    windows: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter admitting `max_requests` per `window` per key.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Evaluate and, if admitted, record a request for `key`.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.evaluate(key).is_none()
    }

    /// Like [`is_allowed`](Self::is_allowed) but reports how long to back off.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] when the key is over its ceiling.
    pub fn check(&self, key: &str) -> Result<()> {
        match self.evaluate(key) {
            None => Ok(()),
            Some(retry_after) => Err(Error::RateLimited { retry_after }),
        }
    }

    /// Returns `None` when admitted, otherwise the time until a slot frees up.
    fn evaluate(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let history = windows.entry(key.to_string()).or_default();

        while history
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            history.pop_front();
        }

        if history.len() >= self.max_requests {
            let retry_after = history
                .front()
                .map_or(self.window, |oldest| {
                    self.window.saturating_sub(now.duration_since(*oldest))
                });
            debug!("Rate limit hit for {key} ({} in window)", history.len());
            return Some(retry_after);
        }

        history.push_back(now);
        None
    }

    /// Drop aged-out instants and remove keys with no live history.
    ///
    /// Returns the number of keys removed. Admission does not depend on this
    /// ever running.
    pub fn compact(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, history| {
            history.retain(|t| now.duration_since(*t) < self.window);
            !history.is_empty()
        });
        let removed = before - windows.len();
        if removed > 0 {
            debug!("Rate limiter compacted {removed} idle keys");
        }
        removed
    }

    /// Start periodic compaction every `interval`.
    #[must_use]
    pub fn spawn_compaction(&self, interval: Duration) -> PeriodicTask {
        let limiter = self.clone();
        PeriodicTask::spawn("rate-limit-compaction", interval, move || {
            limiter.compact();
        })
    }

    /// Number of keys currently tracked.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }

    /// Forget all history.
    pub fn clear(&self) {
        self.windows.lock().clear();
    }

    /// Configured ceiling per window.
    #[must_use]
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}
