//! Fixed-window request counting per client.
//!
//! # Algorithm
//!
//! Each client key owns a [`RateLimitEntry`] holding a counter and the
//! instant its current window started. On every request:
//!
//! 1. If `now - window_start >= window`, the counter resets to 0 and the
//!    window restarts at `now`.
//! 2. The counter is incremented.
//! 3. The request is rejected when the counter exceeds `max`.
//!
//! Windows are fixed, not sliding: a client can get up to `2 * max`
//! requests through around a window boundary. Steps 1-2 run inside one
//! store call with no await point, so concurrent requests from the same
//! client never lose an update.
//!
//! # Storage
//!
//! The table sits behind the [`RateLimitStore`] trait. [`MemoryStore`] keeps
//! it in a sharded `DashMap`; the entry API holds the shard lock for the
//! whole reset-and-increment.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::time::Instant;

/// Per-client counter for the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn is_expired(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// Storage for rate-limit entries.
///
/// Implementations must make [`hit`](RateLimitStore::hit) atomic per key.
pub trait RateLimitStore: Send + Sync + 'static {
    /// Count one request for `key` and return the entry after the increment.
    fn hit(&self, key: &str, window: Duration, now: Instant) -> RateLimitEntry;

    /// Current entry for `key`, if one exists.
    fn get(&self, key: &str) -> Option<RateLimitEntry>;

    /// Forget a single client.
    fn reset_key(&self, key: &str);

    /// Forget every client.
    fn reset_all(&self);

    /// Drop entries whose window has elapsed. Returns how many were removed.
    fn sweep_expired(&self, window: Duration, now: Instant) -> usize;

    /// Number of tracked clients.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store backed by a sharded concurrent map.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for MemoryStore {
    fn hit(&self, key: &str, window: Duration, now: Instant) -> RateLimitEntry {
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert(RateLimitEntry {
                count: 0,
                window_start: now,
            });

        if entry.is_expired(window, now) {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count = entry.count.saturating_add(1);

        *entry
    }

    fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.entries.get(key).map(|entry| *entry)
    }

    fn reset_key(&self, key: &str) {
        self.entries.remove(key);
    }

    fn reset_all(&self) {
        self.entries.clear();
    }

    fn sweep_expired(&self, window: Duration, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(window, now));
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Error type for limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("max must be greater than 0; leave the limiter unmounted for no limiting")]
    ZeroMax,

    #[error("window must be longer than zero")]
    ZeroWindow,
}

/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        remaining: u32,
        reset_after: Duration,
    },
    Limited {
        reset_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Fixed-window limiter over a shared store.
#[derive(Clone)]
pub struct FixedWindowLimiter {
    store: Arc<dyn RateLimitStore>,
    max: u32,
    window: Duration,
}

impl fmt::Debug for FixedWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedWindowLimiter")
            .field("max", &self.max)
            .field("window", &self.window)
            .field("tracked_clients", &self.store.len())
            .finish()
    }
}

impl FixedWindowLimiter {
    /// # Errors
    ///
    /// Returns an error if `max` is 0 or `window` is zero.
    pub fn new(
        max: u32,
        window: Duration,
        store: Arc<dyn RateLimitStore>,
    ) -> Result<Self, RateLimitError> {
        if max == 0 {
            return Err(RateLimitError::ZeroMax);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self { store, max, window })
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count a request from `key` now.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Count a request from `key` at an explicit instant.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let entry = self.store.hit(key, self.window, now);
        let reset_after = (entry.window_start + self.window).saturating_duration_since(now);

        if entry.count > self.max {
            Decision::Limited { reset_after }
        } else {
            Decision::Allowed {
                remaining: self.max - entry.count,
                reset_after,
            }
        }
    }
}
