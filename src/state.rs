//! Shared application state for Axum handlers and pipeline stages.
//!
//! Holds the configuration, the rate-limit store and the catalog. The store
//! is the only cross-request mutable state of the pipeline; it is injected
//! here so tests can share, inspect and reset it.
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken`. Call `shutdown()` to stop them before exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::limiter::{FixedWindowLimiter, MemoryStore, RateLimitError, RateLimitStore};
use crate::metrics;

/// Shared application state, cloned per handler.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::new(config);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Resource documents
    pub catalog: Catalog,
    /// Timestamp when the application started
    pub started_at: Instant,
    rate_limit_store: Arc<dyn RateLimitStore>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// State with a fresh in-memory rate-limit store.
    ///
    /// Must be called inside a Tokio runtime: the expired-entry sweep is
    /// spawned immediately when rate limiting is enabled.
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    /// State around an existing rate-limit store.
    pub fn with_store(config: Config, rate_limit_store: Arc<dyn RateLimitStore>) -> Self {
        let state = Self {
            config: Arc::new(config),
            catalog: Catalog::new(),
            started_at: Instant::now(),
            rate_limit_store,
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.rate_limiting_enabled() {
            state.spawn_sweep_task();
        }

        state
    }

    pub fn rate_limit_store(&self) -> &Arc<dyn RateLimitStore> {
        &self.rate_limit_store
    }

    /// Limiter over the shared store, or `None` when limiting is disabled.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if the configured window is zero.
    pub fn rate_limiter(&self) -> Result<Option<FixedWindowLimiter>, RateLimitError> {
        if !self.config.rate_limiting_enabled() {
            return Ok(None);
        }

        FixedWindowLimiter::new(
            self.config.rate_limit_max,
            self.config.rate_limit_window,
            self.rate_limit_store.clone(),
        )
        .map(Some)
    }

    /// Periodically drop entries whose window has elapsed.
    ///
    /// Expired entries would be reset on the client's next request anyway;
    /// the sweep only bounds memory for clients that never come back.
    fn spawn_sweep_task(&self) {
        let store = self.rate_limit_store.clone();
        let window = self.config.rate_limit_window;
        let every = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(every);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate-limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired(window, tokio::time::Instant::now());
                        let tracked = store.len();
                        metrics::set_tracked_clients(tracked);
                        trace!(removed, tracked, "Swept expired rate-limit entries");
                    }
                }
            }

            debug!("Rate-limit sweep task shutting down");
        });
    }

    /// Signal background tasks to stop and wait for them.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
