//! Adaptive rate-limit tracking and circuit breaking
//!
//! Tracks consecutive throttling signals across every worker that shares the
//! tracker, computes a capped exponential backoff window, and raises a
//! rotation-needed flag once the configured threshold of consecutive signals
//! is reached. One instance is shared by all jobs a downloader runs, so
//! throttle signals from any item feed the same circuit breaker.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::RateLimitConfig;

#[derive(Debug, Default)]
struct TrackerState {
    consecutive_throttles: u32,
    last_throttle: Option<Instant>,
    backoff_until: Option<Instant>,
    rotation_needed: bool,
}

/// Shared throttle tracker. Thread-safe; cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<TrackerState>,
}

impl RateLimiter {
    /// Create a tracker with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Record one throttling signal.
    ///
    /// Increments the consecutive counter, extends the backoff window to
    /// `now + min(initial * 2^(count-1), max)`, and raises the rotation flag
    /// once the counter reaches the configured threshold. The window never
    /// moves backwards while the counter grows.
    pub async fn record_throttled(&self) {
        let mut state = self.state.lock().await;

        state.consecutive_throttles += 1;
        state.last_throttle = Some(Instant::now());

        if state.consecutive_throttles >= self.config.rotation_threshold {
            state.rotation_needed = true;
        }

        let backoff = backoff_for(
            state.consecutive_throttles,
            self.config.initial_backoff,
            self.config.max_backoff,
        );
        let deadline = Instant::now() + backoff;

        // Monotonically non-decreasing while the counter grows
        state.backoff_until = Some(match state.backoff_until {
            Some(existing) if existing > deadline => existing,
            _ => deadline,
        });

        tracing::warn!(
            consecutive = state.consecutive_throttles,
            backoff_secs = backoff.as_secs(),
            rotation_needed = state.rotation_needed,
            "Throttling signal recorded"
        );
    }

    /// Record a successful attempt: resets the counter and rotation flag.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.consecutive_throttles = 0;
        state.rotation_needed = false;
    }

    /// Remaining backoff window, if the caller should wait before attempting.
    pub async fn should_wait(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        let deadline = state.backoff_until?;
        let now = Instant::now();
        if now < deadline {
            Some(deadline - now)
        } else {
            None
        }
    }

    /// Whether enough consecutive throttles have accumulated that the worker
    /// pool should rotate the network identity before new attempts start.
    pub async fn rotation_needed(&self) -> bool {
        self.state.lock().await.rotation_needed
    }

    /// Clear the rotation flag after a rotation has been performed.
    pub async fn clear_rotation_flag(&self) {
        self.state.lock().await.rotation_needed = false;
    }

    /// Current consecutive throttle count (primarily for diagnostics)
    pub async fn consecutive_throttles(&self) -> u32 {
        self.state.lock().await.consecutive_throttles
    }
}

/// Capped exponential backoff: `initial * 2^(count-1)`, clamped to `max`.
fn backoff_for(count: u32, initial: Duration, max: Duration) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let shift = (count - 1).min(31);
    let scaled = initial.saturating_mul(1u32 << shift);
    scaled.min(max)
}
