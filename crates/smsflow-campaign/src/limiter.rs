//! Outbound send throttle.
//!
//! One process-wide sliding-window budget shared by the single-send and
//! bulk-send paths. A sliding log of send instants (rather than a fixed
//! window counter) is used so no 60-second span ever observes more than
//! the configured ceiling, including across window boundaries.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

#[derive(Debug)]
struct LimiterInner {
    /// Instants of sends still inside the current window, oldest first.
    log: VecDeque<Instant>,
}

/// Sliding-window rate limiter. Cheap to clone; clones share one budget.
#[derive(Debug, Clone)]
pub struct SendLimiter {
    inner: Arc<Mutex<LimiterInner>>,
    max_per_window: u32,
    window: Duration,
    enabled: bool,
}

impl SendLimiter {
    /// Ceiling of `max_per_window` sends per rolling `window`.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterInner {
                log: VecDeque::with_capacity(max_per_window as usize),
            })),
            max_per_window: max_per_window.max(1),
            window,
            enabled: true,
        }
    }

    /// Conventional per-minute ceiling.
    pub fn per_minute(max: u32) -> Self {
        Self::new(max, Duration::from_secs(60))
    }

    /// A limiter that admits everything. Used when throttling is turned
    /// off in configuration.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LimiterInner {
                log: VecDeque::new(),
            })),
            max_per_window: u32::MAX,
            window: Duration::ZERO,
            enabled: false,
        }
    }

    /// Suspend until one send may proceed, then consume a slot.
    ///
    /// Returns as soon as the rolling window has room; waiting callers are
    /// admitted as earlier sends age out of the window.
    pub async fn acquire(&self) {
        if !self.enabled {
            return;
        }
        loop {
            let wake_at = {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                while let Some(front) = inner.log.front() {
                    if now.duration_since(*front) >= self.window {
                        inner.log.pop_front();
                    } else {
                        break;
                    }
                }
                if (inner.log.len() as u32) < self.max_per_window {
                    inner.log.push_back(now);
                    return;
                }
                // Window full; the oldest entry decides when a slot frees.
                let oldest = *inner.log.front().unwrap_or(&now);
                debug!(
                    in_window = inner.log.len(),
                    "send budget exhausted, waiting for window to roll"
                );
                oldest + self.window
            };
            sleep_until(wake_at).await;
        }
    }

    /// Sends currently counted against the window. Diagnostic only.
    pub async fn in_flight(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        while let Some(front) = inner.log.front() {
            if now.duration_since(*front) >= self.window {
                inner.log.pop_front();
            } else {
                break;
            }
        }
        inner.log.len()
    }
}
