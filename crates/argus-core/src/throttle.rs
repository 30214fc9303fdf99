//! Global rate limiting for job orchestration.
//!
//! The worker acquires one slot per job start; N operations per sliding
//! window are allowed across the whole process, independent of per-run
//! politeness delays.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// N operations per window.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_ops: u32,
    pub window: Duration,
}

impl RateLimitConfig {
    pub fn new(max_ops: u32, window: Duration) -> Self {
        Self {
            max_ops: max_ops.max(1),
            window,
        }
    }
}

impl Default for RateLimitConfig {
    /// 10 operations per second.
    fn default() -> Self {
        Self {
            max_ops: 10,
            window: Duration::from_secs(1),
        }
    }
}

/// Sliding-window rate limiter.
///
/// Thread-safe: clones share one window. `acquire` suspends until a slot
/// frees up, so callers serialize naturally under load.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    ops: Arc<Mutex<VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            ops: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Wait until an operation slot is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut ops = self.ops.lock().await;
                let now = Instant::now();
                while let Some(front) = ops.front() {
                    if now.duration_since(*front) >= self.config.window {
                        ops.pop_front();
                    } else {
                        break;
                    }
                }
                if (ops.len() as u32) < self.config.max_ops {
                    ops.push_back(now);
                    return;
                }
                // Sleep until the oldest op leaves the window.
                match ops.front() {
                    Some(front) => self
                        .config
                        .window
                        .saturating_sub(now.duration_since(*front)),
                    None => Duration::ZERO,
                }
            };
            tracing::debug!(sleep_ms = %wait.as_millis(), "Rate limit reached, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}
