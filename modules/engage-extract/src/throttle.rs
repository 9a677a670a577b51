// Per-platform pacing and block tracking.
//
// Pacer        — minimum gap between request starts on one platform, with jitter
// BlockTracker — consecutive blocked targets; escalates to the non-session fallback

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use engage_common::Platform;

/// Upper bound on the random jitter added to every paced wait.
const MAX_JITTER_MS: u64 = 500;

/// Spaces request starts on one platform at least `interval` apart.
/// Waiters queue on the mutex, so concurrent targets are paced one after another.
pub struct Pacer {
    platform: Platform,
    interval: Duration,
    jitter: bool,
    last_start: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(platform: Platform, interval: Duration) -> Self {
        Self {
            platform,
            interval,
            jitter: true,
            last_start: Mutex::new(None),
        }
    }

    /// Exact intervals, for tests that assert on the clock.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until the platform may be hit again, then record the new start.
    pub async fn wait(&self) {
        if self.interval.is_zero() {
            return;
        }
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let jitter = if self.jitter {
                Duration::from_millis(rand::rng().random_range(0..MAX_JITTER_MS))
            } else {
                Duration::ZERO
            };
            let ready_at = prev + self.interval + jitter;
            let now = Instant::now();
            if ready_at > now {
                debug!(
                    platform = %self.platform,
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "Pacing request"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Counts consecutive blocked targets for one platform. Once the threshold is
/// reached the platform stays escalated for the rest of the engine's life.
pub struct BlockTracker {
    platform: Platform,
    threshold: Option<u32>,
    consecutive: AtomicU32,
    escalated: AtomicBool,
}

impl BlockTracker {
    pub fn new(platform: Platform, threshold: Option<u32>) -> Self {
        Self {
            platform,
            threshold,
            consecutive: AtomicU32::new(0),
            escalated: AtomicBool::new(false),
        }
    }

    /// Record a blocked target. Returns true when this call escalated the platform.
    pub fn record_blocked(&self) -> bool {
        let count = self.consecutive.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(threshold) = self.threshold else {
            return false;
        };
        if count >= threshold && !self.escalated.swap(true, Ordering::SeqCst) {
            warn!(
                platform = %self.platform,
                consecutive = count,
                "Consecutive blocks, escalating to fallback strategy"
            );
            return true;
        }
        false
    }

    pub fn record_ok(&self) {
        self.consecutive.store(0, Ordering::SeqCst);
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive.load(Ordering::SeqCst)
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated.load(Ordering::SeqCst)
    }
}
