//! In-process sliding-window send throttle.
//!
//! Best-effort abuse mitigation: state lives in this process only and is lost
//! on restart. Deployments running several instances against one store should
//! use the shared Redis throttle from `storage-adapters` instead.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use domains::{Admission, SendThrottle, UserId};
use tokio::time::Instant;

/// Default number of sends admitted per window.
pub const DEFAULT_MAX_SENDS: usize = 10;
/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

pub struct SlidingWindowLimiter {
    /// Accepted send instants per sender, oldest first.
    windows: DashMap<UserId, VecDeque<Instant>>,
    max_sends: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(max_sends: usize, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_sends,
            window,
        }
    }

    /// Checks and records one send. The map entry stays write-locked for the
    /// whole check, so concurrent sends by one sender are serialized.
    pub fn check(&self, sender: &UserId) -> Admission {
        let now = Instant::now();
        let mut entry = self.windows.entry(sender.clone()).or_default();
        let sends = entry.value_mut();

        while sends
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            sends.pop_front();
        }

        if sends.len() < self.max_sends {
            sends.push_back(now);
            return Admission::Admitted;
        }

        let retry_after = sends
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(self.window);
        Admission::Throttled { retry_after }
    }

    /// Drops senders with no send inside the window.
    pub fn purge_idle(&self) {
        let now = Instant::now();
        self.windows.retain(|_, sends| {
            sends
                .back()
                .is_some_and(|latest| now.duration_since(*latest) < self.window)
        });
    }

    pub fn tracked_senders(&self) -> usize {
        self.windows.len()
    }
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SENDS, DEFAULT_WINDOW)
    }
}

#[async_trait]
impl SendThrottle for SlidingWindowLimiter {
    async fn admit(&self, sender: &UserId) -> Admission {
        let admission = self.check(sender);
        if let Admission::Throttled { retry_after } = admission {
            tracing::warn!(sender = %sender, retry_after_ms = retry_after.as_millis() as u64, "send throttled");
        }
        admission
    }
}
