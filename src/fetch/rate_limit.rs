//! Outbound request throttling.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Spaces outbound requests at least `60 / R` seconds apart.
///
/// Each caller reserves the next free slot under a short-lived lock and then
/// sleeps until that slot outside the lock, so concurrent callers are
/// serialized without holding a guard across an await point.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_minute: u32,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter for `requests_per_minute` (a rate of 0 is treated as 1).
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            requests_per_minute: rpm,
            min_interval: Duration::from_secs_f64(60.0 / rpm as f64),
            next_slot: Mutex::new(None),
        }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }

    /// Minimum spacing between two requests.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be sent. Call immediately before each request.
    pub async fn wait_if_needed(&self) {
        let slot = {
            let mut next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        let wait = slot.saturating_duration_since(Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiter sleeping {:?}", wait);
            sleep_until(slot).await;
        }
    }

    /// Remaining wait before the next request would be allowed, without blocking.
    pub fn get_delay(&self) -> Duration {
        let next = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
        match *next {
            Some(slot) => slot.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}
