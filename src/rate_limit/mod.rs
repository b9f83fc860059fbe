// Request throttling for the embedding provider
// Sliding-window limiter: never more than N permits in any rolling window


use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Throttles outbound requests to a requests-per-minute budget.
///
/// The budget can be changed while callers are waiting; the new value is
/// applied on the next check.
#[derive(Debug)]
pub struct RateLimiter {
    requests_per_window: AtomicU32,
    window: Duration,
    issued: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    #[inline]
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, DEFAULT_WINDOW)
    }

    #[inline]
    pub fn with_window(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window: AtomicU32::new(requests_per_window.max(1)),
            window,
            issued: Mutex::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn requests_per_minute(&self) -> u32 {
        self.requests_per_window.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_requests_per_minute(&self, requests_per_minute: u32) {
        let previous = self
            .requests_per_window
            .swap(requests_per_minute.max(1), Ordering::Relaxed);
        if previous != requests_per_minute {
            debug!(
                "Rate limit changed from {} to {} requests per window",
                previous, requests_per_minute
            );
        }
    }

    /// Suspend until a request is permitted under the current budget
    #[inline]
    pub async fn wait(&self) {
        loop {
            let delay = match self.acquire_or_delay() {
                None => return,
                Some(delay) => delay,
            };
            debug!("Rate limiting: sleeping for {:?}", delay);
            sleep(delay).await;
        }
    }

    /// Take a permit if one is available right now
    #[inline]
    pub fn try_acquire(&self) -> bool {
        self.acquire_or_delay().is_none()
    }

    /// Permits still available in the current window
    #[inline]
    pub fn remaining(&self) -> u32 {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        self.expire(&mut issued, Instant::now());
        let budget = self.requests_per_minute() as usize;
        budget.saturating_sub(issued.len()) as u32
    }

    fn acquire_or_delay(&self) -> Option<Duration> {
        let mut issued = self.issued.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        self.expire(&mut issued, now);

        let budget = self.requests_per_minute() as usize;
        if issued.len() < budget {
            issued.push_back(now);
            return None;
        }

        // The permit frees up once enough of the oldest entries leave the window
        let blocking = issued[issued.len() - budget];
        Some((blocking + self.window).saturating_duration_since(now))
    }

    fn expire(&self, issued: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&oldest) = issued.front() {
            if oldest + self.window <= now {
                issued.pop_front();
            } else {
                break;
            }
        }
    }
}
