//! Sliding-window rate limiter for exchange API calls.
//!
//! Bounds the number of requests in a trailing time window. Callers block in
//! [`RateLimiter::acquire`] (suspending, never spinning) until a slot frees
//! up — capacity exhaustion delays work, it never fails it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Slack added to computed waits so a re-check lands after expiry.
const WAIT_SLACK: Duration = Duration::from_millis(10);

/// Sliding-window rate limiter.
///
/// Safe for concurrent callers: the timestamp list is guarded by a mutex
/// that is never held across a sleep.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `max_requests` per `window`.
    ///
    /// `max_requests` is clamped to at least 1.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until a request slot is available, then claim it.
    ///
    /// Drops timestamps older than the window, and when the window is full,
    /// sleeps until the oldest entry expires and re-checks — the list may
    /// have drained further during the wait.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut stamps = self.timestamps.lock().await;
                let now = Instant::now();
                Self::prune(&mut stamps, now, self.window);

                if stamps.len() < self.max_requests {
                    stamps.push_back(now);
                    return;
                }

                let oldest = stamps.front().copied().unwrap_or(now);
                self.window.saturating_sub(now.duration_since(oldest)) + WAIT_SLACK
            };

            tracing::debug!(
                wait_ms = wait.as_millis() as u64,
                max_requests = self.max_requests,
                "Rate limit reached, waiting for window to slide"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Number of requests currently inside the window.
    pub async fn in_flight(&self) -> usize {
        let mut stamps = self.timestamps.lock().await;
        Self::prune(&mut stamps, Instant::now(), self.window);
        stamps.len()
    }

    fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(front) = stamps.front() {
            if now.duration_since(*front) > window {
                stamps.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_under_limit_is_immediate() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire().await;
        }

        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(limiter.in_flight().await, 5);
    }

    #[tokio::test]
    async fn test_third_acquire_waits_for_window() {
        let window = Duration::from_millis(250);
        let limiter = RateLimiter::new(2, window);

        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        let waited = start.elapsed();

        assert!(
            waited >= Duration::from_millis(200),
            "third acquire returned after {waited:?}, expected a wait near the window"
        );
    }

    #[tokio::test]
    async fn test_window_never_exceeds_max() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_millis(100)));

        let mut handles = Vec::new();
        for _ in 0..9 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(limiter.in_flight().await <= 3);
    }

    #[tokio::test]
    async fn test_slots_free_after_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.acquire().await;
        limiter.acquire().await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(limiter.in_flight().await, 0);

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(20));
    }

    #[test]
    fn test_zero_max_is_clamped() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert_eq!(limiter.max_requests, 1);
    }
}
