//! Sliding-window rate limiter for outbound batch calls
//!
//! Owned and instantiable: call sites either share one limiter behind an
//! `Arc` or hold independent ones by explicit composition. There is no
//! ambient global state, so tests can spin up as many limiters as they need.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Extra wait added when a slot frees up, so a grant never lands exactly on
/// the window edge
const SAFETY_MARGIN: Duration = Duration::from_millis(50);

/// Caps completions of `acquire` to `max_calls` within any rolling `window`
#[derive(Debug)]
pub struct RateLimiter {
    max_calls: usize,
    window: Duration,
    granted: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Limiter allowing `max_calls` per rolling `window`
    pub fn new(max_calls: usize, window: Duration) -> Self {
        Self {
            max_calls: max_calls.max(1),
            window,
            granted: Mutex::new(VecDeque::new()),
        }
    }

    /// Limiter with the standard one-minute window
    pub fn per_minute(max_calls: usize) -> Self {
        Self::new(max_calls, Duration::from_secs(60))
    }

    /// Suspend until a slot is available, then consume it
    ///
    /// Grants that have aged out of the window are discarded first; at
    /// capacity, the wait is however long the oldest grant still needs to
    /// age out, plus a small margin, after which the check runs again.
    pub async fn acquire(&self) {
        loop {
            let mut granted = self.granted.lock().await;
            let now = Instant::now();
            while granted
                .front()
                .is_some_and(|t| now.duration_since(*t) >= self.window)
            {
                granted.pop_front();
            }

            if granted.len() < self.max_calls {
                granted.push_back(now);
                return;
            }

            let oldest = granted.front().copied();
            drop(granted);

            let wait = match oldest {
                Some(t) => self.window.saturating_sub(now.duration_since(t)) + SAFETY_MARGIN,
                None => SAFETY_MARGIN,
            };
            sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn grants_immediately_under_capacity() {
        let limiter = RateLimiter::new(3, WINDOW);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        // Paused clock: any sleep would have advanced time
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn call_over_capacity_waits_for_the_window() {
        let limiter = RateLimiter::new(3, WINDOW);
        let start = Instant::now();
        for _ in 0..4 {
            limiter.acquire().await;
        }
        assert!(Instant::now().duration_since(start) >= WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn no_sliding_window_exceeds_capacity() {
        let limiter = RateLimiter::new(5, WINDOW);
        let mut grants = Vec::new();
        for _ in 0..17 {
            limiter.acquire().await;
            grants.push(Instant::now());
        }

        for (i, first) in grants.iter().enumerate() {
            let in_window = grants[i..]
                .iter()
                .take_while(|t| t.duration_since(*first) < WINDOW)
                .count();
            assert!(
                in_window <= 5,
                "{} grants inside one window starting at grant {}",
                in_window,
                i
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn staggered_calls_reuse_freed_slots() {
        let limiter = RateLimiter::new(2, WINDOW);
        limiter.acquire().await;
        limiter.acquire().await;

        // Let both grants age out, then the next two must be immediate again
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_limiters_do_not_share_state() {
        let a = RateLimiter::new(1, WINDOW);
        let b = RateLimiter::new(1, WINDOW);
        let start = Instant::now();
        a.acquire().await;
        b.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_is_clamped_to_one() {
        let limiter = RateLimiter::new(0, WINDOW);
        limiter.acquire().await;
    }
}
