//! Per-session fixed-window command limiter.

use std::time::Duration;

use tokio::time::Instant;

/// Counts commands in a window that opens with the first command and
/// resets completely once `window` has elapsed.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    max: u32,
    window_start: Option<Instant>,
    count: u32,
}

impl RateLimiter {
    pub fn new(window: Duration, max: u32) -> Self {
        Self {
            window,
            max,
            window_start: None,
            count: 0,
        }
    }

    /// Count one command at `now`.  Returns `false` when the window is
    /// already full; a rejected command is not counted.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.window => {}
            _ => {
                self.window_start = Some(now);
                self.count = 0;
            }
        }
        if self.count >= self.max {
            return false;
        }
        self.count += 1;
        true
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifty_fit_and_the_fifty_first_is_rejected() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 50);
        let start = Instant::now();
        for i in 0..50 {
            assert!(
                limiter.try_acquire(start + Duration::from_millis(i * 10)),
                "command {i} should fit"
            );
        }
        assert!(!limiter.try_acquire(start + Duration::from_millis(900)));
    }

    #[test]
    fn window_resets_completely_after_it_elapses() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1), 50);
        let start = Instant::now();
        for _ in 0..50 {
            assert!(limiter.try_acquire(start));
        }
        assert!(!limiter.try_acquire(start + Duration::from_millis(999)));

        let later = start + Duration::from_millis(1000);
        assert!(limiter.try_acquire(later));
        // A fresh window: 49 more fit.
        for _ in 0..49 {
            assert!(limiter.try_acquire(later));
        }
        assert!(!limiter.try_acquire(later));
    }

    #[test]
    fn rejections_do_not_extend_the_window() {
        let mut limiter = RateLimiter::new(Duration::from_millis(100), 1);
        let start = Instant::now();
        assert!(limiter.try_acquire(start));
        assert!(!limiter.try_acquire(start + Duration::from_millis(50)));
        assert!(!limiter.try_acquire(start + Duration::from_millis(99)));
        assert!(limiter.try_acquire(start + Duration::from_millis(100)));
    }
}
