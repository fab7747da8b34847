//! Reconnect policy: a fixed, non-randomized delay schedule.
//!
//! The delay before the next dial is picked by the number of consecutive
//! failures so far.  Once the schedule runs out the final delay repeats
//! forever; the host never stops retrying.

use std::time::Duration;

/// Controls how long the host waits between failed dial attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    /// Delays indexed by consecutive-failure count.  Must not be empty.
    pub delays: Vec<Duration>,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from_secs(&[0, 1, 3, 5, 10, 30])
    }
}

impl ReconnectBackoff {
    pub fn from_secs(secs: &[u64]) -> Self {
        Self {
            delays: secs.iter().copied().map(Duration::from_secs).collect(),
        }
    }

    /// Delay to wait after `failures` consecutive failures (0-indexed: the
    /// first failure waits `delays[0]`).
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        self.delays[(failures as usize).min(last)]
    }

    /// Whether `failures` has run past the end of the schedule, i.e. the
    /// delay has stopped escalating.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures as usize >= self.delays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_then_repeats_final_delay() {
        let p = ReconnectBackoff::default();
        let delays: Vec<u64> = (0..9).map(|n| p.delay_for_attempt(n).as_secs()).collect();
        assert_eq!(delays, vec![0, 1, 3, 5, 10, 30, 30, 30, 30]);
    }

    #[test]
    fn very_large_failure_count_stays_capped() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn exhaustion_flag() {
        let p = ReconnectBackoff::default();
        assert!(!p.is_exhausted(5));
        assert!(p.is_exhausted(6));
    }

    #[test]
    fn empty_schedule_means_no_delay() {
        let p = ReconnectBackoff { delays: vec![] };
        assert_eq!(p.delay_for_attempt(3), Duration::ZERO);
    }
}
