// src/scene/pacing.rs

//! Rate limiting of full composite passes.
//!
//! A pass is due once the interval has elapsed since the previous pass
//! started. After a pass the caller sleeps whatever is left of the interval;
//! a pass that overran leaves nothing to sleep and no debt behind.

use std::time::{Duration, Instant};

const FALLBACK_REFRESH_HZ: u32 = 60;

#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    last_pass: Option<Instant>,
}

impl FramePacer {
    pub fn new(interval: Duration) -> Self {
        FramePacer {
            interval,
            last_pass: None,
        }
    }

    /// Pacer for a display refreshing `refresh_hz` times per second; 0 means
    /// unknown and is treated as 60.
    pub fn from_refresh_rate(refresh_hz: u32) -> Self {
        let hz = if refresh_hz == 0 {
            FALLBACK_REFRESH_HZ
        } else {
            refresh_hz
        };
        Self::new(Duration::from_secs(1) / hz)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        match self.last_pass {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Claims the pass starting at `now` if one is due. Concurrent callers
    /// sharing a pacer get at most one pass per interval.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.last_pass = Some(now);
        true
    }

    /// Sleep owed after a pass that ran from `started` to `finished`.
    pub fn remaining(&self, started: Instant, finished: Instant) -> Option<Duration> {
        let spent = finished.saturating_duration_since(started);
        self.interval
            .checked_sub(spent)
            .filter(|left| !left.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn it_should_derive_the_interval_from_the_refresh_rate() {
        assert_eq!(FramePacer::from_refresh_rate(60).interval(), Duration::from_nanos(16_666_666));
        assert_eq!(FramePacer::from_refresh_rate(50).interval(), Duration::from_millis(20));
        assert_eq!(FramePacer::from_refresh_rate(24).interval(), Duration::from_nanos(41_666_666));
        assert_eq!(FramePacer::from_refresh_rate(0).interval(), Duration::from_nanos(16_666_666));
    }

    #[test]
    fn it_should_sleep_the_remainder_of_a_short_pass() {
        let pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        let end = start + Duration::from_millis(5);
        assert_eq!(pacer.remaining(start, end), Some(Duration::from_millis(11)));
    }

    #[test]
    fn it_should_not_sleep_after_an_overrunning_pass() {
        let pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        assert_eq!(pacer.remaining(start, start + Duration::from_millis(20)), None);
        assert_eq!(pacer.remaining(start, start + Duration::from_millis(16)), None);
    }

    #[test]
    fn it_should_start_the_next_pass_immediately_after_an_overrun() {
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        assert!(pacer.try_begin(start));
        // Work took 20ms; the following request is due at once.
        assert!(pacer.try_begin(start + Duration::from_millis(20)));
        // And no catch-up: the one after that waits a full interval again.
        assert!(!pacer.try_begin(start + Duration::from_millis(30)));
        assert!(pacer.try_begin(start + Duration::from_millis(36)));
    }

    #[test]
    fn it_should_not_run_faster_than_the_refresh_rate() {
        let mut pacer = FramePacer::from_refresh_rate(60);
        let start = Instant::now();
        assert!(pacer.try_begin(start));
        // 16ms would allow 62.5 passes a second.
        assert!(!pacer.try_begin(start + Duration::from_millis(16)));
        assert!(pacer.try_begin(start + Duration::from_millis(17)));
    }

    #[test]
    fn it_should_hold_off_passes_inside_the_interval() {
        let mut pacer = FramePacer::new(Duration::from_millis(16));
        let start = Instant::now();
        assert!(pacer.try_begin(start));
        assert!(!pacer.try_begin(start + Duration::from_millis(5)));
        assert!(!pacer.try_begin(start + Duration::from_millis(15)));
        assert!(pacer.try_begin(start + Duration::from_millis(16)));
    }
}
