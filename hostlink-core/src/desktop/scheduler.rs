//! Frame pacing.

use std::time::{Duration, Instant};

/// Decides how long to wait before the next capture.
pub trait CaptureScheduler: Send {
    fn begin_capture(&mut self);
    fn end_capture(&mut self);
    fn next_capture_delay(&self) -> Duration;
}

/// Keeps a fixed capture rate: the delay is the target interval minus the
/// time the last capture took, never negative.
#[derive(Debug)]
pub struct FixedRateScheduler {
    interval: Duration,
    begin: Option<Instant>,
    last_duration: Duration,
}

impl FixedRateScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            begin: None,
            last_duration: Duration::ZERO,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl CaptureScheduler for FixedRateScheduler {
    fn begin_capture(&mut self) {
        self.begin = Some(Instant::now());
    }

    fn end_capture(&mut self) {
        if let Some(begin) = self.begin.take() {
            self.last_duration = begin.elapsed();
        }
    }

    fn next_capture_delay(&self) -> Duration {
        self.interval.saturating_sub(self.last_duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_interval_before_first_capture() {
        let scheduler = FixedRateScheduler::new(Duration::from_millis(40));
        assert_eq!(scheduler.next_capture_delay(), Duration::from_millis(40));
    }

    #[test]
    fn capture_time_is_subtracted() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_millis(500));
        scheduler.begin_capture();
        std::thread::sleep(Duration::from_millis(20));
        scheduler.end_capture();

        let delay = scheduler.next_capture_delay();
        assert!(delay <= Duration::from_millis(480));
    }

    #[test]
    fn slow_capture_means_no_delay() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_millis(1));
        scheduler.begin_capture();
        std::thread::sleep(Duration::from_millis(5));
        scheduler.end_capture();
        assert_eq!(scheduler.next_capture_delay(), Duration::ZERO);
    }

    #[test]
    fn end_without_begin_is_ignored() {
        let mut scheduler = FixedRateScheduler::new(Duration::from_millis(10));
        scheduler.end_capture();
        assert_eq!(scheduler.next_capture_delay(), Duration::from_millis(10));
    }
}
