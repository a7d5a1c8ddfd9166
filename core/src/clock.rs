//! Tick-driven countdown timer and monotonic stopwatch.

use std::time::Instant;

/// A countdown driven by the dispatch loop's elapsed-time feed.
///
/// The timer never fires by itself: the owner calls `clock` with the
/// milliseconds since the last tick and polls `has_expired`.
pub struct Timer {
    timeout: u64,
    elapsed: u64,
    running: bool,
}

impl Timer {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout: timeout_ms,
            elapsed: 0,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.elapsed = 0;
        self.running = true;
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn clock(&mut self, ms: u64) {
        if self.running {
            self.elapsed = self.elapsed.saturating_add(ms);
        }
    }

    pub fn has_expired(&self) -> bool {
        self.running && self.elapsed >= self.timeout
    }
}

/// Monotonic millisecond stopwatch.
pub struct StopWatch {
    started: Instant,
}

impl StopWatch {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Restart the reference point.
    pub fn start(&mut self) {
        self.started = Instant::now();
    }

    /// Milliseconds since the last `start`.
    pub fn elapsed(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

impl Default for StopWatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_expires_after_timeout() {
        let mut timer = Timer::new(500);
        timer.start();
        timer.clock(499);
        assert!(!timer.has_expired());
        timer.clock(1);
        assert!(timer.has_expired());
    }

    #[test]
    fn test_timer_ignores_ticks_when_stopped() {
        let mut timer = Timer::new(100);
        timer.clock(1000);
        assert!(!timer.has_expired());
        assert!(!timer.is_running());
    }

    #[test]
    fn test_timer_restart_clears_elapsed() {
        let mut timer = Timer::new(100);
        timer.start();
        timer.clock(100);
        assert!(timer.has_expired());
        timer.start();
        assert!(!timer.has_expired());
        assert!(timer.is_running());
    }

    #[test]
    fn test_stopwatch_counts_up() {
        let mut watch = StopWatch::new();
        watch.start();
        std::thread::sleep(std::time::Duration::from_millis(15));
        assert!(watch.elapsed() >= 10);
    }
}
