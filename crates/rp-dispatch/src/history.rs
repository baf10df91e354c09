//! Rolling request history for latency and QPS statistics
//!
//! Completed requests are recorded as (start, end) instants; entries older
//! than the window are lazily evicted on every access. External schedulers
//! read the derived latency/QPS numbers to make load-balancing decisions.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Window used for latency and QPS statistics.
pub const ROLLING_WINDOW: Duration = Duration::from_secs(60);

/// A bounded time-series of completed-request (start, end) pairs.
///
/// All arithmetic uses the monotonic clock, so wall-clock adjustments do
/// not distort the window.
#[derive(Debug)]
pub struct RequestWindow {
    window: Duration,
    entries: VecDeque<(Instant, Instant)>,
}

impl RequestWindow {
    pub fn new() -> Self {
        Self::with_window(ROLLING_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Record one completed request.
    pub fn record(&mut self, start: Instant, end: Instant) {
        self.trim();
        self.entries.push_back((start, end));
    }

    /// Drop entries that started before the trailing window.
    pub fn trim(&mut self) {
        let cutoff = Instant::now() - self.window;
        while let Some((start, _)) = self.entries.front() {
            if *start < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Mean request latency over the trailing window; zero when empty.
    pub fn mean_latency(&mut self) -> Duration {
        self.trim();
        if self.entries.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self
            .entries
            .iter()
            .map(|(start, end)| end.duration_since(*start))
            .sum();
        total / self.entries.len() as u32
    }

    /// Average queries-per-second over the trailing window.
    pub fn qps(&mut self) -> f64 {
        self.trim();
        self.entries.len() as f64 / self.window.as_secs_f64()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RequestWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_window() {
        let mut window = RequestWindow::new();
        assert_eq!(window.mean_latency(), Duration::ZERO);
        assert_eq!(window.qps(), 0.0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_mean_latency() {
        let mut window = RequestWindow::new();
        let now = Instant::now();
        window.record(now - Duration::from_secs(2), now - Duration::from_secs(1));
        window.record(now - Duration::from_secs(4), now - Duration::from_secs(1));

        let mean = window.mean_latency();
        assert_eq!(mean, Duration::from_secs(2));
    }

    #[test]
    fn test_qps_counts_window_entries() {
        let mut window = RequestWindow::new();
        let now = Instant::now();
        for _ in 0..6 {
            window.record(now, now);
        }
        assert!((window.qps() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_entries_older_than_window_are_evicted() {
        let mut window = RequestWindow::new();
        let stale = Instant::now() - Duration::from_secs(61);
        window.record(stale, stale);

        assert_eq!(window.qps(), 0.0);
        assert!(window.is_empty());
    }

    #[test]
    fn test_eviction_keeps_recent_entries() {
        let mut window = RequestWindow::new();
        let now = Instant::now();
        let stale = now - Duration::from_secs(100);
        window.record(stale, stale);
        window.record(now - Duration::from_secs(30), now - Duration::from_secs(29));

        window.trim();
        assert_eq!(window.len(), 1);
    }
}
