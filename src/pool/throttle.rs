//! Per-category I/O pacing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Spaces task starts within each I/O category.
///
/// The minimum interval between two starts in one category is
/// `1 / ops_per_sec`; zero disables pacing entirely. Categories are
/// independent of each other.
pub struct IoThrottle {
    interval: Option<Duration>,
    last_start: Mutex<HashMap<String, Instant>>,
}

impl IoThrottle {
    pub fn new(ops_per_sec: f64) -> Self {
        let interval = if ops_per_sec > 0.0 {
            Some(Duration::from_secs_f64(1.0 / ops_per_sec))
        } else {
            None
        };
        Self {
            interval,
            last_start: Mutex::new(HashMap::new()),
        }
    }

    /// Reserve the next start slot for `category` and return how long the
    /// caller must sleep before starting. Zero when unthrottled or the
    /// category has been idle longer than the interval.
    pub fn reserve(&self, category: &str) -> Duration {
        let Some(interval) = self.interval else {
            return Duration::ZERO;
        };
        let Ok(mut last_start) = self.last_start.lock() else {
            return Duration::ZERO;
        };

        let now = Instant::now();
        let start_at = match last_start.get(category) {
            Some(&previous) => (previous + interval).max(now),
            None => now,
        };
        last_start.insert(category.to_string(), start_at);
        start_at.saturating_duration_since(now)
    }
}
