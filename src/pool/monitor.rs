//! Interaction-rate monitoring for back-off.
//!
//! The host reports user-interaction events (mouse, keyboard, UI
//! activity) as they happen. When the count inside the trailing window
//! reaches the threshold, workers delay NORMAL and LOW priority task
//! starts until the rate falls again.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window counter of external interaction events.
pub struct InteractionMonitor {
    window: Duration,
    threshold: u32,
    events: Mutex<VecDeque<Instant>>,
}

impl InteractionMonitor {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold,
            events: Mutex::new(VecDeque::new()),
        }
    }

    /// Record one interaction event at the current instant.
    pub fn record(&self) {
        self.record_at(Instant::now());
    }

    fn record_at(&self, at: Instant) {
        if let Ok(mut events) = self.events.lock() {
            events.push_back(at);
            // Bound memory: anything older than the window is dead weight
            let cutoff = at.checked_sub(self.window);
            if let Some(cutoff) = cutoff {
                while events.front().is_some_and(|&t| t < cutoff) {
                    events.pop_front();
                }
            }
        }
    }

    /// Number of events inside the trailing window.
    pub fn events_in_window(&self) -> usize {
        let now = Instant::now();
        let Ok(mut events) = self.events.lock() else {
            return 0;
        };
        if let Some(cutoff) = now.checked_sub(self.window) {
            while events.front().is_some_and(|&t| t < cutoff) {
                events.pop_front();
            }
        }
        events.len()
    }

    /// True while the trailing-window rate is at or above the threshold.
    pub fn is_backing_off(&self) -> bool {
        self.events_in_window() >= self.threshold as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn quiet_monitor_does_not_back_off() {
        let monitor = InteractionMonitor::new(Duration::from_secs(1), 3);
        assert!(!monitor.is_backing_off());
    }

    #[test]
    fn burst_at_threshold_triggers_back_off() {
        let monitor = InteractionMonitor::new(Duration::from_secs(1), 3);
        monitor.record();
        monitor.record();
        assert!(!monitor.is_backing_off());
        monitor.record();
        assert!(monitor.is_backing_off());
    }

    #[test]
    fn events_age_out_of_the_window() {
        let monitor = InteractionMonitor::new(Duration::from_millis(50), 2);
        monitor.record();
        monitor.record();
        assert!(monitor.is_backing_off());

        thread::sleep(Duration::from_millis(80));
        assert!(!monitor.is_backing_off());
        assert_eq!(monitor.events_in_window(), 0);
    }

    #[test]
    fn monitor_is_shareable_across_threads() {
        let monitor = std::sync::Arc::new(InteractionMonitor::new(Duration::from_secs(1), 10));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = monitor.clone();
                thread::spawn(move || {
                    for _ in 0..5 {
                        monitor.record();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(monitor.events_in_window(), 20);
    }
}
