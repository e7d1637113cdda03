//! Rate-limited progress reporting for pipeline runs.

use crate::events::{Event, EventSender, RescanEvent, RescanProgress};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Emit at most one progress event per this interval.
const MIN_EMIT_INTERVAL: Duration = Duration::from_millis(100);

/// Shared, thread-safe progress counters. Worker tasks bump counters and
/// call [`ProgressReporter::maybe_emit`]; emission is throttled so hosts
/// see at most ten updates a second no matter how fast work completes.
pub struct ProgressReporter {
    events: EventSender,
    last_emit: Mutex<Option<Instant>>,
    files_scanned: AtomicUsize,
    features_computed: AtomicUsize,
    features_reused: AtomicUsize,
    groups_created: AtomicUsize,
}

impl ProgressReporter {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            last_emit: Mutex::new(None),
            files_scanned: AtomicUsize::new(0),
            features_computed: AtomicUsize::new(0),
            features_reused: AtomicUsize::new(0),
            groups_created: AtomicUsize::new(0),
        }
    }

    pub fn add_scanned(&self, count: usize) {
        self.files_scanned.fetch_add(count, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn add_computed(&self, count: usize) {
        self.features_computed.fetch_add(count, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn set_reused(&self, count: usize) {
        self.features_reused.store(count, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn set_groups(&self, count: usize) {
        self.groups_created.store(count, Ordering::Relaxed);
        self.maybe_emit();
    }

    pub fn snapshot(&self) -> RescanProgress {
        RescanProgress {
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            features_computed: self.features_computed.load(Ordering::Relaxed),
            features_reused: self.features_reused.load(Ordering::Relaxed),
            groups_created: self.groups_created.load(Ordering::Relaxed),
        }
    }

    /// Emit if the throttle window has passed.
    pub fn maybe_emit(&self) {
        let Ok(mut last_emit) = self.last_emit.lock() else {
            return;
        };
        let now = Instant::now();
        let due = last_emit
            .map(|t| now.duration_since(t) >= MIN_EMIT_INTERVAL)
            .unwrap_or(true);
        if due {
            *last_emit = Some(now);
            self.events
                .send(Event::Rescan(RescanEvent::Progress(self.snapshot())));
        }
    }

    /// Unconditional emission, used at phase boundaries and completion.
    pub fn force_emit(&self) {
        if let Ok(mut last_emit) = self.last_emit.lock() {
            *last_emit = Some(Instant::now());
        }
        self.events
            .send(Event::Rescan(RescanEvent::Progress(self.snapshot())));
    }
}
