//! Event channel built on crossbeam-channel.
//!
//! The engine reports progress by sending [`Event`] values through a
//! clonable sender. Hosts that do not care about progress pass
//! [`null_sender`] and every send becomes a no-op.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::Event;

/// Clonable handle the engine uses to publish events.
///
/// Sending never fails: when the receiving side has been dropped the
/// event is silently discarded, so progress reporting stays optional.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Receiving side handed to the host (UI, CLI, test harness).
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event arrives, or None once all senders dropped.
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Drain everything currently queued without blocking.
    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.inner.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// Create an unbounded event channel. Events are small; this is the
/// right choice for almost every host.
pub fn channel() -> (EventSender, EventReceiver) {
    let (sender, receiver) = unbounded();
    (EventSender { inner: sender }, EventReceiver { inner: receiver })
}

/// Create a bounded channel when the host needs backpressure.
pub fn bounded_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (sender, receiver) = bounded(capacity);
    (EventSender { inner: sender }, EventReceiver { inner: receiver })
}

/// An event sender whose receiver is already gone. Every send is dropped.
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = channel();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RescanEvent, ScanEvent};
    use std::path::PathBuf;
    use std::thread;

    #[test]
    fn events_cross_threads() {
        let (sender, receiver) = channel();

        let handle = thread::spawn(move || {
            sender.send(Event::Scan(ScanEvent::FileDiscovered {
                path: PathBuf::from("/photos/x.jpg"),
            }));
        });
        handle.join().unwrap();

        match receiver.recv().unwrap() {
            Event::Scan(ScanEvent::FileDiscovered { path }) => {
                assert_eq!(path, PathBuf::from("/photos/x.jpg"));
            }
            _ => panic!("wrong event"),
        }
    }

    #[test]
    fn null_sender_discards_silently() {
        let sender = null_sender();
        sender.send(Event::Rescan(RescanEvent::Completed {
            run_id: "test".to_string(),
        }));
    }

    #[test]
    fn drain_empties_the_queue() {
        let (sender, receiver) = channel();
        for _ in 0..3 {
            sender.send(Event::Rescan(RescanEvent::Completed {
                run_id: "r".to_string(),
            }));
        }
        assert_eq!(receiver.drain().len(), 3);
        assert!(receiver.try_recv().is_none());
    }
}
