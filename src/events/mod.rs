//! # Events Module
//!
//! Progress and lifecycle reporting for the engine.
//!
//! The core never talks to a UI directly: it publishes plain events on a
//! crossbeam channel and the host decides what to do with them. Components
//! that run without a host use [`null_sender`].

mod channel;
mod types;

pub use channel::{bounded_channel, channel, null_sender, EventReceiver, EventSender};
pub use types::{
    ConflictInfo, Event, FeatureEvent, GroupEvent, OverrideEvent, PoolEvent, RescanEvent,
    RescanProgress, ScanEvent,
};
