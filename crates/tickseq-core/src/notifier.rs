use std::sync::mpsc::{Receiver, Sender, channel};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    merge::DataFault,
    state::{ConductorChange, SequencerSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportChange {
    Started,
    Stopped,
}

/// Observer messages. Delivered from inside the sequencer's critical
/// section, so receivers must not block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    PositionChanged(SequencerSnapshot),
    Loop,
    EndOfSequence,
    TrackStateChanged { track: usize },
    Transport { change: TransportChange },
    Conductor(ConductorChange),
    DataFault { track: usize, skipped: usize, at: u64 },
}

impl From<DataFault> for Notification {
    fn from(fault: DataFault) -> Self {
        Self::DataFault {
            track: fault.track,
            skipped: fault.skipped,
            at: fault.at,
        }
    }
}

pub trait Notifier: Send {
    fn notify(&mut self, notification: Notification);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _notification: Notification) {}
}

/// Forwards notifications to a channel for delivery on another thread.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: Sender<Notification>,
}

impl ChannelNotifier {
    #[must_use]
    pub fn new() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&mut self, notification: Notification) {
        // a dropped receiver just means nobody is listening
        let _ = self.sender.send(notification);
    }
}

/// Renders notifications as log events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&mut self, notification: Notification) {
        match notification {
            Notification::PositionChanged(snapshot) => debug!(
                clock = snapshot.clock,
                measure = snapshot.measure,
                beat = snapshot.beat,
                time_ms = snapshot.time_ms,
                "position"
            ),
            Notification::Loop => info!("repeat loop wrapped"),
            Notification::EndOfSequence => info!("end of sequence"),
            Notification::TrackStateChanged { track } => debug!(track, "track state changed"),
            Notification::Transport { change } => info!(?change, "transport"),
            Notification::Conductor(change) => debug!(?change, "conductor"),
            Notification::DataFault { track, skipped, at } => {
                warn!(track, skipped, at, "data fault");
            }
        }
    }
}
