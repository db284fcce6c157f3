use std::sync::{
    Arc,
    mpsc::{Receiver, Sender, channel},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{event::TimedEvent, track::PortId};

/// Receiver of dispatched events (the output driver). Fire-and-forget: it is
/// called from the tick path and must not block.
pub trait EventSink: Send {
    fn dispatch(&mut self, port: PortId, event: &TimedEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn dispatch(&mut self, _port: PortId, _event: &TimedEvent) {}
}

/// Logs every dispatched event at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn dispatch(&mut self, port: PortId, event: &TimedEvent) {
        trace!(port = port.0, time = event.time, event = ?event.event, "dispatch");
    }
}

/// Hands events to another thread, e.g. a driver that owns the real port.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<(PortId, TimedEvent)>,
}

impl ChannelSink {
    #[must_use]
    pub fn new() -> (Self, Receiver<(PortId, TimedEvent)>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn dispatch(&mut self, port: PortId, event: &TimedEvent) {
        let _ = self.sender.send((port, event.clone()));
    }
}

/// Keeps every dispatched event in a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<(PortId, TimedEvent)>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(PortId, TimedEvent)> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn dispatch(&mut self, port: PortId, event: &TimedEvent) {
        self.events.lock().push((port, event.clone()));
    }
}
