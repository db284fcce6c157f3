use std::fmt;

use midly::{
    MidiMessage,
    num::{u4, u7},
};

use crate::event::Event;

/// One transform stage. Returning `None` drops the event.
pub trait Processor: Send {
    fn process(&mut self, event: Event) -> Option<Event>;

    /// Handles an event re-sent to restore remembered state after a seek,
    /// a resume or an unmute. Stages that suppress repeats must record it
    /// and pass it on.
    fn resend(&mut self, event: Event) -> Option<Event> {
        self.process(event)
    }

    /// Clears state accumulated during a playback session.
    fn reset(&mut self) {}

    /// Stages whose output depends on events seen earlier. Seeking replays
    /// skipped events through pipelines containing one.
    fn is_stateful(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Ordered chain of stages applied to every event of one track.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Processor>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl Processor + 'static) -> Self {
        self.push(stage);
        self
    }

    pub fn push(&mut self, stage: impl Processor + 'static) {
        self.stages.push(Box::new(stage));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Runs `event` through every stage, stopping at the first drop.
    pub fn process(&mut self, event: Event) -> Option<Event> {
        self.stages
            .iter_mut()
            .try_fold(event, |event, stage| stage.process(event))
    }

    /// Like [`Pipeline::process`], for chased state.
    pub fn resend(&mut self, event: Event) -> Option<Event> {
        self.stages
            .iter_mut()
            .try_fold(event, |event, stage| stage.resend(event))
    }

    pub fn reset(&mut self) {
        for stage in &mut self.stages {
            stage.reset();
        }
    }

    #[must_use]
    pub fn is_stateful(&self) -> bool {
        self.stages.iter().any(|stage| stage.is_stateful())
    }
}

fn with_key(message: MidiMessage, key: u7) -> MidiMessage {
    match message {
        MidiMessage::NoteOn { vel, .. } => MidiMessage::NoteOn { key, vel },
        MidiMessage::NoteOff { vel, .. } => MidiMessage::NoteOff { key, vel },
        MidiMessage::Aftertouch { vel, .. } => MidiMessage::Aftertouch { key, vel },
        other => other,
    }
}

fn key_of(message: &MidiMessage) -> Option<u7> {
    match message {
        MidiMessage::NoteOn { key, .. }
        | MidiMessage::NoteOff { key, .. }
        | MidiMessage::Aftertouch { key, .. } => Some(*key),
        _ => None,
    }
}

/// Shifts note numbers by a per-channel amount of semitones. Notes pushed out
/// of 0..=127 are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transposer {
    semitones: [i8; 16],
}

impl Transposer {
    #[must_use]
    pub fn new(semitones: i8) -> Self {
        Self {
            semitones: [semitones; 16],
        }
    }

    pub fn set_channel(&mut self, channel: u8, semitones: i8) {
        if let Some(slot) = self.semitones.get_mut(usize::from(channel)) {
            *slot = semitones;
        }
    }
}

impl Processor for Transposer {
    fn process(&mut self, event: Event) -> Option<Event> {
        let Event::Channel { channel, message } = event else {
            return Some(event);
        };
        let Some(key) = key_of(&message) else {
            return Some(Event::Channel { channel, message });
        };
        let amount = self.semitones[usize::from(channel.as_int())];
        let shifted = i16::from(key.as_int()) + i16::from(amount);
        let key = u8::try_from(shifted).ok().filter(|key| *key <= 127)?;
        Some(Event::Channel {
            channel,
            message: with_key(message, u7::from(key)),
        })
    }

    fn name(&self) -> &'static str {
        "transpose"
    }
}

/// Routes each source channel to another channel, or drops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rechannelizer {
    routes: [Option<u8>; 16],
}

impl Default for Rechannelizer {
    fn default() -> Self {
        let mut routes = [None; 16];
        for (channel, route) in (0u8..).zip(routes.iter_mut()) {
            *route = Some(channel);
        }
        Self { routes }
    }
}

impl Rechannelizer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel goes to `target`.
    #[must_use]
    pub fn all_to(target: u8) -> Self {
        Self {
            routes: [Some(target.min(15)); 16],
        }
    }

    pub fn route(&mut self, from: u8, to: Option<u8>) {
        if let Some(slot) = self.routes.get_mut(usize::from(from)) {
            *slot = to.map(|channel| channel.min(15));
        }
    }
}

impl Processor for Rechannelizer {
    fn process(&mut self, event: Event) -> Option<Event> {
        match event {
            Event::Channel { channel, message } => {
                let target = self.routes[usize::from(channel.as_int())]?;
                Some(Event::Channel {
                    channel: u4::from(target),
                    message,
                })
            }
            other => Some(other),
        }
    }

    fn name(&self) -> &'static str {
        "rechannelize"
    }
}

/// Scales Note On velocities by a percentage, keeping them in 1..=127.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VelocityScaler {
    percent: u16,
}

impl VelocityScaler {
    #[must_use]
    pub fn new(percent: u16) -> Self {
        Self { percent }
    }
}

impl Processor for VelocityScaler {
    fn process(&mut self, event: Event) -> Option<Event> {
        match event {
            Event::Channel {
                channel,
                message: MidiMessage::NoteOn { key, vel },
            } if vel.as_int() > 0 => {
                let scaled = (u32::from(vel.as_int()) * u32::from(self.percent) / 100).clamp(1, 127);
                Some(Event::Channel {
                    channel,
                    message: MidiMessage::NoteOn {
                        key,
                        vel: u7::from(u8::try_from(scaled).unwrap_or(127)),
                    },
                })
            }
            other => Some(other),
        }
    }

    fn name(&self) -> &'static str {
        "velocity-scale"
    }
}

/// Drops channel messages on channels that are not enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelFilter {
    enabled: [bool; 16],
}

impl ChannelFilter {
    #[must_use]
    pub fn only(channels: &[u8]) -> Self {
        let mut enabled = [false; 16];
        for channel in channels {
            if let Some(slot) = enabled.get_mut(usize::from(*channel)) {
                *slot = true;
            }
        }
        Self { enabled }
    }
}

impl Processor for ChannelFilter {
    fn process(&mut self, event: Event) -> Option<Event> {
        match event.channel() {
            Some(channel) if !self.enabled[usize::from(channel)] => None,
            _ => Some(event),
        }
    }

    fn name(&self) -> &'static str {
        "channel-filter"
    }
}

/// Drops every event matching a predicate.
pub struct DropWhere<F> {
    predicate: F,
}

impl<F> DropWhere<F>
where
    F: FnMut(&Event) -> bool + Send,
{
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<F> Processor for DropWhere<F>
where
    F: FnMut(&Event) -> bool + Send,
{
    fn process(&mut self, event: Event) -> Option<Event> {
        if (self.predicate)(&event) {
            None
        } else {
            Some(event)
        }
    }

    fn name(&self) -> &'static str {
        "drop-where"
    }
}

/// Drops everything; a stage equivalent of muting the track.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropAll;

impl Processor for DropAll {
    fn process(&mut self, _event: Event) -> Option<Event> {
        None
    }

    fn name(&self) -> &'static str {
        "drop-all"
    }
}

/// Drops a program change that repeats the program already sent on its
/// channel during this session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramDeduplicator {
    current: [Option<u8>; 16],
}

impl ProgramDeduplicator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current(&self, channel: u8) -> Option<u8> {
        self.current.get(usize::from(channel)).copied().flatten()
    }
}

impl Processor for ProgramDeduplicator {
    fn process(&mut self, event: Event) -> Option<Event> {
        if let Event::Channel {
            channel,
            message: MidiMessage::ProgramChange { program },
        } = &event
        {
            let slot = &mut self.current[usize::from(channel.as_int())];
            if *slot == Some(program.as_int()) {
                return None;
            }
            *slot = Some(program.as_int());
        }
        Some(event)
    }

    fn resend(&mut self, event: Event) -> Option<Event> {
        if let Event::Channel {
            channel,
            message: MidiMessage::ProgramChange { program },
        } = &event
        {
            self.current[usize::from(channel.as_int())] = Some(program.as_int());
        }
        Some(event)
    }

    fn reset(&mut self) {
        self.current = [None; 16];
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "program-dedup"
    }
}
