use std::collections::BTreeMap;

use midly::MidiMessage;
use serde::{Deserialize, Serialize};

use crate::{
    event::{
        CONTROLLER_STATE_LIMIT, DEFAULT_TEMPO_BPM, DEFAULT_TIMESIG_DENOMINATOR,
        DEFAULT_TIMESIG_NUMERATOR, Event, MetaEvent, Tick,
    },
    tempo::MusicalPosition,
    track::PortId,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayStatus {
    #[default]
    Stopped,
    Playing,
}

/// Dispatched notes still sounding, counted per (port, channel, key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMatrix {
    counts: BTreeMap<(PortId, u8, u8), u16>,
}

impl NoteMatrix {
    pub fn note_on(&mut self, port: PortId, channel: u8, key: u8) {
        let count = self.counts.entry((port, channel, key)).or_default();
        *count = count.saturating_add(1);
    }

    pub fn note_off(&mut self, port: PortId, channel: u8, key: u8) {
        if let Some(count) = self.counts.get_mut(&(port, channel, key)) {
            *count -= 1;
            if *count == 0 {
                self.counts.remove(&(port, channel, key));
            }
        }
    }

    /// Records a dispatched event; returns true if the any-notes-on flag flipped.
    pub fn record(&mut self, port: PortId, event: &Event) -> bool {
        let Event::Channel { channel, message } = event else {
            return false;
        };
        let before = self.any_on();
        match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                self.note_on(port, channel.as_int(), key.as_int());
            }
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                self.note_off(port, channel.as_int(), key.as_int());
            }
            _ => return false,
        }
        before != self.any_on()
    }

    #[must_use]
    pub fn any_on(&self) -> bool {
        !self.counts.is_empty()
    }

    #[must_use]
    pub fn count(&self, port: PortId, channel: u8, key: u8) -> u16 {
        self.counts.get(&(port, channel, key)).copied().unwrap_or(0)
    }

    /// Empties the matrix, returning one Note Off per sounding note instance.
    pub fn drain_release(&mut self) -> Vec<(PortId, Event)> {
        let counts = std::mem::take(&mut self.counts);
        counts
            .into_iter()
            .flat_map(|((port, channel, key), count)| {
                (0..count).map(move |_| (port, Event::note_off(channel, key)))
            })
            .collect()
    }
}

/// What a listener must know about one track to resume it mid-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackState {
    /// Channel of the last channel message seen.
    pub channel: Option<u8>,
    pub program: Option<u8>,
    /// Centered on zero; `None` until a bend is seen.
    pub bend: Option<i16>,
    pub controllers: [Option<u8>; CONTROLLER_STATE_LIMIT as usize],
    pub name: String,
    got_name: bool,
    pub notes: NoteMatrix,
}

impl Default for TrackState {
    fn default() -> Self {
        Self {
            channel: None,
            program: None,
            bend: None,
            controllers: [None; CONTROLLER_STATE_LIMIT as usize],
            name: String::new(),
            got_name: false,
            notes: NoteMatrix::default(),
        }
    }
}

impl TrackState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Updates remembered state from a merged event. Notes are not tracked
    /// here; see [`NoteMatrix::record`]. Returns true if a notified field changed.
    pub fn apply(&mut self, time: Tick, event: &Event) -> bool {
        match event {
            Event::Channel { channel, message } => {
                self.channel = Some(channel.as_int());
                match message {
                    MidiMessage::ProgramChange { program } => {
                        let changed = self.program != Some(program.as_int());
                        self.program = Some(program.as_int());
                        changed
                    }
                    MidiMessage::Controller { controller, value }
                        if controller.as_int() < CONTROLLER_STATE_LIMIT =>
                    {
                        let slot = &mut self.controllers[usize::from(controller.as_int())];
                        let changed = *slot != Some(value.as_int());
                        *slot = Some(value.as_int());
                        changed
                    }
                    MidiMessage::PitchBend { bend } => {
                        self.bend = Some(bend.as_int());
                        false
                    }
                    _ => false,
                }
            }
            Event::Meta(MetaEvent::TrackName(name) | MetaEvent::InstrumentName(name)) => {
                self.got_name = true;
                self.set_name(name)
            }
            Event::Meta(MetaEvent::Text(text)) if time == 0 && !self.got_name => {
                self.set_name(text)
            }
            Event::Meta(_) | Event::SysEx(_) => false,
        }
    }

    fn set_name(&mut self, name: &str) -> bool {
        if self.name == name {
            return false;
        }
        self.name = name.to_string();
        true
    }

    /// Program, pitch bend and controller messages that restore this state on
    /// the last used channel.
    #[must_use]
    pub fn chase_events(&self) -> Vec<Event> {
        let Some(channel) = self.channel else {
            return Vec::new();
        };
        let mut events = Vec::new();
        if let Some(program) = self.program {
            events.push(Event::program_change(channel, program));
        }
        if let Some(bend) = self.bend {
            events.push(Event::pitch_bend(channel, bend));
        }
        for (controller, value) in (0u8..).zip(self.controllers.iter()) {
            if let Some(value) = value {
                events.push(Event::control_change(channel, controller, *value));
            }
        }
        events
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConductorChange {
    Tempo(f64),
    TimeSignature { numerator: u8, denominator: u8 },
    KeySignature { sharps: i8, minor: bool },
    Marker(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorState {
    pub tempo_bpm: f64,
    pub numerator: u8,
    pub denominator: u8,
    pub key_sharps: i8,
    pub key_minor: bool,
    pub marker: Option<String>,
}

impl Default for ConductorState {
    fn default() -> Self {
        Self {
            tempo_bpm: DEFAULT_TEMPO_BPM,
            numerator: DEFAULT_TIMESIG_NUMERATOR,
            denominator: DEFAULT_TIMESIG_DENOMINATOR,
            key_sharps: 0,
            key_minor: false,
            marker: None,
        }
    }
}

impl ConductorState {
    pub fn apply(&mut self, event: &Event) -> Option<ConductorChange> {
        let Event::Meta(meta) = event else {
            return None;
        };
        match meta {
            MetaEvent::Tempo { .. } => {
                let bpm = event.tempo_bpm()?;
                self.tempo_bpm = bpm;
                Some(ConductorChange::Tempo(bpm))
            }
            MetaEvent::TimeSignature {
                numerator,
                denominator,
                ..
            } => {
                self.numerator = *numerator;
                self.denominator = *denominator;
                Some(ConductorChange::TimeSignature {
                    numerator: *numerator,
                    denominator: *denominator,
                })
            }
            MetaEvent::KeySignature { sharps, minor } => {
                self.key_sharps = *sharps;
                self.key_minor = *minor;
                Some(ConductorChange::KeySignature {
                    sharps: *sharps,
                    minor: *minor,
                })
            }
            MetaEvent::Marker(text) => {
                self.marker = Some(text.clone());
                Some(ConductorChange::Marker(text.clone()))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackControls {
    pub mute: bool,
    pub solo: bool,
}

/// Repeat range `[start, end)` in ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatLoop {
    pub enabled: bool,
    pub start: Tick,
    pub end: Tick,
}

/// Copy of the position and conductor fields handed to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerSnapshot {
    pub status: PlayStatus,
    pub clock: Tick,
    pub time_ms: f64,
    pub measure: u32,
    pub beat: u32,
    pub beat_offset: Tick,
    pub beat_fraction: f64,
    pub tempo_bpm: f64,
    pub tempo_scale: f64,
    pub scaled_tempo_bpm: f64,
    pub conductor: ConductorState,
    pub repeat: RepeatLoop,
}

/// Live playback state owned by the sequencer.
#[derive(Debug, Clone)]
pub struct SequencerState {
    pub status: PlayStatus,
    pub clock: Tick,
    /// Unscaled milliseconds from the origin to `clock`.
    pub time_ms: f64,
    pub position: MusicalPosition,
    pub tempo_scale: f64,
    pub conductor: ConductorState,
    pub tracks: Vec<TrackState>,
    pub controls: Vec<TrackControls>,
    pub repeat: RepeatLoop,
}

impl SequencerState {
    #[must_use]
    pub fn new(num_tracks: usize) -> Self {
        Self {
            status: PlayStatus::Stopped,
            clock: 0,
            time_ms: 0.0,
            position: MusicalPosition::default(),
            tempo_scale: 1.0,
            conductor: ConductorState::default(),
            tracks: vec![TrackState::default(); num_tracks],
            controls: vec![TrackControls::default(); num_tracks],
            repeat: RepeatLoop::default(),
        }
    }

    /// Clears position, conductor and per-track remembered state. Controls,
    /// tempo scale and the repeat range survive.
    pub fn reset_position(&mut self) {
        self.clock = 0;
        self.time_ms = 0.0;
        self.position = MusicalPosition::default();
        self.conductor = ConductorState::default();
        for track in &mut self.tracks {
            track.reset();
        }
    }

    #[must_use]
    pub fn any_solo(&self) -> bool {
        self.controls.iter().any(|controls| controls.solo)
    }

    /// True unless the track is muted, or another track is soloed and this one is not.
    #[must_use]
    pub fn is_audible(&self, track: usize) -> bool {
        let Some(controls) = self.controls.get(track) else {
            return false;
        };
        !controls.mute && (controls.solo || !self.any_solo())
    }

    #[must_use]
    pub fn snapshot(&self) -> SequencerSnapshot {
        SequencerSnapshot {
            status: self.status,
            clock: self.clock,
            time_ms: self.time_ms,
            measure: self.position.measure,
            beat: self.position.beat,
            beat_offset: self.position.beat_offset,
            beat_fraction: self.position.beat_fraction(),
            tempo_bpm: self.conductor.tempo_bpm,
            tempo_scale: self.tempo_scale,
            scaled_tempo_bpm: self.conductor.tempo_bpm * self.tempo_scale,
            conductor: self.conductor.clone(),
            repeat: self.repeat,
        }
    }
}
