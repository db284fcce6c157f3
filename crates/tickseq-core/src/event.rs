use midly::{
    MidiMessage, PitchBend,
    num::{u4, u7},
};

/// Absolute time in MIDI clock ticks since the track origin.
pub type Tick = u64;

pub const DEFAULT_TEMPO_BPM: f64 = 120.0;
pub const DEFAULT_MICROS_PER_BEAT: u32 = 500_000;
pub const DEFAULT_TIMESIG_NUMERATOR: u8 = 4;
pub const DEFAULT_TIMESIG_DENOMINATOR: u8 = 4;

/// Controllers at or above this number are channel-mode messages and are not
/// remembered as controller state.
pub const CONTROLLER_STATE_LIMIT: u8 = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaEvent {
    Tempo {
        micros_per_beat: u32,
    },
    TimeSignature {
        numerator: u8,
        /// Real denominator (4, 8, ...), not the power-of-two exponent stored in files.
        denominator: u8,
        clocks_per_click: u8,
        thirty_seconds_per_quarter: u8,
    },
    KeySignature {
        sharps: i8,
        minor: bool,
    },
    Marker(String),
    TrackName(String),
    InstrumentName(String),
    Text(String),
    EndOfTrack,
    Other {
        kind: u8,
        data: Vec<u8>,
    },
}

impl MetaEvent {
    #[must_use]
    pub fn tempo_bpm(bpm: f64) -> Self {
        let bpm = if bpm > 0.0 { bpm } else { DEFAULT_TEMPO_BPM };
        Self::Tempo {
            micros_per_beat: (60_000_000.0 / bpm).round() as u32,
        }
    }

    #[must_use]
    pub fn time_signature(numerator: u8, denominator: u8) -> Self {
        Self::TimeSignature {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
            clocks_per_click: 24,
            thirty_seconds_per_quarter: 8,
        }
    }
}

/// A musical message without time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Channel { channel: u4, message: MidiMessage },
    Meta(MetaEvent),
    SysEx(Vec<u8>),
}

impl Event {
    #[must_use]
    pub fn note_on(channel: u8, key: u8, velocity: u8) -> Self {
        Self::Channel {
            channel: u4::from(channel.min(15)),
            message: MidiMessage::NoteOn {
                key: u7::from(key.min(127)),
                vel: u7::from(velocity.min(127)),
            },
        }
    }

    #[must_use]
    pub fn note_off(channel: u8, key: u8) -> Self {
        Self::Channel {
            channel: u4::from(channel.min(15)),
            message: MidiMessage::NoteOff {
                key: u7::from(key.min(127)),
                vel: u7::from(0),
            },
        }
    }

    #[must_use]
    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::Channel {
            channel: u4::from(channel.min(15)),
            message: MidiMessage::ProgramChange {
                program: u7::from(program.min(127)),
            },
        }
    }

    #[must_use]
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::Channel {
            channel: u4::from(channel.min(15)),
            message: MidiMessage::Controller {
                controller: u7::from(controller.min(127)),
                value: u7::from(value.min(127)),
            },
        }
    }

    /// `bend` is centered on zero, in -8192..=8191.
    #[must_use]
    pub fn pitch_bend(channel: u8, bend: i16) -> Self {
        Self::Channel {
            channel: u4::from(channel.min(15)),
            message: MidiMessage::PitchBend {
                bend: PitchBend::from_int(bend.clamp(-8192, 8191)),
            },
        }
    }

    #[must_use]
    pub fn tempo(bpm: f64) -> Self {
        Self::Meta(MetaEvent::tempo_bpm(bpm))
    }

    #[must_use]
    pub fn time_signature(numerator: u8, denominator: u8) -> Self {
        Self::Meta(MetaEvent::time_signature(numerator, denominator))
    }

    #[must_use]
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::Channel { channel, .. } => Some(channel.as_int()),
            Self::Meta(_) | Self::SysEx(_) => None,
        }
    }

    #[must_use]
    pub fn is_meta(&self) -> bool {
        matches!(self, Self::Meta(_))
    }

    #[must_use]
    pub fn is_note(&self) -> bool {
        matches!(
            self,
            Self::Channel {
                message: MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. },
                ..
            }
        )
    }

    /// True for a Note On with non-zero velocity.
    #[must_use]
    pub fn is_note_on(&self) -> bool {
        matches!(
            self,
            Self::Channel {
                message: MidiMessage::NoteOn { vel, .. },
                ..
            } if vel.as_int() > 0
        )
    }

    /// True for a Note Off, or a Note On with zero velocity.
    #[must_use]
    pub fn is_note_off(&self) -> bool {
        self.is_note() && !self.is_note_on()
    }

    /// Events that carry state a listener must have seen to resume mid-track:
    /// everything but notes.
    #[must_use]
    pub fn is_replay_eligible(&self) -> bool {
        !self.is_note()
    }

    /// Tempo in BPM if this is a tempo meta event.
    #[must_use]
    pub fn tempo_bpm(&self) -> Option<f64> {
        match self {
            Self::Meta(MetaEvent::Tempo { micros_per_beat }) if *micros_per_beat > 0 => {
                Some(60_000_000.0 / f64::from(*micros_per_beat))
            }
            _ => None,
        }
    }

    /// `(numerator, denominator)` if this is a time signature meta event.
    #[must_use]
    pub fn time_signature_parts(&self) -> Option<(u8, u8)> {
        match self {
            Self::Meta(MetaEvent::TimeSignature {
                numerator,
                denominator,
                ..
            }) => Some((*numerator, *denominator)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedEvent {
    pub time: Tick,
    pub event: Event,
}

impl TimedEvent {
    #[must_use]
    pub fn new(time: Tick, event: Event) -> Self {
        Self { time, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_velocity_note_on_counts_as_note_off() {
        let event = Event::note_on(0, 60, 0);
        assert!(event.is_note());
        assert!(!event.is_note_on());
        assert!(event.is_note_off());
        assert!(!event.is_replay_eligible());
    }

    #[test]
    fn tempo_meta_round_trips_bpm() {
        let event = Event::tempo(120.0);
        assert_eq!(event.tempo_bpm(), Some(120.0));
        assert!(event.is_replay_eligible());
    }

    #[test]
    fn constructors_clamp_out_of_range_values() {
        let event = Event::control_change(20, 200, 255);
        assert_eq!(event.channel(), Some(15));
        assert_eq!(event, Event::control_change(15, 127, 127));
    }
}
