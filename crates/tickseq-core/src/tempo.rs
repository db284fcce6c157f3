use serde::{Deserialize, Serialize};

use crate::{
    event::{DEFAULT_TEMPO_BPM, DEFAULT_TIMESIG_DENOMINATOR, DEFAULT_TIMESIG_NUMERATOR, Tick},
    multitrack::MultiTrack,
};

/// Absorbs float error when converting a millisecond position back to ticks.
const TICK_EPSILON: f64 = 1e-6;

#[must_use]
pub fn ms_per_tick(bpm: f64, ticks_per_beat: u16) -> f64 {
    if bpm <= 0.0 || ticks_per_beat == 0 {
        return 0.0;
    }
    60_000.0 / (bpm * f64::from(ticks_per_beat))
}

#[must_use]
pub fn ticks_to_ms_at(ticks: Tick, bpm: f64, ticks_per_beat: u16) -> f64 {
    ticks as f64 * ms_per_tick(bpm, ticks_per_beat)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TempoSegment {
    pub tick: Tick,
    /// Unscaled milliseconds from the origin to `tick`.
    pub ms: f64,
    pub bpm: f64,
}

/// Piecewise-constant tempo integrated from the conductor track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempoMap {
    ticks_per_beat: u16,
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    #[must_use]
    pub fn constant(bpm: f64, ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat: ticks_per_beat.max(1),
            segments: vec![TempoSegment {
                tick: 0,
                ms: 0.0,
                bpm,
            }],
        }
    }

    /// Reads tempo changes from track 0, ignoring its time shift. Several
    /// changes at one tick keep the last; changes going back in time are
    /// ignored.
    #[must_use]
    pub fn from_multitrack(multitrack: &MultiTrack) -> Self {
        let mut map = Self::constant(DEFAULT_TEMPO_BPM, multitrack.ticks_per_beat());
        let Some(conductor) = multitrack.conductor() else {
            return map;
        };
        for timed in conductor.events() {
            if let Some(bpm) = timed.event.tempo_bpm() {
                map.push_change(timed.time, bpm);
            }
        }
        map
    }

    fn push_change(&mut self, tick: Tick, bpm: f64) {
        let last = *self.segments.last().unwrap_or(&TempoSegment {
            tick: 0,
            ms: 0.0,
            bpm: DEFAULT_TEMPO_BPM,
        });
        if tick < last.tick {
            return;
        }
        if tick == last.tick {
            if let Some(segment) = self.segments.last_mut() {
                segment.bpm = bpm;
            }
            return;
        }
        let ms = last.ms + (tick - last.tick) as f64 * ms_per_tick(last.bpm, self.ticks_per_beat);
        self.segments.push(TempoSegment { tick, ms, bpm });
    }

    #[must_use]
    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    #[must_use]
    pub fn segments(&self) -> &[TempoSegment] {
        &self.segments
    }

    fn segment_at_tick(&self, tick: Tick) -> &TempoSegment {
        let index = self
            .segments
            .partition_point(|segment| segment.tick <= tick)
            .saturating_sub(1);
        &self.segments[index]
    }

    fn segment_at_ms(&self, ms: f64) -> &TempoSegment {
        let index = self
            .segments
            .partition_point(|segment| segment.ms <= ms)
            .saturating_sub(1);
        &self.segments[index]
    }

    /// Tempo in effect at `tick`.
    #[must_use]
    pub fn tempo_at(&self, tick: Tick) -> f64 {
        self.segment_at_tick(tick).bpm
    }

    /// Unscaled milliseconds from the origin to `tick`.
    #[must_use]
    pub fn ticks_to_ms(&self, tick: Tick) -> f64 {
        let segment = self.segment_at_tick(tick);
        segment.ms + (tick - segment.tick) as f64 * ms_per_tick(segment.bpm, self.ticks_per_beat)
    }

    /// Fractional tick position reached after `ms` unscaled milliseconds.
    #[must_use]
    pub fn ms_to_ticks_exact(&self, ms: f64) -> f64 {
        let ms = ms.max(0.0);
        let segment = self.segment_at_ms(ms);
        let per_tick = ms_per_tick(segment.bpm, self.ticks_per_beat);
        if per_tick <= 0.0 {
            return segment.tick as f64;
        }
        segment.tick as f64 + (ms - segment.ms) / per_tick
    }

    /// Last whole tick reached after `ms` unscaled milliseconds.
    #[must_use]
    pub fn ms_to_ticks(&self, ms: f64) -> Tick {
        (self.ms_to_ticks_exact(ms) + TICK_EPSILON).floor() as Tick
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSegment {
    pub tick: Tick,
    /// Index of the measure that starts at `tick`.
    pub measure: u32,
    pub numerator: u8,
    pub denominator: u8,
}

/// Measure, beat and offset within the beat, all zero-based.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MusicalPosition {
    pub measure: u32,
    pub beat: u32,
    pub beat_offset: Tick,
    pub beat_ticks: Tick,
}

impl MusicalPosition {
    /// Position within the current beat, in `0.0..1.0`.
    #[must_use]
    pub fn beat_fraction(&self) -> f64 {
        if self.beat_ticks == 0 {
            return 0.0;
        }
        self.beat_offset as f64 / self.beat_ticks as f64
    }
}

/// Time signature history of the conductor track. A signature change always
/// starts a new measure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterMap {
    ticks_per_beat: u16,
    segments: Vec<MeterSegment>,
}

impl MeterMap {
    #[must_use]
    pub fn constant(numerator: u8, denominator: u8, ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat: ticks_per_beat.max(1),
            segments: vec![MeterSegment {
                tick: 0,
                measure: 0,
                numerator: numerator.max(1),
                denominator: denominator.max(1),
            }],
        }
    }

    #[must_use]
    pub fn from_multitrack(multitrack: &MultiTrack) -> Self {
        let mut map = Self::constant(
            DEFAULT_TIMESIG_NUMERATOR,
            DEFAULT_TIMESIG_DENOMINATOR,
            multitrack.ticks_per_beat(),
        );
        let Some(conductor) = multitrack.conductor() else {
            return map;
        };
        for timed in conductor.events() {
            if let Some((numerator, denominator)) = timed.event.time_signature_parts() {
                map.push_change(timed.time, numerator.max(1), denominator.max(1));
            }
        }
        map
    }

    fn push_change(&mut self, tick: Tick, numerator: u8, denominator: u8) {
        let Some(last) = self.segments.last().copied() else {
            return;
        };
        if tick < last.tick {
            return;
        }
        if tick == last.tick {
            if let Some(segment) = self.segments.last_mut() {
                segment.numerator = numerator;
                segment.denominator = denominator;
            }
            return;
        }
        let measure_ticks = self.measure_ticks(&last);
        let elapsed = tick - last.tick;
        let measures = elapsed.div_ceil(measure_ticks);
        self.segments.push(MeterSegment {
            tick,
            measure: last.measure.saturating_add(u32::try_from(measures).unwrap_or(u32::MAX)),
            numerator,
            denominator,
        });
    }

    #[must_use]
    pub fn segments(&self) -> &[MeterSegment] {
        &self.segments
    }

    #[must_use]
    pub fn beat_ticks(&self, segment: &MeterSegment) -> Tick {
        (u64::from(self.ticks_per_beat) * 4 / u64::from(segment.denominator.max(1))).max(1)
    }

    #[must_use]
    pub fn measure_ticks(&self, segment: &MeterSegment) -> Tick {
        self.beat_ticks(segment) * u64::from(segment.numerator.max(1))
    }

    fn segment_at_tick(&self, tick: Tick) -> &MeterSegment {
        let index = self
            .segments
            .partition_point(|segment| segment.tick <= tick)
            .saturating_sub(1);
        &self.segments[index]
    }

    /// `(numerator, denominator)` in effect at `tick`.
    #[must_use]
    pub fn signature_at(&self, tick: Tick) -> (u8, u8) {
        let segment = self.segment_at_tick(tick);
        (segment.numerator, segment.denominator)
    }

    #[must_use]
    pub fn position(&self, tick: Tick) -> MusicalPosition {
        let segment = self.segment_at_tick(tick);
        let beat_ticks = self.beat_ticks(segment);
        let measure_ticks = self.measure_ticks(segment);
        let elapsed = tick - segment.tick;
        let within = elapsed % measure_ticks;
        MusicalPosition {
            measure: segment
                .measure
                .saturating_add(u32::try_from(elapsed / measure_ticks).unwrap_or(u32::MAX)),
            beat: u32::try_from(within / beat_ticks).unwrap_or(u32::MAX),
            beat_offset: within % beat_ticks,
            beat_ticks,
        }
    }

    /// Tick at which `beat` of `measure` starts.
    #[must_use]
    pub fn measure_to_ticks(&self, measure: u32, beat: u32) -> Tick {
        let index = self
            .segments
            .partition_point(|segment| segment.measure <= measure)
            .saturating_sub(1);
        let segment = &self.segments[index];
        segment.tick
            + u64::from(measure - segment.measure) * self.measure_ticks(segment)
            + u64::from(beat) * self.beat_ticks(segment)
    }
}
