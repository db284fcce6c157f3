use std::{ops::ControlFlow, sync::Arc};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    config::SequencerConfig,
    event::{Event, Tick, TimedEvent},
    merge::MergeCursor,
    multitrack::MultiTrack,
    notifier::{Notification, Notifier, TransportChange},
    processor::Pipeline,
    sink::EventSink,
    state::{
        PlayStatus, RepeatLoop, SequencerSnapshot, SequencerState, TrackControls, TrackState,
    },
    tempo::{MeterMap, TempoMap},
    tick::{TickCallback, TickDriver, TickError},
    track::{EditError, PortId},
};

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error("tempo scale must be positive and finite, got {0}")]
    InvalidTempoScale(f64),
    #[error("invalid repeat range: start {start} must precede end {end}")]
    InvalidLoopRange { start: Tick, end: Tick },
    #[error("seek target {target} is past the end of the sequence at {end}")]
    SeekOutOfRange { target: Tick, end: Tick },
    #[error("structural edits require the sequencer to be stopped")]
    NotStopped,
    #[error("tick driver error: {0}")]
    Driver(#[from] TickError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Structural,
    Config,
    State,
    Driver,
}

impl SequencerError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Edit(_) => ErrorClass::Structural,
            Self::InvalidTempoScale(_)
            | Self::InvalidLoopRange { .. }
            | Self::SeekOutOfRange { .. } => ErrorClass::Config,
            Self::NotStopped => ErrorClass::State,
            Self::Driver(_) => ErrorClass::Driver,
        }
    }
}

/// Everything the tick path touches. Guarded by one mutex shared between the
/// tick context and control calls.
struct Core {
    multitrack: MultiTrack,
    tempo: TempoMap,
    meter: MeterMap,
    cursor: MergeCursor,
    state: SequencerState,
    pipelines: Vec<Option<Pipeline>>,
    sink: Box<dyn EventSink>,
    notifier: Box<dyn Notifier>,
    config: SequencerConfig,
    /// Driver time of the previous tick; `None` until the first tick after start.
    last_real_ms: Option<u64>,
    /// Unscaled score position reached by playback.
    score_ms: f64,
    /// True once the events at `state.clock` have been dispatched.
    clock_dispatched: bool,
}

impl Core {
    fn new(
        multitrack: MultiTrack,
        sink: Box<dyn EventSink>,
        notifier: Box<dyn Notifier>,
        config: SequencerConfig,
    ) -> Self {
        let num_tracks = multitrack.num_tracks();
        Self {
            tempo: TempoMap::from_multitrack(&multitrack),
            meter: MeterMap::from_multitrack(&multitrack),
            cursor: MergeCursor::new(&multitrack),
            state: SequencerState::new(num_tracks),
            pipelines: std::iter::repeat_with(|| None).take(num_tracks).collect(),
            multitrack,
            sink,
            notifier,
            config,
            last_real_ms: None,
            score_ms: 0.0,
            clock_dispatched: false,
        }
    }

    fn is_playing(&self) -> bool {
        self.state.status == PlayStatus::Playing
    }

    fn port_of(&self, track: usize) -> PortId {
        self.multitrack
            .tracks()
            .get(track)
            .and_then(crate::track::Track::out_port)
            .unwrap_or_else(|| self.config.default_port())
    }

    fn notify_position(&mut self) {
        let snapshot = self.state.snapshot();
        self.notifier.notify(Notification::PositionChanged(snapshot));
    }

    fn report_faults(&mut self) {
        let faults: Vec<_> = self.cursor.drain_faults().collect();
        for fault in faults {
            self.notifier.notify(fault.into());
        }
    }

    /// Ready to play: something left to merge, or a repeat range still ahead.
    fn can_play(&self) -> bool {
        if self.multitrack.is_empty() {
            return false;
        }
        let repeat = self.state.repeat;
        !self.cursor.is_exhausted() || (repeat.enabled && self.state.clock < repeat.end)
    }

    fn begin(&mut self) -> bool {
        if !self.can_play() {
            info!(clock = self.state.clock, "nothing left to play");
            return false;
        }
        self.state.status = PlayStatus::Playing;
        self.last_real_ms = None;
        self.score_ms = self.tempo.ticks_to_ms(self.state.clock);
        if self.config.chase_on_resume && self.state.clock > 0 {
            self.chase(None);
        }
        self.notifier.notify(Notification::Transport {
            change: TransportChange::Started,
        });
        true
    }

    /// Leaves Playing; returns true if it was playing.
    fn halt(&mut self) -> bool {
        let was_playing = self.is_playing();
        self.state.status = PlayStatus::Stopped;
        self.last_real_ms = None;
        if self.config.release_notes_on_stop {
            self.release_notes(None);
        }
        if was_playing {
            self.notifier.notify(Notification::Transport {
                change: TransportChange::Stopped,
            });
        }
        was_playing
    }

    fn on_tick(&mut self, real_ms: u64) -> ControlFlow<()> {
        if !self.is_playing() {
            return ControlFlow::Break(());
        }
        let elapsed = self
            .last_real_ms
            .map_or(0, |last| real_ms.saturating_sub(last));
        self.last_real_ms = Some(real_ms);
        self.score_ms += elapsed as f64 * self.state.tempo_scale;
        let now = self.tempo.ms_to_ticks(self.score_ms).max(self.state.clock);

        let repeat = self.state.repeat;
        let wraps = repeat.enabled && self.state.clock < repeat.end && now >= repeat.end;
        let limit = if wraps { repeat.end.saturating_sub(1) } else { now };

        if let Some(last) = self.dispatch_due(limit) {
            // capped: the remainder rolls over to the next tick
            self.state.clock = last;
            self.state.time_ms = self.tempo.ticks_to_ms(last);
            self.clock_dispatched = true;
            self.update_position();
            return ControlFlow::Continue(());
        }

        if wraps {
            self.wrap_loop(repeat.start, repeat.end);
            return ControlFlow::Continue(());
        }

        self.state.clock = now;
        self.state.time_ms = self.score_ms;
        self.clock_dispatched = true;
        self.update_position();

        if self.cursor.is_exhausted() && !(repeat.enabled && now < repeat.end) {
            self.finish();
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    /// Dispatches merged events up to `limit` inclusive. Returns the time of
    /// the last dispatched event if the per-tick cap cut the batch short.
    fn dispatch_due(&mut self, limit: Tick) -> Option<Tick> {
        let cap = self.config.max_events_per_tick.max(1);
        let mut count = 0usize;
        let mut last = None;
        while self.cursor.peek_time().is_some_and(|time| time <= limit) {
            if count == cap {
                trace!(count, limit, "event cap reached");
                self.report_faults();
                return last;
            }
            let Some(item) = self.cursor.advance(&self.multitrack) else {
                break;
            };
            let (track, time, event) = (item.track, item.time, item.event.event.clone());
            self.play_event(track, time, event);
            count += 1;
            last = Some(time);
        }
        if count > 0 {
            trace!(count, limit, "events dispatched");
        }
        self.report_faults();
        None
    }

    fn play_event(&mut self, track: usize, time: Tick, event: Event) {
        self.remember(track, time, &event, true);
        if event.is_meta() || !self.state.is_audible(track) {
            return;
        }
        if let Some(event) = self.run_pipeline(track, event) {
            self.send(track, time, event);
        }
    }

    /// Updates conductor and track state. Returns true if the track state
    /// changed in a notified field.
    fn remember(&mut self, track: usize, time: Tick, event: &Event, notify: bool) -> bool {
        if track == 0 {
            let change = self.state.conductor.apply(event);
            if let (Some(change), true) = (change, notify) {
                self.notifier.notify(Notification::Conductor(change));
            }
        }
        let changed = self
            .state
            .tracks
            .get_mut(track)
            .is_some_and(|state| state.apply(time, event));
        if changed && notify {
            self.notifier
                .notify(Notification::TrackStateChanged { track });
        }
        changed
    }

    fn run_pipeline(&mut self, track: usize, event: Event) -> Option<Event> {
        match self.pipelines.get_mut(track) {
            Some(Some(pipeline)) => pipeline.process(event),
            _ => Some(event),
        }
    }

    fn resend_pipeline(&mut self, track: usize, event: Event) -> Option<Event> {
        match self.pipelines.get_mut(track) {
            Some(Some(pipeline)) => pipeline.resend(event),
            _ => Some(event),
        }
    }

    fn send(&mut self, track: usize, time: Tick, event: Event) {
        let port = self.port_of(track);
        let flipped = self
            .state
            .tracks
            .get_mut(track)
            .is_some_and(|state| state.notes.record(port, &event));
        self.sink.dispatch(port, &TimedEvent::new(time, event));
        if flipped {
            self.notifier
                .notify(Notification::TrackStateChanged { track });
        }
    }

    fn update_position(&mut self) {
        let position = self.meter.position(self.state.clock);
        let moved = position.measure != self.state.position.measure
            || position.beat != self.state.position.beat;
        self.state.position = position;
        if moved {
            self.notify_position();
        }
    }

    fn finish(&mut self) {
        self.state.status = PlayStatus::Stopped;
        self.last_real_ms = None;
        if self.config.release_notes_on_stop {
            self.release_notes(None);
        }
        info!(clock = self.state.clock, "end of sequence");
        self.notifier.notify(Notification::EndOfSequence);
        self.notifier.notify(Notification::Transport {
            change: TransportChange::Stopped,
        });
    }

    fn wrap_loop(&mut self, start: Tick, end: Tick) {
        // everything before `end` is out; nothing at `end` is
        self.state.clock = end;
        self.clock_dispatched = false;
        self.seek_to(start);
        if self.config.chase_on_resume {
            self.chase(None);
        }
        debug!(start, "repeat loop wrapped");
        self.notifier.notify(Notification::Loop);
    }

    /// Sends a Note Off for every sounding note of `only` (or all tracks).
    fn release_notes(&mut self, only: Option<usize>) {
        let time = self.state.clock;
        for track in 0..self.state.tracks.len() {
            if only.is_some_and(|only| only != track) {
                continue;
            }
            let released = self.state.tracks[track].notes.drain_release();
            if released.is_empty() {
                continue;
            }
            for (port, event) in released {
                self.sink.dispatch(port, &TimedEvent::new(time, event));
            }
            self.notifier
                .notify(Notification::TrackStateChanged { track });
        }
    }

    /// Re-sends remembered program, bend and controllers of audible tracks.
    fn chase(&mut self, only: Option<usize>) {
        let time = self.state.clock;
        for track in 0..self.state.tracks.len() {
            if only.is_some_and(|only| only != track) || !self.state.is_audible(track) {
                continue;
            }
            for event in self.state.tracks[track].chase_events() {
                if let Some(event) = self.resend_pipeline(track, event) {
                    self.send(track, time, event);
                }
            }
        }
    }

    fn replays_on_seek(&self) -> bool {
        self.config.chase_on_seek || self.pipelines.iter().flatten().any(Pipeline::is_stateful)
    }

    /// Back to the origin with remembered state and pipeline state cleared.
    fn rewind(&mut self) {
        self.cursor.seek(&self.multitrack, 0);
        self.state.reset_position();
        for pipeline in self.pipelines.iter_mut().flatten() {
            pipeline.reset();
        }
        self.report_faults();
    }

    /// Repositions to `target` without dispatching skipped content. With
    /// replay, skipped events update remembered state and pass silently
    /// through the pipelines.
    fn seek_to(&mut self, target: Tick) {
        self.release_notes(None);
        if self.replays_on_seek() {
            let head = self.state.clock.max(self.cursor.current_time());
            if target < head || (self.clock_dispatched && target == self.state.clock) {
                self.rewind();
            }
            let mut changed = vec![false; self.state.tracks.len()];
            while self.cursor.peek_time().is_some_and(|time| time < target) {
                let Some(item) = self.cursor.advance(&self.multitrack) else {
                    break;
                };
                let (track, time, event) = (item.track, item.time, item.event.event.clone());
                if self.remember(track, time, &event, false) {
                    if let Some(flag) = changed.get_mut(track) {
                        *flag = true;
                    }
                }
                if event.is_replay_eligible() {
                    let _ = self.run_pipeline(track, event);
                }
            }
            for (track, changed) in changed.into_iter().enumerate() {
                if changed {
                    self.notifier
                        .notify(Notification::TrackStateChanged { track });
                }
            }
        } else {
            self.cursor.seek(&self.multitrack, target);
            self.sync_conductor_from_maps(target);
        }
        self.report_faults();
        self.state.clock = target;
        self.clock_dispatched = false;
        self.score_ms = self.tempo.ticks_to_ms(target);
        self.state.time_ms = self.score_ms;
        self.state.position = self.meter.position(target);
        self.notify_position();
    }

    fn sync_conductor_from_maps(&mut self, tick: Tick) {
        let (numerator, denominator) = self.meter.signature_at(tick);
        self.state.conductor.tempo_bpm = self.tempo.tempo_at(tick);
        self.state.conductor.numerator = numerator;
        self.state.conductor.denominator = denominator;
    }

    fn go_to(&mut self, target: Tick) -> Result<(), SequencerError> {
        let end = self.multitrack.shifted_end_time();
        if target > end {
            warn!(target, end, "seek past end rejected");
            return Err(SequencerError::SeekOutOfRange { target, end });
        }
        self.seek_to(target);
        if self.is_playing() && self.config.chase_on_resume {
            self.chase(None);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.halt();
        self.tempo = TempoMap::from_multitrack(&self.multitrack);
        self.meter = MeterMap::from_multitrack(&self.multitrack);
        self.rewind();
        self.score_ms = 0.0;
        self.clock_dispatched = false;
        self.notify_position();
    }

    fn audibility(&self) -> Vec<bool> {
        (0..self.state.controls.len())
            .map(|track| self.state.is_audible(track))
            .collect()
    }

    fn update_controls(
        &mut self,
        track: usize,
        update: impl FnOnce(&mut TrackControls),
    ) -> Result<(), SequencerError> {
        self.multitrack.track(track)?;
        let before = self.audibility();
        if let Some(controls) = self.state.controls.get_mut(track) {
            update(controls);
        }
        let after = self.audibility();
        for (index, (was, is)) in before.into_iter().zip(after).enumerate() {
            if was == is {
                continue;
            }
            if is {
                if self.is_playing() && self.config.chase_on_resume {
                    self.chase(Some(index));
                }
            } else {
                self.release_notes(Some(index));
            }
            self.notifier
                .notify(Notification::TrackStateChanged { track: index });
        }
        Ok(())
    }

    fn set_time_shift(&mut self, track: usize, ticks: i64) -> Result<(), SequencerError> {
        self.multitrack.set_time_shift(track, ticks)?;
        self.release_notes(Some(track));
        let inclusive = !self.clock_dispatched;
        self.cursor
            .resync_track(&self.multitrack, track, self.state.clock, inclusive);
        self.report_faults();
        Ok(())
    }

    fn set_out_port(&mut self, track: usize, port: Option<PortId>) -> Result<(), SequencerError> {
        self.multitrack.track(track)?;
        self.release_notes(Some(track));
        self.multitrack.set_out_port(track, port)?;
        Ok(())
    }

    fn set_processor(
        &mut self,
        track: usize,
        pipeline: Option<Pipeline>,
    ) -> Result<(), SequencerError> {
        self.multitrack.track(track)?;
        self.release_notes(Some(track));
        if let Some(slot) = self.pipelines.get_mut(track) {
            *slot = pipeline;
        }
        Ok(())
    }

    fn ensure_stopped(&self) -> Result<(), SequencerError> {
        if self.is_playing() {
            return Err(SequencerError::NotStopped);
        }
        Ok(())
    }

    /// Recomputes everything derived from track contents after a structural
    /// edit. The cursor is rebuilt by binary search.
    fn after_structural_edit(&mut self) {
        let num_tracks = self.multitrack.num_tracks();
        self.state.tracks.resize_with(num_tracks, TrackState::default);
        self.state
            .controls
            .resize(num_tracks, TrackControls::default());
        self.pipelines.resize_with(num_tracks, || None);

        self.tempo = TempoMap::from_multitrack(&self.multitrack);
        self.meter = MeterMap::from_multitrack(&self.multitrack);
        let clock = self.state.clock.min(self.multitrack.shifted_end_time());
        self.cursor.seek(&self.multitrack, clock);
        self.sync_conductor_from_maps(clock);
        self.state.clock = clock;
        self.clock_dispatched = false;
        self.score_ms = self.tempo.ticks_to_ms(clock);
        self.state.time_ms = self.score_ms;
        self.state.position = self.meter.position(clock);
    }

    fn insert_track(&mut self, index: usize) -> Result<(), SequencerError> {
        self.ensure_stopped()?;
        self.multitrack.insert_track(index)?;
        self.state.tracks.insert(index, TrackState::default());
        self.state.controls.insert(index, TrackControls::default());
        self.pipelines.insert(index, None);
        self.after_structural_edit();
        Ok(())
    }

    fn delete_track(&mut self, index: usize) -> Result<(), SequencerError> {
        self.ensure_stopped()?;
        self.multitrack.track(index)?;
        self.release_notes(Some(index));
        self.multitrack.delete_track(index)?;
        self.state.tracks.remove(index);
        self.state.controls.remove(index);
        self.pipelines.remove(index);
        self.after_structural_edit();
        Ok(())
    }

    fn move_track(&mut self, from: usize, to: usize) -> Result<(), SequencerError> {
        self.ensure_stopped()?;
        self.multitrack.move_track(from, to)?;
        if from != to {
            let state = self.state.tracks.remove(from);
            self.state.tracks.insert(to, state);
            let controls = self.state.controls.remove(from);
            self.state.controls.insert(to, controls);
            let pipeline = self.pipelines.remove(from);
            self.pipelines.insert(to, pipeline);
        }
        self.after_structural_edit();
        Ok(())
    }
}

/// Plays a [`MultiTrack`] under a [`TickDriver`], sending due events to an
/// [`EventSink`] and reporting to a [`Notifier`].
///
/// All methods take `&self`; a sequencer can be shared between the thread
/// that owns it and UI or control threads. Sink and notifier callbacks run
/// with the internal lock held and must not call back into the sequencer.
pub struct Sequencer {
    core: Arc<Mutex<Core>>,
    driver: Mutex<Box<dyn TickDriver>>,
}

impl Sequencer {
    #[must_use]
    pub fn new(
        multitrack: MultiTrack,
        driver: impl TickDriver + 'static,
        sink: impl EventSink + 'static,
        notifier: impl Notifier + 'static,
        config: SequencerConfig,
    ) -> Self {
        Self {
            core: Arc::new(Mutex::new(Core::new(
                multitrack,
                Box::new(sink),
                Box::new(notifier),
                config,
            ))),
            driver: Mutex::new(Box::new(driver)),
        }
    }

    /// Starts or resumes playback from the current position. Returns false,
    /// leaving the sequencer stopped, when there is nothing to play.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<bool, SequencerError> {
        let mut driver = self.driver.lock();
        if self.core.lock().is_playing() {
            return Ok(true);
        }
        // reap a driver whose callback ended on its own
        driver.unregister();

        let interval = {
            let mut core = self.core.lock();
            if !core.begin() {
                return Ok(false);
            }
            core.config.tick_interval()
        };

        let core = Arc::clone(&self.core);
        let callback: TickCallback = Box::new(move |now_ms| core.lock().on_tick(now_ms));
        if let Err(error) = driver.register(interval, callback) {
            warn!(%error, "tick driver registration failed");
            self.core.lock().halt();
            return Err(error.into());
        }
        info!(interval_ms = interval.as_millis() as u64, "playback started");
        Ok(true)
    }

    /// Stops playback, keeping the position. No event is dispatched once this
    /// returns. Must not be called from a sink or notifier callback.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let was_playing = self.core.lock().halt();
        self.driver.lock().unregister();
        if was_playing {
            info!("playback stopped");
        }
    }

    /// Stops and returns to the origin with all derived and pipeline state
    /// recomputed.
    #[instrument(skip(self))]
    pub fn reset(&self) {
        self.core.lock().reset();
        self.driver.lock().unregister();
        info!("sequencer reset");
    }

    #[instrument(skip(self))]
    pub fn go_to_time(&self, tick: Tick) -> Result<(), SequencerError> {
        self.core.lock().go_to(tick)?;
        debug!("seek done");
        Ok(())
    }

    /// Seeks to the tick reached `ms` unscaled milliseconds from the origin.
    #[instrument(skip(self))]
    pub fn go_to_time_ms(&self, ms: f64) -> Result<(), SequencerError> {
        let mut core = self.core.lock();
        let target = core.tempo.ms_to_ticks(ms);
        core.go_to(target)?;
        debug!(target, "seek done");
        Ok(())
    }

    /// Seeks to the start of `beat` in `measure`, both zero-based.
    #[instrument(skip(self))]
    pub fn go_to_measure(&self, measure: u32, beat: u32) -> Result<(), SequencerError> {
        let mut core = self.core.lock();
        let target = core.meter.measure_to_ticks(measure, beat);
        core.go_to(target)?;
        debug!(target, "seek done");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_tempo_scale(&self, scale: f64) -> Result<(), SequencerError> {
        if !(scale.is_finite() && scale > 0.0) {
            warn!("rejected tempo scale");
            return Err(SequencerError::InvalidTempoScale(scale));
        }
        self.core.lock().state.tempo_scale = scale;
        info!("tempo scale updated");
        Ok(())
    }

    /// Sets the repeat range `[start, end)`. Bounds are validated only when
    /// enabling; disabling with invalid bounds keeps the previous ones.
    #[instrument(skip(self))]
    pub fn set_repeat_play(&self, enabled: bool, start: Tick, end: Tick) -> Result<(), SequencerError> {
        let valid = start < end;
        if enabled && !valid {
            warn!("rejected repeat range");
            return Err(SequencerError::InvalidLoopRange { start, end });
        }
        let mut core = self.core.lock();
        core.state.repeat.enabled = enabled;
        if valid {
            core.state.repeat.start = start;
            core.state.repeat.end = end;
        }
        info!("repeat range updated");
        Ok(())
    }

    /// Like [`Sequencer::set_repeat_play`] with bounds given as zero-based
    /// measures; `end_measure` is exclusive.
    pub fn set_repeat_play_measures(
        &self,
        enabled: bool,
        start_measure: u32,
        end_measure: u32,
    ) -> Result<(), SequencerError> {
        let (start, end) = {
            let core = self.core.lock();
            (
                core.meter.measure_to_ticks(start_measure, 0),
                core.meter.measure_to_ticks(end_measure, 0),
            )
        };
        self.set_repeat_play(enabled, start, end)
    }

    #[instrument(skip(self))]
    pub fn set_track_time_shift(&self, track: usize, ticks: i64) -> Result<(), SequencerError> {
        self.core.lock().set_time_shift(track, ticks)?;
        debug!("time shift updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_track_out_port(&self, track: usize, port: Option<PortId>) -> Result<(), SequencerError> {
        self.core.lock().set_out_port(track, port)?;
        debug!("output port updated");
        Ok(())
    }

    /// Binds `pipeline` to `track`, replacing any previous one; `None` unbinds.
    #[instrument(skip(self, pipeline))]
    pub fn set_processor(&self, track: usize, pipeline: Option<Pipeline>) -> Result<(), SequencerError> {
        self.core.lock().set_processor(track, pipeline)?;
        debug!("processor updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_track_mute(&self, track: usize, mute: bool) -> Result<(), SequencerError> {
        self.core
            .lock()
            .update_controls(track, |controls| controls.mute = mute)?;
        debug!("mute updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_track_solo(&self, track: usize, solo: bool) -> Result<(), SequencerError> {
        self.core
            .lock()
            .update_controls(track, |controls| controls.solo = solo)?;
        debug!("solo updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn insert_track(&self, index: usize) -> Result<(), SequencerError> {
        self.core.lock().insert_track(index)?;
        info!("track inserted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn delete_track(&self, index: usize) -> Result<(), SequencerError> {
        self.core.lock().delete_track(index)?;
        info!("track deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn move_track(&self, from: usize, to: usize) -> Result<(), SequencerError> {
        self.core.lock().move_track(from, to)?;
        info!("track moved");
        Ok(())
    }

    /// Edits the multitrack in place while stopped; derived state is rebuilt
    /// afterwards.
    pub fn edit<R>(&self, edit: impl FnOnce(&mut MultiTrack) -> R) -> Result<R, SequencerError> {
        let mut core = self.core.lock();
        core.ensure_stopped()?;
        let result = edit(&mut core.multitrack);
        core.after_structural_edit();
        Ok(result)
    }

    pub fn with_multitrack<R>(&self, read: impl FnOnce(&MultiTrack) -> R) -> R {
        read(&self.core.lock().multitrack)
    }

    #[must_use]
    pub fn snapshot(&self) -> SequencerSnapshot {
        self.core.lock().state.snapshot()
    }

    #[must_use]
    pub fn status(&self) -> PlayStatus {
        self.core.lock().state.status
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.core.lock().is_playing()
    }

    #[must_use]
    pub fn current_clock(&self) -> Tick {
        self.core.lock().state.clock
    }

    /// Unscaled milliseconds from the origin to the current position.
    #[must_use]
    pub fn current_time_ms(&self) -> f64 {
        self.core.lock().state.time_ms
    }

    #[must_use]
    pub fn current_measure(&self) -> u32 {
        self.core.lock().state.position.measure
    }

    #[must_use]
    pub fn current_beat(&self) -> u32 {
        self.core.lock().state.position.beat
    }

    #[must_use]
    pub fn current_beat_offset(&self) -> Tick {
        self.core.lock().state.position.beat_offset
    }

    /// Tempo of the tempo track at the current position.
    #[must_use]
    pub fn tempo_bpm(&self) -> f64 {
        self.core.lock().state.conductor.tempo_bpm
    }

    /// Tempo as heard, with the tempo scale applied.
    #[must_use]
    pub fn scaled_tempo_bpm(&self) -> f64 {
        let core = self.core.lock();
        core.state.conductor.tempo_bpm * core.state.tempo_scale
    }

    #[must_use]
    pub fn tempo_scale(&self) -> f64 {
        self.core.lock().state.tempo_scale
    }

    #[must_use]
    pub fn track_state(&self, track: usize) -> Option<TrackState> {
        self.core.lock().state.tracks.get(track).cloned()
    }

    #[must_use]
    pub fn track_controls(&self, track: usize) -> Option<TrackControls> {
        self.core.lock().state.controls.get(track).copied()
    }

    /// Time of the next event to be dispatched, without consuming it.
    #[must_use]
    pub fn next_event_time(&self) -> Option<Tick> {
        self.core.lock().cursor.peek_time()
    }

    /// Unscaled milliseconds from the origin to the next event.
    #[must_use]
    pub fn next_event_time_ms(&self) -> Option<f64> {
        let core = self.core.lock();
        core.cursor.peek_time().map(|tick| core.tempo.ticks_to_ms(tick))
    }

    #[must_use]
    pub fn num_tracks(&self) -> usize {
        self.core.lock().multitrack.num_tracks()
    }

    #[must_use]
    pub fn repeat_play(&self) -> RepeatLoop {
        self.core.lock().state.repeat
    }

    #[must_use]
    pub fn ticks_to_ms(&self, tick: Tick) -> f64 {
        self.core.lock().tempo.ticks_to_ms(tick)
    }

    #[must_use]
    pub fn ms_to_ticks(&self, ms: f64) -> Tick {
        self.core.lock().tempo.ms_to_ticks(ms)
    }

    #[must_use]
    pub fn measure_to_ticks(&self, measure: u32, beat: u32) -> Tick {
        self.core.lock().meter.measure_to_ticks(measure, beat)
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        notifier::NullNotifier,
        processor::ProgramDeduplicator,
        sink::RecordingSink,
        tick::{ManualTickDriver, ManualTickHandle},
    };

    fn song() -> MultiTrack {
        let mut multitrack = MultiTrack::new(2, 480);
        multitrack.push_event(0, 0, Event::tempo(120.0)).expect("tempo");
        multitrack
            .push_event(1, 0, Event::program_change(0, 5))
            .expect("program");
        for beat in 0..8u64 {
            let key = 60 + u8::try_from(beat).expect("small");
            multitrack
                .push_event(1, beat * 480, Event::note_on(0, key, 100))
                .expect("note on");
            multitrack
                .push_event(1, beat * 480 + 240, Event::note_off(0, key))
                .expect("note off");
        }
        multitrack
    }

    fn sequencer(config: SequencerConfig) -> (Sequencer, ManualTickHandle, RecordingSink) {
        let (driver, handle) = ManualTickDriver::new();
        let sink = RecordingSink::new();
        let sequencer = Sequencer::new(song(), driver, sink.clone(), NullNotifier, config);
        (sequencer, handle, sink)
    }

    #[test]
    fn error_classes_follow_taxonomy() {
        assert_eq!(SequencerError::NotStopped.class(), ErrorClass::State);
        assert_eq!(
            SequencerError::InvalidTempoScale(0.0).class(),
            ErrorClass::Config
        );
        assert_eq!(
            SequencerError::from(EditError::InvalidTrackIndex { index: 3, count: 2 }).class(),
            ErrorClass::Structural
        );
    }

    #[test]
    fn event_cap_rolls_remainder_over() {
        let config = SequencerConfig {
            max_events_per_tick: 2,
            ..SequencerConfig::default()
        };
        let (sequencer, handle, sink) = sequencer(config);
        assert!(sequencer.start().expect("start"));
        // tempo, program and first note-on are all due at tick 0
        assert!(handle.fire(0));
        assert_eq!(sink.len(), 1);
        assert!(handle.fire(1));
        assert_eq!(sink.len(), 2);
        assert_eq!(sequencer.current_clock(), 0);
    }

    #[test]
    fn stop_releases_sounding_notes() {
        let (sequencer, handle, sink) = sequencer(SequencerConfig::default());
        sequencer.start().expect("start");
        handle.fire_range(0, 50, 10);
        sequencer.stop();
        let events = sink.events();
        let last = &events.last().expect("note off").1;
        assert_eq!(last.event, Event::note_off(0, 60));
        assert!(!handle.fire(60));
        assert_eq!(sink.len(), events.len());
    }

    #[test]
    fn backward_seek_rebuilds_stateful_pipeline() {
        let config = SequencerConfig {
            chase_on_seek: false,
            chase_on_resume: false,
            ..SequencerConfig::default()
        };
        let (sequencer, handle, sink) = sequencer(config);
        sequencer
            .set_processor(1, Some(Pipeline::new().with_stage(ProgramDeduplicator::new())))
            .expect("valid track");
        sequencer.go_to_time(960).expect("in range");
        assert_eq!(
            sequencer.track_state(1).expect("track 1").program,
            Some(5)
        );
        sequencer.go_to_time(0).expect("in range");
        sequencer.start().expect("start");
        handle.fire(0);
        // the program change at 0 was forgotten by the rewind, so it plays
        assert!(
            sink.events()
                .iter()
                .any(|(_, event)| event.event == Event::program_change(0, 5))
        );
    }

    #[test]
    fn structural_edit_while_playing_is_rejected() {
        let (sequencer, _handle, _sink) = sequencer(SequencerConfig::default());
        sequencer.start().expect("start");
        let err = sequencer.insert_track(1).expect_err("playing");
        assert_eq!(err.class(), ErrorClass::State);
        sequencer.stop();
        sequencer.insert_track(1).expect("stopped");
        assert_eq!(sequencer.num_tracks(), 3);
    }
}
