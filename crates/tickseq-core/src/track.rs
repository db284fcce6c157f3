use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{Event, Tick, TimedEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("invalid track index {index} (track count {count})")]
    InvalidTrackIndex { index: usize, count: usize },
    #[error("invalid event index {index} (event count {count})")]
    InvalidEventIndex { index: usize, count: usize },
    #[error("event at tick {time} would precede last event at tick {last}")]
    NonMonotonic { time: Tick, last: Tick },
}

/// Identifier of an output port, resolved by the event sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u16);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    events: Vec<TimedEvent>,
    out_port: Option<PortId>,
    time_shift: i64,
}

impl Track {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a track from events as a loader produced them. Order is checked by
    /// the merge at play time, not here; out-of-order data is skipped there as a
    /// data fault.
    #[must_use]
    pub fn from_events_unchecked(events: Vec<TimedEvent>) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TimedEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&TimedEvent> {
        self.events.get(index)
    }

    #[must_use]
    pub fn end_time(&self) -> Tick {
        self.events.last().map_or(0, |event| event.time)
    }

    #[must_use]
    pub fn out_port(&self) -> Option<PortId> {
        self.out_port
    }

    pub fn set_out_port(&mut self, port: Option<PortId>) {
        self.out_port = port;
    }

    #[must_use]
    pub fn time_shift(&self) -> i64 {
        self.time_shift
    }

    pub fn set_time_shift(&mut self, ticks: i64) {
        self.time_shift = ticks;
    }

    /// Time of `event` after this track's time shift, clamped at zero.
    #[must_use]
    pub fn shifted_time(&self, time: Tick) -> Tick {
        shift_time(time, self.time_shift)
    }

    /// Appends an event; rejects it if it would precede the current last event.
    pub fn push(&mut self, time: Tick, event: Event) -> Result<(), EditError> {
        let last = self.end_time();
        if !self.events.is_empty() && time < last {
            return Err(EditError::NonMonotonic { time, last });
        }
        self.events.push(TimedEvent::new(time, event));
        Ok(())
    }

    /// Ordered insert: the event lands after every existing event with the same
    /// or earlier time. Returns the index it was placed at.
    pub fn insert(&mut self, time: Tick, event: Event) -> usize {
        let index = self.events.partition_point(|existing| existing.time <= time);
        self.events.insert(index, TimedEvent::new(time, event));
        index
    }

    pub fn remove(&mut self, index: usize) -> Result<TimedEvent, EditError> {
        if index >= self.events.len() {
            return Err(EditError::InvalidEventIndex {
                index,
                count: self.events.len(),
            });
        }
        Ok(self.events.remove(index))
    }

    /// Removes the first event equal to `event` at `time`.
    pub fn remove_matching(&mut self, time: Tick, event: &Event) -> Option<TimedEvent> {
        let start = self.first_at_or_after(time);
        let offset = self.events[start..]
            .iter()
            .take_while(|existing| existing.time == time)
            .position(|existing| &existing.event == event)?;
        Some(self.events.remove(start + offset))
    }

    /// Index of the first event with `time >= time`, or `len()` if none.
    #[must_use]
    pub fn first_at_or_after(&self, time: Tick) -> usize {
        self.events.partition_point(|event| event.time < time)
    }

    /// Like [`Track::first_at_or_after`] but against shifted times.
    #[must_use]
    pub fn first_shifted_at_or_after(&self, time: Tick) -> usize {
        self.events
            .partition_point(|event| self.shifted_time(event.time) < time)
    }

    /// Index of the first event with shifted time strictly after `time`.
    #[must_use]
    pub fn first_shifted_after(&self, time: Tick) -> usize {
        self.events
            .partition_point(|event| self.shifted_time(event.time) <= time)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// True if times never decrease.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.events.windows(2).all(|pair| pair[0].time <= pair[1].time)
    }
}

#[must_use]
pub fn shift_time(time: Tick, shift: i64) -> Tick {
    if shift >= 0 {
        time.saturating_add(shift.unsigned_abs())
    } else {
        time.saturating_sub(shift.unsigned_abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_insert_keeps_times_sorted_and_is_stable() {
        let mut track = Track::new();
        track.insert(480, Event::note_on(0, 60, 100));
        track.insert(0, Event::program_change(0, 5));
        track.insert(480, Event::note_on(0, 64, 100));

        let times: Vec<_> = track.events().iter().map(|event| event.time).collect();
        assert_eq!(times, vec![0, 480, 480]);
        assert_eq!(track.events()[2].event, Event::note_on(0, 64, 100));
        assert!(track.is_ordered());
    }

    #[test]
    fn push_rejects_non_monotonic_append_without_mutation() {
        let mut track = Track::new();
        track.push(100, Event::note_on(0, 60, 90)).expect("first push");
        let err = track
            .push(50, Event::note_off(0, 60))
            .expect_err("earlier event must be rejected");
        assert_eq!(err, EditError::NonMonotonic { time: 50, last: 100 });
        assert_eq!(track.len(), 1);
    }

    #[test]
    fn negative_time_shift_clamps_at_zero() {
        let mut track = Track::new();
        track.set_time_shift(-100);
        assert_eq!(track.shifted_time(40), 0);
        assert_eq!(track.shifted_time(400), 300);
    }

    #[test]
    fn remove_reports_out_of_range_index() {
        let mut track = Track::new();
        let err = track.remove(0).expect_err("empty track has no event 0");
        assert!(matches!(err, EditError::InvalidEventIndex { index: 0, count: 0 }));
    }

    #[test]
    fn remove_matching_finds_event_among_equal_times() {
        let mut track = Track::new();
        track.insert(10, Event::note_on(0, 60, 100));
        track.insert(10, Event::note_on(0, 62, 100));
        let removed = track
            .remove_matching(10, &Event::note_on(0, 62, 100))
            .expect("event should be found");
        assert_eq!(removed.time, 10);
        assert_eq!(track.len(), 1);
    }
}
