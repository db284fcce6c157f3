use std::{cmp::Reverse, collections::BinaryHeap};

use tracing::warn;

use crate::{
    event::{Tick, TimedEvent},
    multitrack::MultiTrack,
};

/// One merged event: the owning track, its time after time shift, and the
/// stored event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeItem<'m> {
    pub track: usize,
    pub time: Tick,
    pub event: &'m TimedEvent,
}

/// Events skipped on a track because they went back in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFault {
    pub track: usize,
    pub skipped: usize,
    pub at: Tick,
}

/// Cursor state of a chronological k-way merge over a [`MultiTrack`].
///
/// The cursor does not borrow the tracks; every call takes the multitrack it
/// was built for. Inserting, deleting or moving tracks invalidates it and it
/// must be rebuilt with [`MergeCursor::new`] or [`MergeCursor::seek`].
#[derive(Debug, Clone, Default)]
pub struct MergeCursor {
    next: Vec<usize>,
    last_time: Vec<Tick>,
    heads: BinaryHeap<Reverse<(Tick, usize)>>,
    cur_time: Tick,
    faults: Vec<DataFault>,
}

impl MergeCursor {
    #[must_use]
    pub fn new(multitrack: &MultiTrack) -> Self {
        let mut cursor = Self::default();
        cursor.seek(multitrack, 0);
        cursor
    }

    /// Time of the last yielded event, or the seek target.
    #[must_use]
    pub fn current_time(&self) -> Tick {
        self.cur_time
    }

    /// Per-track index of the next unconsumed event.
    #[must_use]
    pub fn positions(&self) -> &[usize] {
        &self.next
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.heads.is_empty()
    }

    /// Time of the next event without consuming it.
    #[must_use]
    pub fn peek_time(&self) -> Option<Tick> {
        self.heads.peek().map(|Reverse((time, _))| *time)
    }

    /// Track and time of the next event without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<(usize, Tick)> {
        self.heads.peek().map(|Reverse((time, track))| (*track, *time))
    }

    /// Positions every track on its first event at or after `time`, by binary
    /// search per track.
    pub fn seek(&mut self, multitrack: &MultiTrack, time: Tick) {
        let tracks = multitrack.tracks();
        self.next = tracks
            .iter()
            .map(|track| track.first_shifted_at_or_after(time))
            .collect();
        self.last_time = vec![time; tracks.len()];
        self.cur_time = time;
        self.faults.clear();
        self.rebuild_heads(multitrack);
    }

    /// Repositions one track after its time shift changed: on its first event
    /// at `time` or later when `inclusive`, strictly after `time` otherwise.
    pub fn resync_track(&mut self, multitrack: &MultiTrack, track: usize, time: Tick, inclusive: bool) {
        let Some(source) = multitrack.tracks().get(track) else {
            return;
        };
        if let Some(next) = self.next.get_mut(track) {
            *next = if inclusive {
                source.first_shifted_at_or_after(time)
            } else {
                source.first_shifted_after(time)
            };
        }
        if let Some(last) = self.last_time.get_mut(track) {
            *last = time;
        }
        self.rebuild_heads(multitrack);
    }

    /// Yields the next event in (time, track index) order.
    pub fn advance<'m>(&mut self, multitrack: &'m MultiTrack) -> Option<MergeItem<'m>> {
        while let Some(Reverse((time, track))) = self.heads.pop() {
            let Some(source) = multitrack.tracks().get(track) else {
                continue;
            };
            let Some(&index) = self.next.get(track) else {
                continue;
            };
            let Some(event) = source.get(index) else {
                continue;
            };
            self.next[track] = index + 1;
            self.last_time[track] = time;
            self.cur_time = time;
            self.push_head(multitrack, track);
            return Some(MergeItem {
                track,
                time,
                event,
            });
        }
        None
    }

    /// Faults found since the last call.
    pub fn drain_faults(&mut self) -> std::vec::Drain<'_, DataFault> {
        self.faults.drain(..)
    }

    fn rebuild_heads(&mut self, multitrack: &MultiTrack) {
        self.heads.clear();
        for track in 0..self.next.len() {
            self.push_head(multitrack, track);
        }
    }

    fn push_head(&mut self, multitrack: &MultiTrack, track: usize) {
        let Some(source) = multitrack.tracks().get(track) else {
            return;
        };
        let (Some(&floor), Some(&start)) = (self.last_time.get(track), self.next.get(track)) else {
            return;
        };
        let mut index = start;
        let mut skipped = 0;
        while let Some(event) = source.get(index) {
            let time = source.shifted_time(event.time);
            if time >= floor {
                break;
            }
            index += 1;
            skipped += 1;
        }
        if skipped > 0 {
            warn!(track, skipped, at = floor, "out-of-order events skipped");
            self.faults.push(DataFault {
                track,
                skipped,
                at: floor,
            });
        }
        self.next[track] = index;
        if let Some(event) = source.get(index) {
            self.heads
                .push(Reverse((source.shifted_time(event.time), track)));
        }
    }
}

/// Borrowing iterator over a [`MultiTrack`] in chronological order.
#[derive(Debug, Clone)]
pub struct Merge<'m> {
    multitrack: &'m MultiTrack,
    cursor: MergeCursor,
}

impl<'m> Merge<'m> {
    #[must_use]
    pub fn new(multitrack: &'m MultiTrack) -> Self {
        Self {
            multitrack,
            cursor: MergeCursor::new(multitrack),
        }
    }

    #[must_use]
    pub fn starting_at(multitrack: &'m MultiTrack, time: Tick) -> Self {
        let mut merge = Self::new(multitrack);
        merge.seek(time);
        merge
    }

    pub fn seek(&mut self, time: Tick) {
        self.cursor.seek(self.multitrack, time);
    }

    #[must_use]
    pub fn peek_time(&self) -> Option<Tick> {
        self.cursor.peek_time()
    }

    #[must_use]
    pub fn cursor(&self) -> &MergeCursor {
        &self.cursor
    }
}

impl<'m> Iterator for Merge<'m> {
    type Item = MergeItem<'m>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.advance(self.multitrack)
    }
}
