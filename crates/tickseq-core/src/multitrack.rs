use tracing::{debug, instrument};

use crate::{
    event::{Event, Tick},
    track::{EditError, PortId, Track},
};

pub const DEFAULT_PPQ: u16 = 480;

/// Indexed collection of tracks. Track 0 is the conductor track (tempo and
/// time signature) consulted by time-base conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiTrack {
    ticks_per_beat: u16,
    tracks: Vec<Track>,
}

impl Default for MultiTrack {
    fn default() -> Self {
        Self::new(0, DEFAULT_PPQ)
    }
}

impl MultiTrack {
    #[must_use]
    pub fn new(num_tracks: usize, ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat: ticks_per_beat.max(1),
            tracks: vec![Track::new(); num_tracks],
        }
    }

    #[must_use]
    pub fn from_tracks(tracks: Vec<Track>, ticks_per_beat: u16) -> Self {
        Self {
            ticks_per_beat: ticks_per_beat.max(1),
            tracks,
        }
    }

    #[must_use]
    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    #[must_use]
    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    #[must_use]
    pub fn is_valid_track(&self, index: usize) -> bool {
        index < self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Result<&Track, EditError> {
        let count = self.tracks.len();
        self.tracks
            .get(index)
            .ok_or(EditError::InvalidTrackIndex { index, count })
    }

    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track, EditError> {
        let count = self.tracks.len();
        self.tracks
            .get_mut(index)
            .ok_or(EditError::InvalidTrackIndex { index, count })
    }

    #[must_use]
    pub fn conductor(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Latest event time over all tracks, ignoring time shifts.
    #[must_use]
    pub fn end_time(&self) -> Tick {
        self.tracks.iter().map(Track::end_time).max().unwrap_or_default()
    }

    /// Latest event time over all tracks after time shifts.
    #[must_use]
    pub fn shifted_end_time(&self) -> Tick {
        self.tracks
            .iter()
            .filter(|track| !track.is_empty())
            .map(|track| track.shifted_time(track.end_time()))
            .max()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn num_events(&self) -> usize {
        self.tracks.iter().map(Track::len).sum()
    }

    #[must_use]
    pub fn num_tracks_with_events(&self) -> usize {
        self.tracks.iter().filter(|track| !track.is_empty()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.iter().all(Track::is_empty)
    }

    pub fn insert_event(&mut self, track: usize, time: Tick, event: Event) -> Result<usize, EditError> {
        Ok(self.track_mut(track)?.insert(time, event))
    }

    pub fn push_event(&mut self, track: usize, time: Tick, event: Event) -> Result<(), EditError> {
        self.track_mut(track)?.push(time, event)
    }

    pub fn remove_event(&mut self, track: usize, index: usize) -> Result<(), EditError> {
        self.track_mut(track)?.remove(index).map(|_| ())
    }

    /// Inserts an empty track at `index` (`index == num_tracks()` appends).
    #[instrument(skip(self), fields(num_tracks = self.tracks.len()))]
    pub fn insert_track(&mut self, index: usize) -> Result<(), EditError> {
        if index > self.tracks.len() {
            return Err(EditError::InvalidTrackIndex {
                index,
                count: self.tracks.len(),
            });
        }
        self.tracks.insert(index, Track::new());
        debug!("track inserted");
        Ok(())
    }

    #[instrument(skip(self), fields(num_tracks = self.tracks.len()))]
    pub fn delete_track(&mut self, index: usize) -> Result<Track, EditError> {
        self.track(index)?;
        let removed = self.tracks.remove(index);
        debug!("track deleted");
        Ok(removed)
    }

    /// Moves the track at `from` so it ends up at index `to`, keeping its
    /// events, port binding and time shift.
    #[instrument(skip(self), fields(num_tracks = self.tracks.len()))]
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), EditError> {
        self.track(from)?;
        self.track(to)?;
        if from == to {
            return Ok(());
        }
        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);
        debug!("track moved");
        Ok(())
    }

    /// Copies the track at `from` over the track at `to`, bindings included.
    pub fn copy_track(&mut self, from: usize, to: usize) -> Result<(), EditError> {
        let source = self.track(from)?.clone();
        *self.track_mut(to)? = source;
        Ok(())
    }

    pub fn set_track(&mut self, index: usize, track: Track) -> Result<(), EditError> {
        *self.track_mut(index)? = track;
        Ok(())
    }

    pub fn set_out_port(&mut self, index: usize, port: Option<PortId>) -> Result<(), EditError> {
        self.track_mut(index)?.set_out_port(port);
        Ok(())
    }

    pub fn set_time_shift(&mut self, index: usize, ticks: i64) -> Result<(), EditError> {
        self.track_mut(index)?.set_time_shift(ticks);
        Ok(())
    }
}
