use crate::{
    event::{Event, MetaEvent, Tick},
    multitrack::{DEFAULT_PPQ, MultiTrack},
    track::{EditError, Track},
};

const LEAD_PHRASE: [(u8, Tick, Tick); 6] = [
    (72, 0, 240),
    (74, 240, 240),
    (79, 480, 720),
    (81, 1_200, 720),
    (79, 1_920, 480),
    (76, 2_400, 1_440),
];

const BASS_ROOTS: [u8; 4] = [45, 41, 43, 40];

fn named(name: &str) -> Track {
    let mut track = Track::new();
    track.insert(0, Event::Meta(MetaEvent::TrackName(name.to_string())));
    track
}

fn note(track: &mut Track, channel: u8, key: u8, velocity: u8, start: Tick, length: Tick) {
    track.insert(start, Event::note_on(channel, key, velocity));
    track.insert(start + length, Event::note_off(channel, key));
}

/// Four bars at 138 BPM in 4/4: conductor, lead, bass and drums.
pub fn demo_multitrack() -> Result<MultiTrack, EditError> {
    let mut conductor = named("Conductor");
    conductor.push(0, Event::tempo(138.0))?;
    conductor.push(0, Event::time_signature(4, 4))?;
    conductor.push(0, Event::Meta(MetaEvent::Marker("A".to_string())))?;

    let mut lead = named("Lead");
    lead.push(0, Event::program_change(0, 80))?;
    lead.push(0, Event::control_change(0, 7, 110))?;
    for (key, start, length) in LEAD_PHRASE {
        note(&mut lead, 0, key, 118, start, length);
    }

    let mut bass = named("Bass");
    bass.push(0, Event::program_change(1, 38))?;
    for (bar, root) in (0u64..).zip(BASS_ROOTS) {
        for eighth in 0..8u64 {
            let start = bar * 1_920 + eighth * 240;
            let key = if eighth % 2 == 0 { root } else { root + 12 };
            note(&mut bass, 1, key, 100, start, 200);
        }
    }

    let mut drums = named("Drums");
    for beat in 0..16u64 {
        let start = beat * 480;
        let key = if beat % 2 == 0 { 36 } else { 38 };
        note(&mut drums, 9, key, 110, start, 120);
        note(&mut drums, 9, 42, 80, start + 240, 60);
    }

    Ok(MultiTrack::from_tracks(
        vec![conductor, lead, bass, drums],
        DEFAULT_PPQ,
    ))
}
