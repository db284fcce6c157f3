use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use midly::{
    Format, Header, MetaMessage, Smf, Timing, TrackEvent, TrackEventKind,
    num::{u15, u24, u28},
};
use tracing::{info, instrument, warn};

use crate::{
    event::{Event, MetaEvent, Tick, TimedEvent},
    multitrack::MultiTrack,
    track::{PortId, Track},
};

/// Tracks a format 0 file is split into: the conductor plus one per channel.
const SPLIT_TRACKS: usize = 17;

#[instrument(fields(path = %path.display()))]
pub fn load_smf(path: &Path) -> Result<MultiTrack> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read midi file: {}", path.display()))?;
    let multitrack = load_smf_bytes(&bytes)
        .with_context(|| format!("failed to import midi file: {}", path.display()))?;
    info!(
        tracks = multitrack.num_tracks(),
        events = multitrack.num_events(),
        "midi file imported"
    );
    Ok(multitrack)
}

pub fn load_smf_bytes(bytes: &[u8]) -> Result<MultiTrack> {
    let smf = Smf::parse(bytes).context("failed to parse standard midi file")?;
    from_smf(&smf)
}

/// Converts a parsed file into a multitrack. Format 0 files are split by
/// channel; a `MidiPort` meta event binds its track to that port.
pub fn from_smf(smf: &Smf<'_>) -> Result<MultiTrack> {
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(ticks) => ticks.as_int(),
        Timing::Timecode(fps, subframe) => {
            bail!("timecode timing ({fps:?}, {subframe} subframes) is not supported")
        }
    };

    let mut tracks = Vec::new();
    match smf.header.format {
        Format::SingleTrack => {
            tracks.resize_with(SPLIT_TRACKS, Track::new);
            for source in &smf.tracks {
                for (time, kind) in absolute(source) {
                    let Some(event) = convert(kind, &mut tracks[0]) else {
                        continue;
                    };
                    let index = event.channel().map_or(0, |channel| usize::from(channel) + 1);
                    tracks[index].push(time, event)?;
                }
            }
        }
        Format::Parallel | Format::Sequential => {
            if smf.header.format == Format::Sequential {
                warn!("sequential midi file imported as parallel tracks");
            }
            for source in &smf.tracks {
                let mut track = Track::new();
                for (time, kind) in absolute(source) {
                    if let Some(event) = convert(kind, &mut track) {
                        track.push(time, event)?;
                    }
                }
                tracks.push(track);
            }
        }
    }

    Ok(MultiTrack::from_tracks(tracks, ticks_per_beat))
}

fn absolute<'a>(
    source: &'a [TrackEvent<'a>],
) -> impl Iterator<Item = (Tick, &'a TrackEventKind<'a>)> + 'a {
    source.iter().scan(0u64, |time, event| {
        *time += u64::from(event.delta.as_int());
        Some((*time, &event.kind))
    })
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Maps a file event to a stored event. Returns `None` for events that only
/// configure the track (port binding, end of track) or carry nothing we keep.
fn convert(kind: &TrackEventKind<'_>, track: &mut Track) -> Option<Event> {
    let event = match kind {
        TrackEventKind::Midi { channel, message } => Event::Channel {
            channel: *channel,
            message: *message,
        },
        TrackEventKind::SysEx(data) | TrackEventKind::Escape(data) => Event::SysEx(data.to_vec()),
        TrackEventKind::Meta(meta) => Event::Meta(match meta {
            MetaMessage::Tempo(micros) => MetaEvent::Tempo {
                micros_per_beat: micros.as_int(),
            },
            MetaMessage::TimeSignature(numerator, exponent, clocks, thirty_seconds) => {
                MetaEvent::TimeSignature {
                    numerator: *numerator,
                    denominator: 1u8 << (*exponent).min(7),
                    clocks_per_click: *clocks,
                    thirty_seconds_per_quarter: *thirty_seconds,
                }
            }
            MetaMessage::KeySignature(sharps, minor) => MetaEvent::KeySignature {
                sharps: *sharps,
                minor: *minor,
            },
            MetaMessage::Marker(bytes) => MetaEvent::Marker(text(bytes)),
            MetaMessage::TrackName(bytes) => MetaEvent::TrackName(text(bytes)),
            MetaMessage::InstrumentName(bytes) => MetaEvent::InstrumentName(text(bytes)),
            MetaMessage::Text(bytes) => MetaEvent::Text(text(bytes)),
            MetaMessage::Copyright(bytes) => MetaEvent::Other {
                kind: 0x02,
                data: bytes.to_vec(),
            },
            MetaMessage::Lyric(bytes) => MetaEvent::Other {
                kind: 0x05,
                data: bytes.to_vec(),
            },
            MetaMessage::CuePoint(bytes) => MetaEvent::Other {
                kind: 0x07,
                data: bytes.to_vec(),
            },
            MetaMessage::SequencerSpecific(bytes) => MetaEvent::Other {
                kind: 0x7F,
                data: bytes.to_vec(),
            },
            MetaMessage::Unknown(kind, bytes) => MetaEvent::Other {
                kind: *kind,
                data: bytes.to_vec(),
            },
            MetaMessage::MidiPort(port) => {
                track.set_out_port(Some(PortId(u16::from(port.as_int()))));
                return None;
            }
            _ => return None,
        }),
    };
    Some(event)
}

/// Encodes a multitrack as a format 1 Standard MIDI File. Time shifts and
/// port bindings are not written.
pub fn smf_bytes(multitrack: &MultiTrack) -> Result<Vec<u8>> {
    let tracks: Vec<Vec<TrackEvent<'_>>> = multitrack
        .tracks()
        .iter()
        .map(|track| encode_track(track.events()))
        .collect();

    let header = Header {
        format: Format::Parallel,
        timing: Timing::Metrical(u15::from(multitrack.ticks_per_beat().min(0x7FFF))),
    };

    let mut bytes = Vec::new();
    Smf { header, tracks }
        .write_std(&mut bytes)
        .context("failed to encode midi bytes")?;
    Ok(bytes)
}

pub fn save_smf(multitrack: &MultiTrack, path: &Path) -> Result<()> {
    let bytes = smf_bytes(multitrack)?;
    fs::write(path, bytes)
        .with_context(|| format!("failed to write midi file: {}", path.display()))?;
    Ok(())
}

fn encode_track(events: &[TimedEvent]) -> Vec<TrackEvent<'_>> {
    let mut encoded = Vec::with_capacity(events.len() + 1);
    let mut previous = 0u64;
    for timed in events {
        let Some(kind) = encode_event(&timed.event) else {
            continue;
        };
        let delta = timed.time.saturating_sub(previous).min(0x0FFF_FFFF);
        encoded.push(TrackEvent {
            delta: u28::from(u32::try_from(delta).unwrap_or(0x0FFF_FFFF)),
            kind,
        });
        previous = previous.max(timed.time);
    }
    encoded.push(TrackEvent {
        delta: u28::from(0_u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    encoded
}

fn encode_event(event: &Event) -> Option<TrackEventKind<'_>> {
    let kind = match event {
        Event::Channel { channel, message } => TrackEventKind::Midi {
            channel: *channel,
            message: *message,
        },
        Event::SysEx(data) => TrackEventKind::SysEx(data),
        Event::Meta(meta) => TrackEventKind::Meta(match meta {
            MetaEvent::Tempo { micros_per_beat } => {
                MetaMessage::Tempo(u24::from((*micros_per_beat).min(0x00FF_FFFF)))
            }
            MetaEvent::TimeSignature {
                numerator,
                denominator,
                clocks_per_click,
                thirty_seconds_per_quarter,
            } => MetaMessage::TimeSignature(
                *numerator,
                u8::try_from((*denominator).max(1).ilog2()).unwrap_or(2),
                *clocks_per_click,
                *thirty_seconds_per_quarter,
            ),
            MetaEvent::KeySignature { sharps, minor } => MetaMessage::KeySignature(*sharps, *minor),
            MetaEvent::Marker(text) => MetaMessage::Marker(text.as_bytes()),
            MetaEvent::TrackName(text) => MetaMessage::TrackName(text.as_bytes()),
            MetaEvent::InstrumentName(text) => MetaMessage::InstrumentName(text.as_bytes()),
            MetaEvent::Text(text) => MetaMessage::Text(text.as_bytes()),
            // appended once per track
            MetaEvent::EndOfTrack => return None,
            MetaEvent::Other { kind, data } => MetaMessage::Unknown(*kind, data),
        }),
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_timing_is_rejected() {
        let smf = Smf {
            header: Header {
                format: Format::Parallel,
                timing: Timing::Timecode(midly::Fps::Fps25, 40),
            },
            tracks: Vec::new(),
        };
        let err = from_smf(&smf).expect_err("timecode files are not supported");
        assert!(err.to_string().contains("timecode"));
    }

    #[test]
    fn time_signature_denominator_round_trips_as_power_of_two() {
        let mut multitrack = MultiTrack::new(1, 96);
        multitrack
            .push_event(0, 0, Event::time_signature(6, 8))
            .expect("conductor");
        let bytes = smf_bytes(&multitrack).expect("encode");
        let imported = load_smf_bytes(&bytes).expect("decode");
        let conductor = imported.conductor().expect("track 0");
        assert_eq!(
            conductor.events()[0].event.time_signature_parts(),
            Some((6, 8))
        );
        assert_eq!(imported.ticks_per_beat(), 96);
    }
}
