use std::sync::mpsc::Receiver;

use tickseq_core::{
    ChannelNotifier, ErrorClass, Event, ManualTickDriver, ManualTickHandle, MultiTrack,
    Notification, NullNotifier, PlayStatus, PortId, RecordingSink, Sequencer, SequencerConfig,
    SequencerError, TimedEvent, Track, TransportChange,
};

/// Track 0: a 120 BPM tempo event. Track 1: one quarter note at 480 ticks per beat.
fn quarter_note() -> MultiTrack {
    let mut multitrack = MultiTrack::new(2, 480);
    multitrack
        .push_event(0, 0, Event::tempo(120.0))
        .expect("tempo");
    multitrack
        .push_event(1, 0, Event::note_on(0, 60, 100))
        .expect("note on");
    multitrack
        .push_event(1, 480, Event::note_off(0, 60))
        .expect("note off");
    multitrack
}

/// Sixteen eighth notes at 120 BPM on track 1.
fn eighths() -> MultiTrack {
    let mut multitrack = MultiTrack::new(2, 480);
    multitrack
        .push_event(0, 0, Event::tempo(120.0))
        .expect("tempo");
    for step in 0..16u64 {
        multitrack
            .push_event(1, step * 240, Event::note_on(0, 64, 100))
            .expect("note on");
        multitrack
            .push_event(1, step * 240 + 120, Event::note_off(0, 64))
            .expect("note off");
    }
    multitrack
}

fn manual(
    multitrack: MultiTrack,
) -> (Sequencer, ManualTickHandle, RecordingSink, Receiver<Notification>) {
    let (driver, handle) = ManualTickDriver::new();
    let sink = RecordingSink::new();
    let (notifier, notifications) = ChannelNotifier::new();
    let sequencer = Sequencer::new(
        multitrack,
        driver,
        sink.clone(),
        notifier,
        SequencerConfig::default(),
    );
    (sequencer, handle, sink, notifications)
}

fn note_on_times(sink: &RecordingSink) -> Vec<u64> {
    sink.events()
        .into_iter()
        .filter(|(_, timed)| timed.event.is_note_on())
        .map(|(_, timed)| timed.time)
        .collect()
}

#[test]
fn quarter_note_on_dispatched_by_250_ms_and_off_waits_for_500_ms() {
    let (sequencer, handle, sink, notifications) = manual(quarter_note());
    assert!(sequencer.start().expect("start"));

    assert!(handle.fire_range(0, 250, 1));
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, PortId(0));
    assert_eq!(events[0].1.time, 0);
    assert_eq!(events[0].1.event, Event::note_on(0, 60, 100));
    assert_eq!(sequencer.current_clock(), 240);
    assert_eq!(sequencer.next_event_time(), Some(480));
    let next_ms = sequencer.next_event_time_ms().expect("note off pending");
    assert!((next_ms - 500.0).abs() < 1e-9);

    // the note off is the last event, so the sequencer stops after it
    assert!(!handle.fire_range(251, 600, 1));
    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].1.time, 480);
    assert!(events[1].1.event.is_note_off());
    assert_eq!(sequencer.status(), PlayStatus::Stopped);

    let received: Vec<_> = notifications.try_iter().collect();
    assert!(received.contains(&Notification::Transport {
        change: TransportChange::Started
    }));
    assert!(received.contains(&Notification::EndOfSequence));
}

#[test]
fn muted_track_dispatches_nothing_while_position_advances() {
    let (sequencer, handle, sink, _notifications) = manual(quarter_note());
    sequencer.set_track_mute(1, true).expect("track 1 exists");
    assert!(sequencer.start().expect("start"));

    handle.fire_range(0, 600, 1);

    assert!(sink.is_empty());
    assert_eq!(sequencer.current_clock(), 480);
    assert!((sequencer.current_time_ms() - 500.0).abs() < 1e-9);
    assert!((sequencer.tempo_bpm() - 120.0).abs() < 1e-9);
}

#[test]
fn solo_silences_other_tracks() {
    let mut multitrack = eighths();
    multitrack.insert_track(2).expect("append");
    multitrack
        .push_event(2, 0, Event::note_on(1, 40, 90))
        .expect("note on");
    multitrack
        .push_event(2, 240, Event::note_off(1, 40))
        .expect("note off");
    let (sequencer, handle, sink, _notifications) = manual(multitrack);
    sequencer.set_track_solo(2, true).expect("track 2 exists");
    sequencer.start().expect("start");

    handle.fire_range(0, 400, 10);

    assert!(!sink.is_empty());
    assert!(
        sink.events()
            .iter()
            .all(|(_, timed)| timed.event.channel() == Some(1))
    );
}

#[test]
fn repeat_loop_wraps_exactly_to_start() {
    let (sequencer, handle, sink, notifications) = manual(eighths());
    sequencer.set_repeat_play(true, 480, 960).expect("valid range");
    sequencer.start().expect("start");

    let mut clocks = Vec::new();
    for now in (0..=3_000).step_by(10) {
        assert!(handle.fire(now), "looping playback never ends");
        clocks.push(sequencer.current_clock());
    }

    let mut wraps = 0;
    for pair in clocks.windows(2) {
        if pair[1] < pair[0] {
            wraps += 1;
            assert_eq!(pair[1], 480);
            assert!(pair[0] < 960);
        }
    }
    assert!(wraps >= 3, "expected several wraps, saw {wraps}");

    let times = note_on_times(&sink);
    assert_eq!(&times[..4], &[0, 240, 480, 720]);
    assert!(times[4..].chunks(2).all(|pass| pass == [480, 720] || pass == [480]));

    let loops = notifications
        .try_iter()
        .filter(|notification| *notification == Notification::Loop)
        .count();
    assert_eq!(loops, wraps);
}

#[test]
fn doubling_tempo_scale_doubles_ticks_per_real_millisecond() {
    let (normal, normal_handle, _, _) = manual(eighths());
    let (fast, fast_handle, _, _) = manual(eighths());
    fast.set_tempo_scale(2.0).expect("positive scale");
    normal.start().expect("start");
    fast.start().expect("start");

    normal_handle.fire_range(0, 200, 1);
    fast_handle.fire_range(0, 200, 1);

    assert_eq!(normal.current_clock(), 192);
    assert_eq!(fast.current_clock(), 384);
    assert!((fast.scaled_tempo_bpm() - 240.0).abs() < 1e-9);
    // the tempo track itself is untouched
    assert!((fast.tempo_bpm() - 120.0).abs() < 1e-9);
}

#[test]
fn non_positive_tempo_scale_is_rejected_and_prior_value_kept() {
    let (sequencer, _, _, _) = manual(eighths());
    sequencer.set_tempo_scale(1.5).expect("positive scale");
    for invalid in [0.0, -1.0, f64::NAN] {
        let err = sequencer
            .set_tempo_scale(invalid)
            .expect_err("scale must be rejected");
        assert_eq!(err.class(), ErrorClass::Config);
    }
    assert!((sequencer.tempo_scale() - 1.5).abs() < f64::EPSILON);
}

#[test]
fn invalid_repeat_range_is_rejected() {
    let (sequencer, _, _, _) = manual(eighths());
    sequencer.set_repeat_play(true, 0, 960).expect("valid range");
    let err = sequencer
        .set_repeat_play(true, 960, 960)
        .expect_err("empty range");
    assert!(matches!(
        err,
        SequencerError::InvalidLoopRange {
            start: 960,
            end: 960
        }
    ));
    let repeat = sequencer.repeat_play();
    assert_eq!((repeat.start, repeat.end), (0, 960));
}

#[test]
fn seek_round_trips_current_clock() {
    let (sequencer, _, _, _) = manual(eighths());
    let end = sequencer.with_multitrack(MultiTrack::shifted_end_time);
    for target in [0, 1, 479, 480, 1_000, end] {
        sequencer.go_to_time(target).expect("target within bounds");
        assert_eq!(sequencer.current_clock(), target);
    }

    let err = sequencer
        .go_to_time(end + 1)
        .expect_err("past the end");
    assert!(matches!(err, SequencerError::SeekOutOfRange { .. }));
    assert_eq!(sequencer.current_clock(), end);

    sequencer.go_to_time_ms(500.0).expect("in range");
    assert_eq!(sequencer.current_clock(), 480);
    sequencer.go_to_measure(1, 0).expect("in range");
    assert_eq!(sequencer.current_clock(), 1_920);
    assert_eq!(sequencer.current_measure(), 1);
    assert_eq!(sequencer.current_beat(), 0);
}

#[test]
fn seek_rebuilds_track_state_and_resume_chases_it() {
    let mut multitrack = eighths();
    multitrack
        .insert_event(1, 0, Event::program_change(0, 33))
        .expect("program");
    multitrack
        .insert_event(1, 900, Event::control_change(0, 7, 64))
        .expect("volume");
    let (sequencer, handle, sink, _) = manual(multitrack);

    sequencer.go_to_time(1_000).expect("in range");
    let state = sequencer.track_state(1).expect("track 1");
    assert_eq!(state.program, Some(33));
    assert_eq!(state.controllers[7], Some(64));
    assert!(sink.is_empty(), "seeking never dispatches skipped content");

    sequencer.start().expect("start");
    handle.fire(0);
    let events = sink.events();
    assert_eq!(events[0].1.event, Event::program_change(0, 33));
    assert_eq!(events[1].1.event, Event::control_change(0, 7, 64));
    assert!(events.iter().all(|(_, timed)| timed.time >= 1_000));
}

#[test]
fn time_shift_delays_dispatch() {
    let (sequencer, handle, sink, _) = manual(quarter_note());
    sequencer.set_track_time_shift(1, 240).expect("track 1");
    sequencer.start().expect("start");

    handle.fire_range(0, 240, 1);
    assert!(sink.is_empty());
    handle.fire(250);
    let events = sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.time, 240);
}

#[test]
fn start_on_empty_multitrack_is_a_no_op() {
    let (sequencer, handle, _, _) = manual(MultiTrack::new(3, 480));
    assert!(!sequencer.start().expect("not an error"));
    assert_eq!(sequencer.status(), PlayStatus::Stopped);
    assert!(!handle.is_registered());
}

#[test]
fn reset_returns_to_origin_and_allows_replay() {
    let (sequencer, handle, sink, _) = manual(quarter_note());
    sequencer.start().expect("start");
    handle.fire_range(0, 600, 1);
    assert!(!sequencer.start().expect("exhausted"), "nothing left to play");

    sequencer.reset();
    assert_eq!(sequencer.current_clock(), 0);
    assert!(sequencer.start().expect("start again"));
    handle.fire(0);
    assert_eq!(note_on_times(&sink), vec![0, 0]);
}

#[test]
fn out_port_binding_routes_dispatch() {
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        quarter_note(),
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig {
            default_port: 4,
            ..SequencerConfig::default()
        },
    );
    sequencer.start().expect("start");
    handle.fire(0);
    sequencer
        .set_track_out_port(1, Some(PortId(9)))
        .expect("track 1");
    handle.fire_range(1, 600, 1);

    let ports: Vec<_> = sink.events().into_iter().map(|(port, _)| port).collect();
    // note on on the default port, released there when rebound, then the
    // stored note off on the new port
    assert_eq!(ports, vec![PortId(4), PortId(4), PortId(9)]);
}

#[test]
fn out_of_order_event_is_skipped_and_reported_once() {
    let broken = Track::from_events_unchecked(vec![
        TimedEvent::new(0, Event::note_on(1, 60, 100)),
        TimedEvent::new(300, Event::note_off(1, 60)),
        TimedEvent::new(100, Event::control_change(1, 7, 1)),
        TimedEvent::new(400, Event::program_change(1, 9)),
    ]);
    let healthy = Track::from_events_unchecked(vec![
        TimedEvent::new(100, Event::note_on(2, 64, 100)),
        TimedEvent::new(200, Event::note_off(2, 64)),
    ]);
    let multitrack = MultiTrack::from_tracks(vec![Track::new(), broken, healthy], 480);
    let (sequencer, handle, sink, notifications) = manual(multitrack);
    sequencer.start().expect("start");
    handle.fire_range(0, 600, 10);

    let dispatched: Vec<_> = sink
        .events()
        .into_iter()
        .map(|(_, timed)| (timed.time, timed.event.channel()))
        .collect();
    assert_eq!(
        dispatched,
        vec![
            (0, Some(1)),
            (100, Some(2)),
            (200, Some(2)),
            (300, Some(1)),
            (400, Some(1)),
        ]
    );
    assert!(
        sink.events()
            .iter()
            .all(|(_, timed)| timed.event != Event::control_change(1, 7, 1))
    );
    assert!(!sequencer.is_playing());

    let faults: Vec<_> = notifications
        .try_iter()
        .filter(|notification| matches!(notification, Notification::DataFault { .. }))
        .collect();
    assert_eq!(
        faults,
        vec![Notification::DataFault {
            track: 1,
            skipped: 1,
            at: 300
        }]
    );
}
