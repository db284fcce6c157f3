use tickseq_core::{
    DropAll, Event, ManualTickDriver, MultiTrack, NullNotifier, Pipeline, ProgramDeduplicator,
    Rechannelizer, RecordingSink, Sequencer, SequencerConfig, Transposer, VelocityScaler,
};

fn one_note() -> MultiTrack {
    let mut multitrack = MultiTrack::new(2, 480);
    multitrack
        .push_event(0, 0, Event::tempo(120.0))
        .expect("tempo");
    multitrack
        .push_event(1, 0, Event::note_on(0, 60, 100))
        .expect("note on");
    multitrack
        .push_event(1, 960, Event::note_off(0, 60))
        .expect("note off");
    multitrack
}

#[test]
fn transposed_note_is_released_at_its_sounding_key() {
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        one_note(),
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig::default(),
    );
    sequencer
        .set_processor(1, Some(Pipeline::new().with_stage(Transposer::new(12))))
        .expect("track 1 exists");
    sequencer.start().expect("start");
    handle.fire(0);
    sequencer.stop();

    let events: Vec<_> = sink.events().into_iter().map(|(_, timed)| timed.event).collect();
    assert_eq!(
        events,
        vec![Event::note_on(0, 72, 100), Event::note_off(0, 72)]
    );
}

#[test]
fn chained_stages_apply_in_order() {
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        one_note(),
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig::default(),
    );
    let pipeline = Pipeline::new()
        .with_stage(Rechannelizer::all_to(9))
        .with_stage(Transposer::new(-24))
        .with_stage(VelocityScaler::new(50));
    assert_eq!(pipeline.len(), 3);
    sequencer
        .set_processor(1, Some(pipeline))
        .expect("track 1 exists");
    sequencer.start().expect("start");
    handle.fire_range(0, 1_100, 10);

    let events: Vec<_> = sink.events().into_iter().map(|(_, timed)| timed.event).collect();
    assert_eq!(
        events,
        vec![Event::note_on(9, 36, 50), Event::note_off(9, 36)]
    );
}

#[test]
fn dropping_pipeline_silences_track_but_not_its_state() {
    let mut multitrack = one_note();
    multitrack
        .insert_event(1, 0, Event::program_change(0, 12))
        .expect("program");
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        multitrack,
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig::default(),
    );
    sequencer
        .set_processor(1, Some(Pipeline::new().with_stage(DropAll)))
        .expect("track 1 exists");
    sequencer.start().expect("start");
    handle.fire_range(0, 1_100, 10);

    assert!(sink.is_empty());
    let state = sequencer.track_state(1).expect("track 1");
    assert_eq!(state.program, Some(12));
}

#[test]
fn stateful_stage_is_replayed_on_seek_without_chasing() {
    let mut multitrack = one_note();
    multitrack
        .insert_event(1, 0, Event::program_change(0, 5))
        .expect("program");
    multitrack
        .insert_event(1, 1_200, Event::program_change(0, 5))
        .expect("repeated program");
    multitrack
        .insert_event(1, 1_440, Event::program_change(0, 6))
        .expect("new program");
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        multitrack,
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig {
            chase_on_seek: false,
            chase_on_resume: false,
            ..SequencerConfig::default()
        },
    );
    sequencer
        .set_processor(1, Some(Pipeline::new().with_stage(ProgramDeduplicator::new())))
        .expect("track 1 exists");

    // the deduplicator still sees the skipped program change
    sequencer.go_to_time(1_000).expect("in range");
    sequencer.start().expect("start");
    handle.fire_range(0, 600, 10);

    let events: Vec<_> = sink.events().into_iter().map(|(_, timed)| timed.event).collect();
    assert_eq!(events, vec![Event::program_change(0, 6)]);
}

#[test]
fn resume_after_seek_sends_program_through_deduplicator() {
    let mut multitrack = MultiTrack::new(2, 480);
    multitrack
        .push_event(0, 0, Event::tempo(120.0))
        .expect("tempo");
    for (time, event) in [
        (0, Event::program_change(0, 5)),
        (0, Event::note_on(0, 60, 100)),
        (960, Event::note_off(0, 60)),
        (1_200, Event::note_on(0, 62, 100)),
        (1_440, Event::note_off(0, 62)),
    ] {
        multitrack.push_event(1, time, event).expect("ordered push");
    }
    let sink = RecordingSink::new();
    let (driver, handle) = ManualTickDriver::new();
    let sequencer = Sequencer::new(
        multitrack,
        driver,
        sink.clone(),
        NullNotifier,
        SequencerConfig::default(),
    );
    sequencer
        .set_processor(1, Some(Pipeline::new().with_stage(ProgramDeduplicator::new())))
        .expect("track 1 exists");

    sequencer.go_to_time(1_000).expect("in range");
    sequencer.start().expect("start");
    handle.fire_range(0, 2_000, 10);

    let dispatched: Vec<_> = sink.events().into_iter().map(|(_, timed)| timed).collect();
    assert_eq!(dispatched[0].time, 1_000);
    let events: Vec<_> = dispatched.into_iter().map(|timed| timed.event).collect();
    assert_eq!(
        events,
        vec![
            Event::program_change(0, 5),
            Event::note_on(0, 62, 100),
            Event::note_off(0, 62),
        ]
    );
    assert_eq!(
        sequencer.track_state(1).expect("track 1").program,
        Some(5)
    );
}
