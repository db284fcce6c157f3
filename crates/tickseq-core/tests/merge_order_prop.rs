use proptest::prelude::*;
use tickseq_core::{Event, Merge, MultiTrack, Tick};

fn build(tracks: &[Vec<Tick>], shifts: &[i64]) -> MultiTrack {
    let mut multitrack = MultiTrack::new(tracks.len(), 480);
    for (index, times) in tracks.iter().enumerate() {
        let mut times = times.clone();
        times.sort_unstable();
        for (ordinal, time) in times.into_iter().enumerate() {
            let key = u8::try_from(ordinal % 128).expect("key fits");
            multitrack
                .push_event(index, time, Event::note_on(0, key, 100))
                .expect("sorted pushes are monotonic");
        }
        let shift = shifts.get(index).copied().unwrap_or(0);
        multitrack
            .set_time_shift(index, shift)
            .expect("track exists");
    }
    multitrack
}

fn track_times() -> impl Strategy<Value = Vec<Vec<Tick>>> {
    prop::collection::vec(prop::collection::vec(0u64..2_000, 0..30), 1..6)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn merged_times_never_decrease_and_ties_follow_track_order(
        tracks in track_times(),
        shifts in prop::collection::vec(-500i64..500, 6),
    ) {
        let multitrack = build(&tracks, &shifts);
        let merged: Vec<(Tick, usize)> = Merge::new(&multitrack)
            .map(|item| (item.time, item.track))
            .collect();

        prop_assert_eq!(merged.len(), multitrack.num_events());
        for pair in merged.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{:?} then {:?}", pair[0], pair[1]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn seek_then_drain_is_the_suffix_of_a_full_drain(
        tracks in track_times(),
        target in 0u64..2_100,
    ) {
        let multitrack = build(&tracks, &[]);
        let full: Vec<_> = Merge::new(&multitrack)
            .map(|item| (item.time, item.track, item.event.clone()))
            .collect();
        let expected: Vec<_> = full
            .iter()
            .skip_while(|(time, _, _)| *time < target)
            .cloned()
            .collect();

        let sought: Vec<_> = Merge::starting_at(&multitrack, target)
            .map(|item| (item.time, item.track, item.event.clone()))
            .collect();
        prop_assert_eq!(sought, expected);

        // seeking back to the origin restores the full drain
        let mut merge = Merge::starting_at(&multitrack, target);
        merge.seek(0);
        prop_assert_eq!(merge.count(), full.len());
    }
}
