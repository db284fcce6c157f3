use std::{
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tickseq_core::{
    AppConfig, MultiTrack, NullSink, Sequencer, ThreadTickDriver, TracingNotifier, TracingSink,
    diagnostics::init_tracing,
    event::{Event, MetaEvent},
    fixtures::demo_multitrack,
    smf::load_smf,
    tempo::{MeterMap, MeterSegment, TempoMap, TempoSegment},
};

#[derive(Debug, Parser)]
#[command(name = "tickseq-cli")]
#[command(about = "Headless playback and inspection for tickseq sequences")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Explicit config file; otherwise tickseq.config.toml is discovered.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Log to the session file only.
    #[arg(long)]
    quiet: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Play the demo or a .mid file through the thread tick driver.
    Play {
        #[arg(long)]
        file: Option<PathBuf>,

        #[arg(long, default_value_t = 5.0)]
        seconds: f64,

        #[arg(long, default_value_t = 1.0)]
        tempo_scale: f64,

        /// Zero-based first measure of the repeat range.
        #[arg(long, requires = "repeat_end")]
        repeat_start: Option<u32>,

        /// Zero-based measure the repeat range ends before.
        #[arg(long, requires = "repeat_start")]
        repeat_end: Option<u32>,

        #[arg(long, value_enum, default_value = "tracing")]
        sink: SinkArg,
    },
    /// Print track summary and tempo map as JSON.
    Inspect {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum SinkArg {
    Tracing,
    Null,
}

#[derive(Debug, Serialize)]
struct TrackSummary {
    index: usize,
    name: Option<String>,
    events: usize,
    end_time: u64,
    out_port: Option<u16>,
    time_shift: i64,
}

#[derive(Debug, Serialize)]
struct SequenceSummary {
    ticks_per_beat: u16,
    end_time: u64,
    end_time_ms: f64,
    tracks: Vec<TrackSummary>,
    tempo: Vec<TempoSegment>,
    meter: Vec<MeterSegment>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<(AppConfig, bool)> {
    match path {
        Some(path) => Ok((AppConfig::from_path(path)?, true)),
        None => Ok(AppConfig::load()
            .map_or_else(|_| (AppConfig::default(), false), |config| (config, true))),
    }
}

fn load_sequence(file: Option<&Path>) -> anyhow::Result<MultiTrack> {
    match file {
        Some(path) => load_smf(path),
        None => demo_multitrack().context("failed to build demo sequence"),
    }
}

fn summarize(multitrack: &MultiTrack) -> SequenceSummary {
    let tempo = TempoMap::from_multitrack(multitrack);
    let meter = MeterMap::from_multitrack(multitrack);
    let tracks = multitrack
        .tracks()
        .iter()
        .enumerate()
        .map(|(index, track)| TrackSummary {
            index,
            name: track.events().iter().find_map(|timed| match &timed.event {
                Event::Meta(MetaEvent::TrackName(name)) => Some(name.clone()),
                _ => None,
            }),
            events: track.len(),
            end_time: track.end_time(),
            out_port: track.out_port().map(|port| port.0),
            time_shift: track.time_shift(),
        })
        .collect();
    SequenceSummary {
        ticks_per_beat: multitrack.ticks_per_beat(),
        end_time: multitrack.end_time(),
        end_time_ms: tempo.ticks_to_ms(multitrack.end_time()),
        tracks,
        tempo: tempo.segments().to_vec(),
        meter: meter.segments().to_vec(),
    }
}

fn play(
    config: &AppConfig,
    multitrack: MultiTrack,
    seconds: f64,
    tempo_scale: f64,
    repeat: Option<(u32, u32)>,
    sink: &SinkArg,
) -> anyhow::Result<()> {
    let sequencer = match sink {
        SinkArg::Tracing => Sequencer::new(
            multitrack,
            ThreadTickDriver::new(),
            TracingSink,
            TracingNotifier,
            config.sequencer.clone(),
        ),
        SinkArg::Null => Sequencer::new(
            multitrack,
            ThreadTickDriver::new(),
            NullSink,
            TracingNotifier,
            config.sequencer.clone(),
        ),
    };
    sequencer.set_tempo_scale(tempo_scale)?;
    if let Some((start, end)) = repeat {
        sequencer.set_repeat_play_measures(true, start, end)?;
    }
    if !sequencer.start()? {
        tracing::warn!("sequence is empty; nothing played");
        return Ok(());
    }

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < deadline && sequencer.is_playing() {
        thread::sleep(Duration::from_millis(20));
    }
    sequencer.stop();

    let snapshot = sequencer.snapshot();
    println!(
        "{}",
        serde_json::to_string_pretty(&snapshot).context("failed to encode final position")?
    );
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (mut config, found) = load_config(cli.config.as_deref())?;
    if let Some(log_dir) = cli.log_dir {
        config.diagnostics.log_dir = log_dir;
    }
    if cli.quiet {
        config.diagnostics.stdout = false;
    }
    let _telemetry = init_tracing(&config.diagnostics)?;
    if !found {
        tracing::warn!("no tickseq.config.toml found; using defaults");
    }

    match cli.command {
        Commands::Play {
            file,
            seconds,
            tempo_scale,
            repeat_start,
            repeat_end,
            sink,
        } => {
            let multitrack = load_sequence(file.as_deref())?;
            let repeat = repeat_start.zip(repeat_end);
            play(&config, multitrack, seconds, tempo_scale, repeat, &sink)?;
        }
        Commands::Inspect { file } => {
            let multitrack = load_sequence(file.as_deref())?;
            let summary = summarize(&multitrack);
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("failed to encode summary")?
            );
        }
    }

    Ok(())
}
