pub mod config;
pub mod diagnostics;
pub mod event;
pub mod fixtures;
pub mod merge;
pub mod multitrack;
pub mod notifier;
pub mod processor;
pub mod sequencer;
pub mod sink;
pub mod smf;
pub mod state;
pub mod tempo;
pub mod tick;
pub mod track;

pub use config::{AppConfig, DiagnosticsConfig, SequencerConfig};
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use event::{Event, MetaEvent, Tick, TimedEvent};
pub use merge::{DataFault, Merge, MergeCursor, MergeItem};
pub use multitrack::{DEFAULT_PPQ, MultiTrack};
pub use notifier::{
    ChannelNotifier, Notification, Notifier, NullNotifier, TracingNotifier, TransportChange,
};
pub use processor::{
    ChannelFilter, DropAll, DropWhere, Pipeline, Processor, ProgramDeduplicator, Rechannelizer,
    Transposer, VelocityScaler,
};
pub use sequencer::{ErrorClass, Sequencer, SequencerError};
pub use sink::{ChannelSink, EventSink, NullSink, RecordingSink, TracingSink};
pub use state::{
    ConductorChange, ConductorState, NoteMatrix, PlayStatus, RepeatLoop, SequencerSnapshot,
    TrackControls, TrackState,
};
pub use tempo::{MeterMap, MusicalPosition, TempoMap};
pub use tick::{ManualTickDriver, ManualTickHandle, ThreadTickDriver, TickCallback, TickDriver, TickError};
pub use track::{EditError, PortId, Track};
