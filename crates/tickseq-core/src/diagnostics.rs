use std::{fs, path::PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// One logging session. Dropping it flushes the JSON log, so hold it for
/// the life of the process.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_file: PathBuf,
    _writer: WorkerGuard,
}

fn session_file_name(prefix: &str, session_id: Uuid) -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let short: String = session_id.simple().to_string().chars().take(8).collect();
    format!("{prefix}-{stamp}-{short}.log")
}

/// Routes sequencer spans and events to a per-session JSON file and, unless
/// `stdout` is off, to a compact console view. `RUST_LOG` wins over the
/// configured filter. Only the first call installs a subscriber.
pub fn init_tracing(config: &DiagnosticsConfig) -> anyhow::Result<TelemetryGuard> {
    fs::create_dir_all(&config.log_dir).with_context(|| {
        format!("failed to create log directory: {}", config.log_dir.display())
    })?;

    let session_id = Uuid::new_v4();
    let file_name = session_file_name(&config.trace_file_prefix, session_id);
    let log_file = config.log_dir.join(&file_name);
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(&config.log_dir, file_name));

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.rust_log_filter));
    let console = config.stdout.then(|| {
        fmt::layer()
            .compact()
            .with_thread_names(true)
            .with_target(false)
    });
    let json = fmt::layer()
        .json()
        .with_ansi(false)
        .with_span_list(true)
        .with_writer(writer);

    match tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(json)
        .try_init()
    {
        Ok(()) => info!(%session_id, log_file = %log_file.display(), "session logging started"),
        Err(error) => warn!(?error, "tracing already installed, keeping it"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _writer: guard,
    })
}
