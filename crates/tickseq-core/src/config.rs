use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::track::PortId;

pub const CONFIG_FILE_NAME: &str = "tickseq.config.toml";
pub const CONFIG_PATH_ENV: &str = "TICKSEQ_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sequencer: SequencerConfig,
    pub diagnostics: DiagnosticsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub tick_interval_ms: u64,
    pub max_events_per_tick: usize,
    /// Replay skipped controller, program and meta events silently on seek.
    pub chase_on_seek: bool,
    /// Re-send remembered program, bend and controllers when resuming away
    /// from the origin or unmuting.
    pub chase_on_resume: bool,
    pub release_notes_on_stop: bool,
    /// Port for tracks without an explicit binding.
    pub default_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub rust_log_filter: String,
    pub trace_file_prefix: String,
    pub log_dir: PathBuf,
    /// Mirror logs to the console as well as the session file.
    pub stdout: bool,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1,
            max_events_per_tick: 100,
            chase_on_seek: true,
            chase_on_resume: true,
            release_notes_on_stop: true,
            default_port: 0,
        }
    }
}

impl SequencerConfig {
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    #[must_use]
    pub fn default_port(&self) -> PortId {
        PortId(self.default_port)
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rust_log_filter: "info,tickseq_core=debug".to_string(),
            trace_file_prefix: "tickseq".to_string(),
            log_dir: PathBuf::from("logs"),
            stdout: true,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = discover_config_path().with_context(|| {
            format!("failed to locate {CONFIG_FILE_NAME}; looked in cwd and parent directory")
        })?;
        Self::from_path(&config_path)
    }

    pub fn from_path(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;

        let config: AppConfig = toml::from_str(&content).with_context(|| {
            format!("failed to parse config TOML from {}", config_path.display())
        })?;

        Ok(config)
    }
}

fn discover_config_path() -> Result<PathBuf> {
    if let Some(path) = env::var_os(CONFIG_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
    }

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let candidates = [
        cwd.join(CONFIG_FILE_NAME),
        cwd.join("..").join(CONFIG_FILE_NAME),
    ];

    candidates
        .into_iter()
        .find(|path| path.is_file())
        .ok_or_else(|| anyhow::anyhow!("{CONFIG_FILE_NAME} not found"))
}
