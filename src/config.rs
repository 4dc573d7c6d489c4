//! Recorder configuration
//!
//! `Config` carries the operating flags of one session. The command line
//! fills it in; an optional JSON file only supplies defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transcript::CaptureMode;

/// Default transcript file name
pub const DEFAULT_OUTPUT: &str = "typescript";

/// Default flush interval in seconds
pub const DEFAULT_FLUSH_INTERVAL: u64 = 30;

/// Largest flush interval that still fits a poll(2) timeout
pub const MAX_FLUSH_INTERVAL: u64 = (i32::MAX / 1000) as u64;

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Append to the transcript instead of truncating it
    pub append: bool,
    /// Seconds between transcript flushes (0 = flush every iteration)
    pub flush_interval: u64,
    /// Record keystrokes sent to the child instead of its output
    pub raw_capture: bool,
    /// Suppress banners and console messages
    pub quiet: bool,
    /// Flush after every loop iteration regardless of the interval
    pub force_flush: bool,
    /// Write the binary timestamped record instead of a plain transcript
    pub timestamped: bool,
    /// Transcript path
    pub output_path: PathBuf,
    /// Command to run; empty means the user's shell
    pub command: Vec<String>,
    /// Shell to use instead of $SHELL / the account database
    pub shell: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            append: false,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            raw_capture: false,
            quiet: false,
            force_flush: false,
            timestamped: false,
            output_path: PathBuf::from(DEFAULT_OUTPUT),
            command: Vec::new(),
            shell: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location or return the defaults
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("ignoring {}: {}", path.display(), e);
                Self::default()
            },
        }
    }

    /// Check the constraints the session relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval > MAX_FLUSH_INTERVAL {
            return Err(ConfigError::InvalidFlushInterval(self.flush_interval));
        }
        Ok(())
    }

    /// Which stream ends up in the transcript, and how
    pub fn capture_mode(&self) -> CaptureMode {
        if self.timestamped {
            CaptureMode::Stamped
        } else if self.raw_capture {
            CaptureMode::Input
        } else {
            CaptureMode::Output
        }
    }

    /// The flush interval as a duration
    pub fn flush_period(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }
}

/// Get the defaults file path
fn default_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("scripter").join("config.json"))
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("flush interval {0}s is too large (max {}s)", MAX_FLUSH_INTERVAL)]
    InvalidFlushInterval(u64),
}
