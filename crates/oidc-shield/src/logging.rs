//! Logging bootstrap for hosts embedding the shield
//!
//! The engine itself only emits `tracing` events; audit records use the
//! `audit::oidc` target so they can be routed separately:
//!
//! ```text
//! RUST_LOG=info,audit::oidc=warn
//! ```
//!
//! File output is non-blocking, so the returned guard **must be held** for as
//! long as logs should be flushed.
//!
//! ```rust,no_run
//! use oidc_shield::LoggingConfig;
//!
//! let _guard = LoggingConfig::production("/var/log/oidc-shield").init()?;
//! # Ok::<(), std::io::Error>(())
//! ```

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Where log lines go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOutput {
    /// No subscriber is installed
    None,
    /// Standard error only
    #[default]
    Stderr,
    /// Rolling file only
    FileOnly,
    /// Standard error and rolling file
    Both,
}

/// Log file rotation period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    /// Rotate every hour
    Hourly,
    /// Rotate every day
    Daily,
    /// Single file
    #[default]
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub structured: bool,
    /// Output target
    pub output: LogOutput,
    /// Directory for file output
    pub directory: Option<PathBuf>,
    /// File name prefix for file output
    pub file_prefix: String,
    /// Rotation period for file output
    pub rotation: LogRotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            structured: true,
            output: LogOutput::Stderr,
            directory: None,
            file_prefix: "oidc-shield".to_string(),
            rotation: LogRotation::Never,
        }
    }
}

/// Guard that flushes buffered file logs on drop
#[derive(Debug)]
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

impl LoggingConfig {
    /// Human-readable debug output on stderr
    pub fn stderr_debug() -> Self {
        Self {
            level: "debug".to_string(),
            structured: false,
            ..Self::default()
        }
    }

    /// JSON output on stderr and an hourly rotated file
    pub fn production(directory: impl Into<PathBuf>) -> Self {
        Self {
            level: "info".to_string(),
            structured: true,
            output: LogOutput::Both,
            directory: Some(directory.into()),
            file_prefix: "oidc-shield".to_string(),
            rotation: LogRotation::Hourly,
        }
    }

    /// Install the global subscriber
    ///
    /// Returns `Some(LoggingGuard)` when file output is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if file output lacks a directory, the directory cannot
    /// be created, or a global subscriber is already installed.
    pub fn init(&self) -> io::Result<Option<LoggingGuard>> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.output {
            LogOutput::None => Ok(None),
            LogOutput::Stderr => {
                let subscriber = tracing_subscriber::registry().with(filter);
                let result = if self.structured {
                    subscriber
                        .with(fmt::layer().json().with_writer(io::stderr))
                        .try_init()
                } else {
                    subscriber
                        .with(fmt::layer().with_writer(io::stderr))
                        .try_init()
                };
                result.map_err(|e| io::Error::other(e.to_string()))?;
                Ok(None)
            }
            LogOutput::FileOnly | LogOutput::Both => {
                let dir = self.directory.as_deref().ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "File logging requires a directory",
                    )
                })?;
                self.init_file(dir, filter).map(Some)
            }
        }
    }

    fn init_file(&self, dir: &Path, filter: EnvFilter) -> io::Result<LoggingGuard> {
        std::fs::create_dir_all(dir)?;

        let appender = match self.rotation {
            LogRotation::Hourly => tracing_appender::rolling::hourly(dir, &self.file_prefix),
            LogRotation::Daily => tracing_appender::rolling::daily(dir, &self.file_prefix),
            LogRotation::Never => tracing_appender::rolling::never(dir, &self.file_prefix),
        };
        let (file_writer, guard) = tracing_appender::non_blocking(appender);

        let subscriber = tracing_subscriber::registry().with(filter);
        let result = match (self.output, self.structured) {
            (LogOutput::Both, true) => subscriber
                .with(fmt::layer().json().with_writer(file_writer.and(io::stderr)))
                .try_init(),
            (LogOutput::Both, false) => subscriber
                .with(fmt::layer().with_writer(file_writer.and(io::stderr)))
                .try_init(),
            (_, true) => subscriber
                .with(fmt::layer().json().with_writer(file_writer))
                .try_init(),
            (_, false) => subscriber
                .with(fmt::layer().with_writer(file_writer))
                .try_init(),
        };
        result.map_err(|e| io::Error::other(e.to_string()))?;

        Ok(LoggingGuard { _file_guard: guard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_presets() {
        let config = LoggingConfig::default();
        assert_eq!(config.output, LogOutput::Stderr);
        assert!(config.directory.is_none());

        let config = LoggingConfig::stderr_debug();
        assert_eq!(config.level, "debug");
        assert!(!config.structured);

        let config = LoggingConfig::production("/var/log/shield");
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.rotation, LogRotation::Hourly);
    }

    #[test]
    fn test_file_output_requires_directory() {
        let config = LoggingConfig {
            output: LogOutput::FileOnly,
            directory: None,
            ..LoggingConfig::default()
        };
        let err = config.init().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_none_output_installs_nothing() {
        let config = LoggingConfig {
            output: LogOutput::None,
            ..LoggingConfig::default()
        };
        assert!(config.init().unwrap().is_none());
    }
}
