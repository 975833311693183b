//! Tracing subscriber setup for the CLI.
//!
//! Progress goes to stderr, filtered by `RUST_LOG` (default `info`). When a
//! log directory is given, the same events are also appended without ANSI
//! colours to a timestamped file inside it.

use std::fs::File;
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, TimeZone};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggingError {
    /// The log directory or file could not be created.
    #[error("failed to create log file in {dir}: {source}")]
    File {
        /// Requested log directory.
        dir: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Install(String),
}

/// Returns the log file name for a run started at `now`.
#[must_use]
pub fn log_file_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    format!("skylark-{}.log", now.format("%Y-%m-%d_%H-%M-%S"))
}

/// Creates `dir` if needed and opens a fresh log file inside it.
///
/// # Errors
///
/// Returns [`LoggingError::File`] when the directory or file cannot be
/// created.
pub fn open_log_file(dir: &Utf8Path, file_name: &str) -> Result<(Utf8PathBuf, File), LoggingError> {
    let file_error = |source| LoggingError::File {
        dir: dir.to_path_buf(),
        source,
    };
    Dir::create_ambient_dir_all(dir, ambient_authority()).map_err(file_error)?;
    let handle = Dir::open_ambient_dir(dir, ambient_authority()).map_err(file_error)?;
    let file = handle.create(file_name).map_err(file_error)?;
    Ok((dir.join(file_name), file.into_std()))
}

/// Installs the global subscriber.
///
/// Returns the path of the log file when `log_dir` is set.
///
/// # Errors
///
/// Returns [`LoggingError`] when the log file cannot be created or a
/// subscriber is already installed.
pub fn init(log_dir: Option<&Utf8Path>) -> Result<Option<Utf8PathBuf>, LoggingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (path, file_layer) = match log_dir {
        Some(dir) => {
            let (path, file) = open_log_file(dir, &log_file_name(&chrono::Local::now()))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file));
            (Some(path), Some(layer))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))?;
    Ok(path)
}
