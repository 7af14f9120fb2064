//! Error types for the power timer engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{PowerAction, TimerId};

/// A single timer record in the timer file could not be accepted.
///
/// Only the offending record is dropped; the rest of the file still loads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// `timertype` is not one of the known names.
    #[error("Unknown timer type: {0:?}")]
    UnknownTimerType(String),

    /// `afterevent` is not one of the known names.
    #[error("Unknown after event: {0:?}")]
    UnknownAfterEvent(String),

    /// `autosleeprepeat` is neither "once" nor "repeated".
    #[error("Unknown auto sleep repeat mode: {0:?}")]
    UnknownAutoSleepRepeat(String),

    /// A required attribute is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// An attribute has the wrong shape.
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// The timer file as a whole could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("Malformed timer file: {0}")]
    Malformed(String),

    #[error("Timer file has no 'timers' list")]
    MissingTimers,
}

/// Reading or writing the timer file failed.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode timer file: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by the host collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("Power action '{action}' failed: {reason}")]
    PowerActionFailed { action: PowerAction, reason: String },
}

/// Errors from timer queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Timer not found: {0}")]
    TimerNotFound(TimerId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, QueueError>;
