//! Error type shared by the trajectory store, snapshot builder and analysis routines.

use std::path::PathBuf;
use thiserror::Error;

/// Failure modes of the trajectory layer.
#[derive(Error, Debug)]
pub enum TrajectoryError {
    /// Underlying file I/O failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requested trajectory file does not exist.
    #[error("trajectory file '{0}' not found")]
    NotFound(PathBuf),

    /// The file exists but is not a valid trajectory store, or a frame is malformed.
    #[error("invalid trajectory data in '{path}': {message}")]
    Format { path: PathBuf, message: String },

    /// A frame record could not be encoded.
    #[error("failed to encode frame: {0}")]
    Encode(String),

    /// A frame record could not be decoded.
    #[error("failed to decode frame {frame}: {message}")]
    Decode { frame: usize, message: String },

    /// Frame index outside `0..frame_count`.
    #[error("frame index {index} out of bounds (store holds {frame_count} frames)")]
    OutOfBounds { index: usize, frame_count: usize },

    /// Operation not permitted in the mode the store was opened with.
    #[error("operation '{operation}' not permitted on a store opened in {mode} mode")]
    WrongMode {
        operation: &'static str,
        mode: &'static str,
    },

    /// Caller violated a documented precondition.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// Too few frames remain after windowing for the requested derivation.
    #[error("need at least {required} frames in the analysis window, found {found}")]
    InsufficientFrames { required: usize, found: usize },

    /// A least-squares fit could not be performed on the supplied data.
    #[error("fit failed: {0}")]
    Fit(String),

    /// Run configuration could not be read or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl TrajectoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            TrajectoryError::NotFound(path)
        } else {
            TrajectoryError::Io { path, source }
        }
    }

    pub(crate) fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        TrajectoryError::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn precondition(message: impl Into<String>) -> Self {
        TrajectoryError::Precondition(message.into())
    }
}

pub type Result<T> = std::result::Result<T, TrajectoryError>;
