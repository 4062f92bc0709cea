//! Domain error kinds.
//!
//! Plumbing code returns `anyhow::Result` with context. The types here are the
//! few failures a caller is expected to match on: camera-side failures
//! (`CaptureError`), persistence failures (`SaveError`), and what the pipeline
//! surfaces from its command surface (`PipelineError`).

use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::CameraId;

/// Coarse classification recorded on a session as its last error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    DeviceUnavailable,
    CaptureFailed,
    NoSaveLocationConfigured,
    DirectoryCreateFailed,
    WriteFailed,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera {camera_id} unavailable: {reason}")]
    DeviceUnavailable { camera_id: CameraId, reason: String },
    #[error("capture failed on camera {camera_id}: {reason}")]
    CaptureFailed { camera_id: CameraId, reason: String },
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            CaptureError::CaptureFailed { .. } => ErrorKind::CaptureFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("no image save location configured")]
    NoSaveLocationConfigured,
    #[error("failed to create save directory {}: {source}", path.display())]
    DirectoryCreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl SaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SaveError::NoSaveLocationConfigured => ErrorKind::NoSaveLocationConfigured,
            SaveError::DirectoryCreateFailed { .. } => ErrorKind::DirectoryCreateFailed,
            SaveError::WriteFailed { .. } => ErrorKind::WriteFailed,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("cannot {operation} while pipeline is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error("monitor runtime is not running")]
    RuntimeGone,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Error kind for camera-side failures; `None` for state and runtime errors.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            PipelineError::Capture(err) => Some(err.kind()),
            _ => None,
        }
    }
}
