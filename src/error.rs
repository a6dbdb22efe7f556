use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failures that abort a capture sequence.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The filesystem refused access to a session directory or image file.
    #[error("permission denied while trying to {action} {}", .path.display())]
    PermissionDenied {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Any other filesystem failure (disk full, missing parent, encode error).
    #[error("storage error while trying to {action} {}: {source}", .path.display())]
    Storage {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The camera could not deliver a frame.
    #[error("camera failure: {0:#}")]
    Camera(anyhow::Error),

    /// `start_sequence` was requested while a sequence is already running.
    #[error("a capture sequence is already running")]
    SequenceActive,
}

impl CaptureError {
    /// Classify an I/O error raised while touching `path`.
    pub fn from_io(action: &'static str, path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            CaptureError::PermissionDenied {
                action,
                path: path.to_path_buf(),
                source,
            }
        } else {
            CaptureError::Storage {
                action,
                path: path.to_path_buf(),
                source,
            }
        }
    }

    /// Translation key used when the failure is surfaced on screen.
    pub fn message_key(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied { .. } => "capture_error_permission",
            CaptureError::Storage { .. } => "capture_error_storage",
            CaptureError::Camera(_) => "capture_error_camera",
            CaptureError::SequenceActive => "capture_error_busy",
        }
    }
}

/// Coarse classification written to the session attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    InvalidRecipient,
    Authentication,
    Connection,
    Timeout,
    Rejected,
    Remote,
    Io,
    Configuration,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::InvalidRecipient => "invalid-recipient",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Connection => "connection",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Rejected => "rejected",
            ErrorClass::Remote => "remote",
            ErrorClass::Io => "io",
            ErrorClass::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A delivery backend failure, already caught at the backend boundary.
#[derive(Debug, Clone, Error)]
#[error("{class}: {message}")]
pub struct DeliveryError {
    pub class: ErrorClass,
    pub message: String,
}

impl DeliveryError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn io(context: &str, err: &io::Error) -> Self {
        Self::new(ErrorClass::Io, format!("{context}: {err}"))
    }
}
