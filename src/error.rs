use std::fmt;

use thiserror::Error;

use crate::types::FacingMode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionErrorKind {
    /// No device satisfies the requested constraints.
    NotFound,
    PermissionDenied,
    Unavailable,
}

impl fmt::Display for AcquisitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AcquisitionErrorKind::NotFound => "requested device not found, change the settings",
            AcquisitionErrorKind::PermissionDenied => "access to the device was denied",
            AcquisitionErrorKind::Unavailable => "frame source unavailable",
        };
        f.write_str(text)
    }
}

/// Failure to open a frame source. Never fatal to the render loop.
#[derive(Clone, Debug, Error)]
#[error("{kind}: {message}")]
pub struct AcquisitionError {
    pub kind: AcquisitionErrorKind,
    pub message: String,
}

impl AcquisitionError {
    pub fn new(kind: AcquisitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(facing: FacingMode) -> Self {
        Self::new(
            AcquisitionErrorKind::NotFound,
            format!("no {facing}-facing source available"),
        )
    }

    /// Classifies a backend error by its message; capture backends only hand
    /// back strings for permission problems.
    pub fn from_backend(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        let lowered = message.to_ascii_lowercase();
        let kind = if lowered.contains("permission")
            || lowered.contains("denied")
            || lowered.contains("not authorized")
        {
            AcquisitionErrorKind::PermissionDenied
        } else if lowered.contains("not found") || lowered.contains("no such") {
            AcquisitionErrorKind::NotFound
        } else {
            AcquisitionErrorKind::Unavailable
        };
        Self::new(kind, message)
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("no frame has been rendered yet")]
    NothingRendered,
    #[error("no pattern tile has been composed yet")]
    PatternMissing,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("failed to encode png: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write export: {0}")]
    Io(#[from] std::io::Error),
    #[error("render loop is no longer running")]
    LoopUnavailable,
}

/// Broken setup contract; ends the render loop.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("render invariant violated: {0}")]
    InvariantViolation(String),
}
