use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::BoundingBox;

/// Errors surfaced by the segmentation engine
#[derive(Debug, Error)]
pub enum SegmentError {
    /// Input bytes are not a readable image
    #[error("failed to decode image: {0}")]
    Decode(String),

    /// Detector/filter internal failure
    #[error("panel segmentation failed: {0}")]
    Processing(String),

    /// A panel box fell outside the page. Indicates a bug between filter and cropper.
    #[error("panel box {bbox:?} lies outside the {width}x{height} page")]
    Crop {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },

    /// No image-processing backend is usable in this environment
    #[error("image processing backend unavailable: {0}")]
    Unavailable(String),

    #[error("segmentation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SegmentError>;

/// Coarse error category, stable across process boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Decode,
    Processing,
    Crop,
    Unavailable,
    Timeout,
    Config,
}

impl SegmentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SegmentError::Decode(_) => ErrorKind::Decode,
            SegmentError::Processing(_) => ErrorKind::Processing,
            SegmentError::Crop { .. } => ErrorKind::Crop,
            SegmentError::Unavailable(_) => ErrorKind::Unavailable,
            SegmentError::Timeout(_) => ErrorKind::Timeout,
            SegmentError::InvalidConfig(_) => ErrorKind::Config,
        }
    }

    /// True when the caller sent something unusable (4xx-style)
    pub fn is_client_error(&self) -> bool {
        matches!(self, SegmentError::Decode(_))
    }

    /// Process exit status used by the CLI for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Decode => 2,
            ErrorKind::Unavailable => 3,
            ErrorKind::Timeout => 4,
            ErrorKind::Config => 5,
            ErrorKind::Processing | ErrorKind::Crop => 1,
        }
    }
}

/// Serializable error form written by the worker binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub error: String,
}

impl From<&SegmentError> for ErrorReport {
    fn from(err: &SegmentError) -> Self {
        Self {
            kind: err.kind(),
            error: err.to_string(),
        }
    }
}

impl ErrorReport {
    /// Rebuild a typed error on the calling side of a process boundary.
    /// Crop details don't survive the trip, so they come back as processing failures.
    pub fn into_error(self) -> SegmentError {
        match self.kind {
            ErrorKind::Decode => SegmentError::Decode(self.error),
            ErrorKind::Processing | ErrorKind::Crop => SegmentError::Processing(self.error),
            ErrorKind::Unavailable => SegmentError::Unavailable(self.error),
            // The report does not carry the budget
            ErrorKind::Timeout => SegmentError::Timeout(Duration::ZERO),
            ErrorKind::Config => SegmentError::InvalidConfig(self.error),
        }
    }
}
