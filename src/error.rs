//! Error taxonomy for the review client.
//!
//! Transport and service failures end a session in `Failed`; validation and
//! render-time problems stay at the boundary where they happen.

use std::time::Duration;

use crate::session::SessionPhase;

/// Result type for review operations
pub type Result<T> = std::result::Result<T, ReviewError>;

/// Banner shown for any transport, status or payload failure.
pub const GENERIC_FAILURE_MESSAGE: &str = "Error uploading or analyzing file. Please try again.";
pub const TIMEOUT_FAILURE_MESSAGE: &str = "Analysis timed out. Please try again.";
pub const CANCELLED_FAILURE_MESSAGE: &str = "Upload cancelled.";

/// Rejection of a candidate file before anything is sent.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("File size exceeds {}MB limit.", .limit / (1024 * 1024))]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid file type. Please upload MP4, MOV, or AVI.")]
    UnsupportedType { media_type: String },
}

/// Error types for review operations
#[derive(thiserror::Error, Debug)]
pub enum ReviewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Analysis service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed analysis response: {0}")]
    MalformedResponse(String),

    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Frame decode failed: {0}")]
    Decode(String),

    #[error("Cannot {event} while session is {from}")]
    InvalidTransition { from: SessionPhase, event: &'static str },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReviewError {
    /// Message safe to put on the session error banner.
    pub fn user_message(&self) -> &'static str {
        match self {
            ReviewError::Timeout(_) => TIMEOUT_FAILURE_MESSAGE,
            ReviewError::Cancelled => CANCELLED_FAILURE_MESSAGE,
            _ => GENERIC_FAILURE_MESSAGE,
        }
    }
}
