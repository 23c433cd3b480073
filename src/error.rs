//! Unified error handling for the route-overlay library.
//!
//! Most failures during a render are not errors from the caller's point of
//! view (a missing stream or an empty place search just means less to draw),
//! so only contract violations and I/O surface here.

use thiserror::Error;

/// Unified error type for route-overlay operations.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// Encoded polyline ended mid-chunk or contained an invalid byte
    #[error("Malformed polyline at byte {position}")]
    MalformedPolyline { position: usize },

    /// Route has too few points to draw
    #[error("Route has {point_count} points, minimum {minimum_required} required")]
    InsufficientPoints {
        point_count: usize,
        minimum_required: usize,
    },

    /// GPS stream arrays disagree in length or timestamps go backwards
    #[error("Invalid GPS stream: {message}")]
    InvalidStream { message: String },

    /// Canvas cannot hold a projection
    #[error("Invalid canvas size {width}x{height}")]
    InvalidCanvas { width: u32, height: u32 },

    /// Non-success HTTP status from an upstream API
    #[error("HTTP error ({status}): {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (connect, timeout, body decode)
    #[error("Request error: {message}")]
    Request { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Font could not be parsed
    #[error("Font error: {message}")]
    Font { message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for OverlayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => OverlayError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => OverlayError::Request {
                message: err.to_string(),
            },
        }
    }
}

impl OverlayError {
    /// True for failures worth retrying later (network, rate limit, server side).
    pub fn is_transient(&self) -> bool {
        match self {
            OverlayError::Request { .. } => true,
            OverlayError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Result type alias for route-overlay operations.
pub type Result<T> = std::result::Result<T, OverlayError>;

/// Extension trait for converting Option to OverlayError.
pub trait OptionExt<T> {
    /// Convert Option to Result with insufficient points error.
    fn ok_or_insufficient_points(self, point_count: usize, minimum: usize) -> Result<T>;

    /// Convert Option to Result with an invalid stream error.
    fn ok_or_invalid_stream(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_insufficient_points(self, point_count: usize, minimum: usize) -> Result<T> {
        self.ok_or(OverlayError::InsufficientPoints {
            point_count,
            minimum_required: minimum,
        })
    }

    fn ok_or_invalid_stream(self, message: &str) -> Result<T> {
        self.ok_or_else(|| OverlayError::InvalidStream {
            message: message.to_string(),
        })
    }
}
