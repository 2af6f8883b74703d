//! Telemetry error types.

use thiserror::Error;

/// Errors raised by the telemetry pipeline.
///
/// None of these ever reach a git client; callers log them and move on.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Filesystem error while writing or cleaning up metrics files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The writer has been shut down.
    #[error("metrics writer closed")]
    Closed,
}
