//! Git transport error types.

use thiserror::Error;

/// Errors that can occur while relaying the git protocol.
#[derive(Debug, Error)]
pub enum GitError {
    /// Invalid pkt-line format.
    #[error("invalid pkt-line: {0}")]
    InvalidPktLine(String),

    /// Unknown smart HTTP service name.
    #[error("unsupported service: {0}")]
    UnsupportedService(String),

    /// The git binary could not be started.
    #[error("failed to start git {service}: {source}")]
    Spawn {
        /// Service that failed to start.
        service: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stdio pipe of the subprocess was not available.
    #[error("git {0} pipe unavailable")]
    PipeUnavailable(&'static str),

    /// Copying bytes to or from the subprocess failed mid-stream.
    #[error("git stream {direction} failed: {source}")]
    Stream {
        /// Which pipe failed ("stdin" or "stdout").
        direction: &'static str,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The subprocess exited unsuccessfully.
    #[error("git exited with {0}")]
    ExitStatus(String),

    /// The subprocess produced output that could not be interpreted.
    #[error("unexpected git output: {0}")]
    UnexpectedOutput(String),

    /// The request was cancelled before the subprocess finished.
    #[error("git request cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
