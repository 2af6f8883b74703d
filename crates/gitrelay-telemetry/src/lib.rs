//! RPC telemetry for gitrelay.
//!
//! Every smart HTTP call produces a start and an end [`Event`]. The
//! [`MetricsRecorder`] counts them, tracks in-flight calls in an
//! [`ActiveTaskRegistry`], and hands them to a [`MetricsWriter`] that appends
//! JSON lines to one file per day. Telemetry fails open: a full queue drops
//! events instead of slowing the git stream down.
//!
//! The read side consists of [`ActiveSnapshot`] for in-flight calls and
//! [`build_summary`] for a day's completed calls.

mod config;
mod counters;
mod error;
mod event;
mod recorder;
mod registry;
mod report;
mod retention;
mod summary;
mod writer;

pub use config::{
    MetricsConfig, DEFAULT_CLEANUP_INTERVAL_SECS, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_QUEUE_SIZE,
    DEFAULT_RETENTION_DAYS,
};
pub use counters::{Counters, CountersSnapshot};
pub use error::TelemetryError;
pub use event::{Event, EventKind};
pub use recorder::MetricsRecorder;
pub use registry::{ActiveFilter, ActiveSnapshot, ActiveTask, ActiveTaskRegistry};
pub use report::MetricsReport;
pub use retention::{cleanup_old_daily_files, parse_daily_file_name, spawn_retention};
pub use summary::{build_summary, classify_depth, PullDepth, PullSummary, RepoBucket, RepoCount, Summary};
pub use writer::{daily_file_name, DailyFileSink, Destination, MetricsWriter, DAILY_FILE_EXTENSION};

/// Result type for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
