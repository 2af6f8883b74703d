//! Metrics pipeline settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUEUE_SIZE: usize = 4096;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RETENTION_DAYS: u64 = 7;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;

/// Metrics configuration as loaded from the node config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// File or directory receiving events; `<data_dir>/git-metrics` when unset.
    pub destination: Option<PathBuf>,
    pub queue_size: usize,
    pub flush_interval_ms: u64,
    pub retention_days: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            destination: None,
            queue_size: DEFAULT_QUEUE_SIZE,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
        }
    }
}

impl MetricsConfig {
    /// Replaces zero values with their defaults, logging each replacement.
    pub fn sanitized(mut self) -> Self {
        fn fix<T: PartialEq + Default + Copy + std::fmt::Display>(field: &str, value: &mut T, default: T) {
            if *value == T::default() {
                tracing::warn!(field, default = %default, "Invalid metrics setting, using default");
                *value = default;
            }
        }
        fix("queue_size", &mut self.queue_size, DEFAULT_QUEUE_SIZE);
        fix("flush_interval_ms", &mut self.flush_interval_ms, DEFAULT_FLUSH_INTERVAL_MS);
        fix("retention_days", &mut self.retention_days, DEFAULT_RETENTION_DAYS);
        fix(
            "cleanup_interval_secs",
            &mut self.cleanup_interval_secs,
            DEFAULT_CLEANUP_INTERVAL_SECS,
        );
        if self
            .destination
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            tracing::warn!("Empty metrics destination, using default");
            self.destination = None;
        }
        self
    }

    /// Destination path, defaulting under `data_dir`.
    pub fn destination_or_default(&self, data_dir: &Path) -> PathBuf {
        self.destination
            .clone()
            .unwrap_or_else(|| data_dir.join("git-metrics"))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
