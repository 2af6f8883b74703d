//! Deletion of expired daily metrics files.

use crate::writer::DAILY_FILE_EXTENSION;
use crate::Result;
use chrono::{Days, NaiveDate, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Parses the date out of a `YYYY-MM-DD.jsonl` file name.
pub fn parse_daily_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_suffix(DAILY_FILE_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}

/// Deletes daily files in `dir` older than `keep_days` before `today`.
///
/// Only names of the form `YYYY-MM-DD.jsonl` are considered; anything else
/// is left alone. Returns the number of files removed. A missing directory
/// is not an error.
pub fn cleanup_old_daily_files(dir: &Path, keep_days: u64, today: NaiveDate) -> Result<usize> {
    let cutoff = today.checked_sub_days(Days::new(keep_days)).unwrap_or(NaiveDate::MIN);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(date) = name.to_str().and_then(parse_daily_file_name) else {
            continue;
        };
        if date >= cutoff || !entry.file_type()?.is_file() {
            continue;
        }
        match fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(path = %entry.path().display(), "Removed expired metrics file");
                removed += 1;
            }
            Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to remove expired metrics file"),
        }
    }
    Ok(removed)
}

/// Runs [`cleanup_old_daily_files`] now and then every `interval` until cancelled.
pub fn spawn_retention(
    dir: PathBuf,
    keep_days: u64,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match cleanup_old_daily_files(&dir, keep_days, Utc::now().date_naive()) {
                        Ok(0) => {}
                        Ok(n) => info!(removed = n, dir = %dir.display(), "Cleaned up metrics files"),
                        Err(e) => warn!(dir = %dir.display(), error = %e, "Metrics cleanup failed"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
