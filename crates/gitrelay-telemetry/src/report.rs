//! Combined read-side view served by the admin endpoint.

use crate::counters::CountersSnapshot;
use crate::recorder::MetricsRecorder;
use crate::registry::{ActiveFilter, ActiveSnapshot};
use crate::summary::{build_summary, Summary};
use chrono::NaiveDate;
use serde::Serialize;

/// Everything the admin endpoint reports.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub enabled: bool,
    pub sink_enabled: bool,
    pub current_path: Option<String>,
    pub counters: CountersSnapshot,
    pub active: ActiveSnapshot,
    /// Date the summary covers.
    pub date: NaiveDate,
    pub summary: Summary,
}

impl MetricsRecorder {
    /// Builds a report with the summary of `date`.
    ///
    /// Reads the daily file synchronously; call from a blocking context.
    pub fn report(&self, filter: &ActiveFilter, date: NaiveDate, top_n: usize) -> MetricsReport {
        let summary = self
            .destination()
            .map(|d| build_summary(&d.path_for(date), top_n))
            .unwrap_or_default();

        MetricsReport {
            enabled: self.is_enabled(),
            sink_enabled: self.sink_enabled(),
            current_path: self.current_path().map(|p| p.display().to_string()),
            counters: self.counters(),
            active: self.snapshot_active(filter),
            date,
            summary,
        }
    }
}
