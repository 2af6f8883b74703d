//! Telemetry facade owned by the application state.

use crate::config::MetricsConfig;
use crate::counters::{Counters, CountersSnapshot};
use crate::event::{Event, EventKind};
use crate::registry::{ActiveFilter, ActiveSnapshot, ActiveTaskRegistry};
use crate::writer::{Destination, MetricsWriter};
use std::path::{Path, PathBuf};

/// Combines counters, the active task registry and an optional durable sink.
///
/// A disabled recorder ignores every event. Tests build isolated instances
/// with [`MetricsRecorder::in_memory`].
#[derive(Debug)]
pub struct MetricsRecorder {
    enabled: bool,
    counters: Counters,
    registry: ActiveTaskRegistry,
    writer: Option<MetricsWriter>,
}

impl MetricsRecorder {
    /// A recorder that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            counters: Counters::new(),
            registry: ActiveTaskRegistry::new(),
            writer: None,
        }
    }

    /// Counters and registry only.
    pub fn in_memory() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// Counters, registry and `writer`.
    pub fn with_writer(writer: MetricsWriter) -> Self {
        Self {
            writer: Some(writer),
            ..Self::in_memory()
        }
    }

    /// Builds the recorder described by `config`, spawning the writer task.
    pub fn from_config(config: &MetricsConfig, data_dir: &Path) -> Self {
        if !config.enabled {
            tracing::info!("Git metrics disabled");
            return Self::disabled();
        }
        let destination = Destination::from_path(config.destination_or_default(data_dir));
        tracing::info!(destination = ?destination, queue_size = config.queue_size, "Git metrics enabled");
        Self::with_writer(MetricsWriter::spawn(
            destination,
            config.queue_size,
            config.flush_interval(),
        ))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn sink_enabled(&self) -> bool {
        self.writer.is_some()
    }

    /// Records one boundary event. Never blocks on the sink.
    pub fn record(&self, event: Event) {
        if !self.enabled {
            return;
        }
        match event.kind {
            EventKind::Start => {
                self.counters.record_started();
                if !event.correlation_id.is_empty() {
                    self.registry.insert(event.clone());
                }
            }
            EventKind::End => {
                self.counters.record_ended();
                if !event.correlation_id.is_empty() {
                    self.registry.remove(&event.correlation_id);
                }
            }
        }

        if let Some(writer) = &self.writer {
            if !writer.try_send(event) {
                self.counters.record_dropped();
                tracing::debug!("Metrics queue full, event dropped");
            }
        }
    }

    /// Attaches the decoded upload-pack command to an in-flight request.
    pub fn update_active_cmd(&self, correlation_id: &str, command: &str, params: &str) {
        if self.enabled {
            self.registry.update_command(correlation_id, command, params);
        }
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn snapshot_active(&self, filter: &ActiveFilter) -> ActiveSnapshot {
        self.registry.snapshot(filter)
    }

    /// The sink destination, if any.
    pub fn destination(&self) -> Option<&Destination> {
        self.writer.as_ref().map(|w| w.destination())
    }

    /// File receiving today's events, if a sink is configured.
    pub fn current_path(&self) -> Option<PathBuf> {
        self.writer.as_ref().map(|w| w.current_path())
    }

    /// Drains and flushes the sink.
    pub async fn shutdown(&self) {
        if let Some(writer) = &self.writer {
            writer.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitrelay_git::{Phase, Service};
    use std::time::Duration;

    fn start(id: &str) -> Event {
        let mut event = Event::start(Service::UploadPack, Phase::Rpc);
        event.correlation_id = id.to_string();
        event
    }

    fn all() -> ActiveFilter {
        ActiveFilter {
            limit: 100,
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_records_nothing() {
        let recorder = MetricsRecorder::disabled();
        recorder.record(start("a"));
        recorder.update_active_cmd("a", "fetch", "");

        assert_eq!(recorder.counters(), CountersSnapshot::default());
        assert_eq!(recorder.snapshot_active(&all()).total, 0);
        assert!(!recorder.sink_enabled());
        assert!(recorder.current_path().is_none());
    }

    #[test]
    fn test_start_end_lifecycle() {
        let recorder = MetricsRecorder::in_memory();
        let event = start("a");
        recorder.record(event.clone());
        recorder.update_active_cmd("a", "fetch", "deepen=1");

        let snapshot = recorder.snapshot_active(&all());
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.tasks[0].command, "fetch");
        assert_eq!(snapshot.tasks[0].command_params, "deepen=1");

        recorder.record(event.to_end());
        recorder.update_active_cmd("a", "ls-refs", "");
        assert_eq!(recorder.snapshot_active(&all()).total, 0);

        let counters = recorder.counters();
        assert_eq!(counters.started, 1);
        assert_eq!(counters.ended, 1);
    }

    #[test]
    fn test_events_without_id_only_count() {
        let recorder = MetricsRecorder::in_memory();
        recorder.record(Event::start(Service::ReceivePack, Phase::Advertise));
        assert_eq!(recorder.counters().started, 1);
        assert_eq!(recorder.snapshot_active(&all()).total, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_overflow_counts_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = MetricsWriter::spawn(
            Destination::Directory(dir.path().to_path_buf()),
            1,
            Duration::from_secs(60),
        );
        let recorder = MetricsRecorder::with_writer(writer);

        recorder.record(start("a"));
        recorder.record(start("b"));
        recorder.record(start("c"));

        let counters = recorder.counters();
        assert_eq!(counters.started, 3);
        assert_eq!(counters.dropped, 2);
        recorder.shutdown().await;
    }

    #[tokio::test]
    async fn test_from_config_writes_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = MetricsRecorder::from_config(&MetricsConfig::default(), dir.path());
        assert!(recorder.sink_enabled());

        recorder.record(start("a"));
        let path = recorder.current_path().unwrap();
        recorder.shutdown().await;

        assert!(path.starts_with(dir.path().join("git-metrics")));
        assert_eq!(std::fs::read_to_string(path).unwrap().lines().count(), 1);
    }
}
