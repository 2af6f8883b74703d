//! Per-request telemetry for git RPCs.
//!
//! A [`RequestInstrumentation`] records the start event when it is created
//! and the end event when it is finished (or dropped), counting the bytes
//! relayed in both directions in between.

use crate::observability::{MetricsState, RpcOutcome};
use gitrelay_git::{
    command_section_complete, parse_upload_pack_command, ByteCounter, CountingReader,
    CountingWriter, GitError, LimitedCapture, Phase, Service, UploadPackCommand,
};
use gitrelay_telemetry::{Event, MetricsRecorder};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request attributes copied into both boundary events.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub correlation_id: String,
    pub method: String,
    pub path: String,
    pub repo: String,
    pub protocol: String,
    pub remote_ip: String,
    pub user_agent: String,
    pub user_id: String,
}

/// Telemetry of one smart HTTP call.
pub struct RequestInstrumentation {
    recorder: Arc<MetricsRecorder>,
    metrics: MetricsState,
    start: Option<Event>,
    started_at: Instant,
    bytes_in: ByteCounter,
    bytes_out: ByteCounter,
    capture: Option<Arc<LimitedCapture>>,
    command: Arc<Mutex<Option<UploadPackCommand>>>,
}

impl RequestInstrumentation {
    /// Records the start event.
    pub fn begin(
        recorder: Arc<MetricsRecorder>,
        metrics: MetricsState,
        service: Service,
        phase: Phase,
        meta: RequestMeta,
    ) -> Self {
        let mut start = Event::start(service, phase);
        start.correlation_id = meta.correlation_id;
        start.method = meta.method;
        start.path = meta.path;
        start.repo = meta.repo;
        start.protocol = meta.protocol;
        start.remote_ip = meta.remote_ip;
        start.user_agent = meta.user_agent;
        start.user_id = meta.user_id;
        recorder.record(start.clone());

        Self {
            recorder,
            metrics,
            start: Some(start),
            started_at: Instant::now(),
            bytes_in: ByteCounter::new(),
            bytes_out: ByteCounter::new(),
            capture: None,
            command: Arc::new(Mutex::new(None)),
        }
    }

    pub fn correlation_id(&self) -> &str {
        self.start
            .as_ref()
            .map(|e| e.correlation_id.as_str())
            .unwrap_or_default()
    }

    /// Wraps the request body so its bytes count as `bytes_in`.
    pub fn counting_reader<R>(&self, inner: R) -> CountingReader<R> {
        CountingReader::new(inner, self.bytes_in.clone())
    }

    /// Wraps the response sink so its bytes count as `bytes_out`.
    pub fn counting_writer<W>(&self, inner: W) -> CountingWriter<W> {
        CountingWriter::new(inner, self.bytes_out.clone())
    }

    /// Decodes the upload-pack command from `capture` in the background.
    ///
    /// The watcher waits at most `wait` for the request section, then
    /// attaches whatever it decoded to the active task entry. Serving never
    /// waits on it.
    pub fn watch_command(&mut self, capture: Arc<LimitedCapture>, wait: Duration) {
        self.capture = Some(capture.clone());
        let recorder = self.recorder.clone();
        let slot = self.command.clone();
        let id = self.correlation_id().to_string();

        tokio::spawn(async move {
            if !capture.wait_until(command_section_complete, wait).await {
                tracing::debug!(correlation_id = %id, "Upload-pack command not complete before timeout");
            }
            let decoded = parse_upload_pack_command(&capture.snapshot());
            recorder.update_active_cmd(&id, &decoded.command, &decoded.params);
            *slot.lock() = Some(decoded);
        });
    }

    /// Records the end event and the RPC metrics.
    pub fn finish(mut self, status: u16, error: Option<&GitError>) {
        self.complete(status, error);
    }

    fn complete(&mut self, status: u16, error: Option<&GitError>) {
        let Some(start) = self.start.take() else {
            return;
        };

        let elapsed = self.started_at.elapsed();
        let mut end = start.to_end();
        end.status = status;
        end.duration_ms = elapsed.as_millis() as u64;
        end.bytes_in = self.bytes_in.get();
        end.bytes_out = self.bytes_out.get();
        if let Some(e) = error {
            end.error = e.to_string();
        }

        let decoded = self.command.lock().take().or_else(|| {
            self.capture
                .as_ref()
                .map(|c| parse_upload_pack_command(&c.snapshot()))
        });
        if let Some(decoded) = decoded {
            end.command = decoded.command;
            end.command_params = decoded.params;
        }

        let outcome = match error {
            None => RpcOutcome::Ok,
            Some(GitError::Cancelled) => RpcOutcome::Cancelled,
            Some(_) => RpcOutcome::Error,
        };
        self.metrics.record_git_rpc(
            end.service.as_str(),
            end.phase.as_str(),
            outcome,
            elapsed.as_secs_f64(),
            end.bytes_in,
            end.bytes_out,
        );

        tracing::info!(
            correlation_id = %end.correlation_id,
            service = %end.service,
            phase = %end.phase,
            repo = %end.repo,
            status = end.status,
            duration_ms = end.duration_ms,
            bytes_in = end.bytes_in,
            bytes_out = end.bytes_out,
            error = %end.error,
            "Git RPC finished"
        );
        self.recorder.record(end);
    }
}

impl Drop for RequestInstrumentation {
    fn drop(&mut self) {
        if self.start.is_some() {
            self.complete(500, Some(&GitError::Cancelled));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitrelay_git::PktLine;
    use gitrelay_telemetry::ActiveFilter;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn meta(id: &str) -> RequestMeta {
        RequestMeta {
            correlation_id: id.to_string(),
            method: "POST".into(),
            repo: "alice/site".into(),
            ..Default::default()
        }
    }

    fn all() -> ActiveFilter {
        ActiveFilter {
            limit: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_begin_and_finish() {
        let recorder = Arc::new(MetricsRecorder::in_memory());
        let metrics = MetricsState::new();
        let inst = RequestInstrumentation::begin(
            recorder.clone(),
            metrics.clone(),
            Service::ReceivePack,
            Phase::Rpc,
            meta("req-1"),
        );
        assert_eq!(inst.correlation_id(), "req-1");
        assert_eq!(recorder.snapshot_active(&all()).total, 1);

        let mut reader = inst.counting_reader(&b"hello"[..]);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await.unwrap();
        let mut writer = inst.counting_writer(Vec::new());
        writer.write_all(b"abc").await.unwrap();

        inst.finish(200, None);

        assert_eq!(recorder.snapshot_active(&all()).total, 0);
        assert_eq!(recorder.counters().ended, 1);
        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("gitrelay_git_rpc_total"));
        assert!(encoded.contains("outcome=\"Ok\""));
    }

    #[tokio::test]
    async fn test_drop_records_end() {
        let recorder = Arc::new(MetricsRecorder::in_memory());
        let inst = RequestInstrumentation::begin(
            recorder.clone(),
            MetricsState::new(),
            Service::UploadPack,
            Phase::Advertise,
            meta("req-2"),
        );
        drop(inst);

        assert_eq!(recorder.counters().ended, 1);
        assert_eq!(recorder.snapshot_active(&all()).total, 0);
    }

    #[tokio::test]
    async fn test_command_watcher_updates_active_task() {
        let recorder = Arc::new(MetricsRecorder::in_memory());
        let mut inst = RequestInstrumentation::begin(
            recorder.clone(),
            MetricsState::new(),
            Service::UploadPack,
            Phase::Rpc,
            meta("req-3"),
        );

        let capture = Arc::new(LimitedCapture::new(1024));
        inst.watch_command(capture.clone(), Duration::from_secs(5));

        let mut request = PktLine::from_string("command=fetch\n").encode();
        request.extend(PktLine::Delimiter.encode());
        request.extend(PktLine::from_string("deepen 1\n").encode());
        request.extend(PktLine::Flush.encode());
        capture.write(&request);

        let mut found = false;
        for _ in 0..100 {
            let snapshot = recorder.snapshot_active(&all());
            if snapshot.tasks.first().is_some_and(|t| t.command == "fetch") {
                assert_eq!(snapshot.tasks[0].command_params, "deepen=1");
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(found, "command was never attached");
        inst.finish(200, None);
    }
}
