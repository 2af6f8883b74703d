//! Asynchronous, date-rotating JSON-lines sink.
//!
//! Events are handed to a bounded queue with a non-blocking send; a single
//! consumer task serializes them into `<dir>/YYYY-MM-DD.jsonl`. A periodic
//! tick flushes the buffer and closes yesterday's file even without traffic.

use crate::event::Event;
use crate::{Result, TelemetryError};
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// File extension of daily metrics files.
pub const DAILY_FILE_EXTENSION: &str = "jsonl";

/// Where events are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// One `YYYY-MM-DD.jsonl` file per day inside this directory.
    Directory(PathBuf),
    /// A single file, never rotated.
    File(PathBuf),
}

impl Destination {
    /// Interprets `path`: `.jsonl`, `.json` and `.log` name a fixed file,
    /// anything else a directory.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match path.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("json") | Some("log") => Destination::File(path),
            _ => Destination::Directory(path),
        }
    }

    /// File holding the events of `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        match self {
            Destination::Directory(dir) => dir.join(daily_file_name(date)),
            Destination::File(path) => path.clone(),
        }
    }

    /// The rotation directory, if any.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Destination::Directory(dir) => Some(dir),
            Destination::File(_) => None,
        }
    }
}

/// `YYYY-MM-DD.jsonl`.
pub fn daily_file_name(date: NaiveDate) -> String {
    format!("{}.{}", date.format("%Y-%m-%d"), DAILY_FILE_EXTENSION)
}

/// Append-only writer that reopens its file when the date changes or the
/// file disappears.
///
/// One mutex covers the rotation check and the write.
#[derive(Debug)]
pub struct DailyFileSink {
    destination: Destination,
    state: Mutex<Option<OpenFile>>,
}

#[derive(Debug)]
struct OpenFile {
    writer: BufWriter<File>,
    date: NaiveDate,
    path: PathBuf,
}

impl DailyFileSink {
    pub fn new(destination: Destination) -> Self {
        Self {
            destination,
            state: Mutex::new(None),
        }
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Appends one line to today's file.
    pub fn write_line(&self, line: &[u8]) -> Result<()> {
        self.write_line_on(line, Utc::now().date_naive())
    }

    /// Appends one line to the file of `today`.
    pub fn write_line_on(&self, line: &[u8], today: NaiveDate) -> Result<()> {
        let mut state = self.state.lock();
        let file = self.ensure_open(&mut state, today)?;
        file.writer.write_all(line)?;
        file.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes buffered lines.
    pub fn flush(&self) -> Result<()> {
        if let Some(file) = self.state.lock().as_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }

    /// Path of the currently open file, if any.
    pub fn open_path(&self) -> Option<PathBuf> {
        self.state.lock().as_ref().map(|file| file.path.clone())
    }

    /// Flushes, and closes the open file if it belongs to another day.
    pub fn tick(&self, today: NaiveDate) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(file) = state.as_mut() {
            file.writer.flush()?;
            if file.date != today && matches!(self.destination, Destination::Directory(_)) {
                debug!(path = %file.path.display(), "Closing metrics file after date change");
                *state = None;
            }
        }
        Ok(())
    }

    fn ensure_open<'a>(
        &self,
        state: &'a mut Option<OpenFile>,
        today: NaiveDate,
    ) -> Result<&'a mut OpenFile> {
        let stale = match state.as_ref() {
            None => true,
            Some(file) => file.date != today || !file.path.exists(),
        };
        if stale {
            if let Some(mut old) = state.take() {
                if let Err(e) = old.writer.flush() {
                    warn!(path = %old.path.display(), error = %e, "Failed to flush metrics file before rotation");
                }
            }

            let path = self.destination.path_for(today);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let handle = OpenOptions::new().create(true).append(true).open(&path)?;
            info!(path = %path.display(), "Opened metrics file");
            *state = Some(OpenFile {
                writer: BufWriter::new(handle),
                date: today,
                path,
            });
        }
        state.as_mut().ok_or(TelemetryError::Closed)
    }
}

/// Bounded, fail-open event queue in front of a [`DailyFileSink`].
#[derive(Debug)]
pub struct MetricsWriter {
    tx: mpsc::Sender<Event>,
    sink: Arc<DailyFileSink>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsWriter {
    /// Starts the consumer task. Must be called within a tokio runtime.
    pub fn spawn(destination: Destination, queue_size: usize, flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let sink = Arc::new(DailyFileSink::new(destination));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_consumer(
            rx,
            sink.clone(),
            flush_interval,
            cancel.clone(),
        ));

        Self {
            tx,
            sink,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues `event` without waiting. Returns `false` when it was dropped.
    pub fn try_send(&self, event: Event) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => false,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Metrics writer closed, dropping event");
                false
            }
        }
    }

    pub fn destination(&self) -> &Destination {
        self.sink.destination()
    }

    /// File receiving today's events.
    pub fn current_path(&self) -> PathBuf {
        self.sink.destination().path_for(Utc::now().date_naive())
    }

    /// Stops the consumer after draining queued events and flushing.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Metrics writer task failed");
            }
        }
    }
}

async fn run_consumer(
    mut rx: mpsc::Receiver<Event>,
    sink: Arc<DailyFileSink>,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => write_event(&sink, &event),
                None => break,
            },
            _ = ticker.tick() => {
                if let Err(e) = sink.tick(Utc::now().date_naive()) {
                    warn!(error = %e, "Failed to flush metrics file");
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    rx.close();
    while let Ok(event) = rx.try_recv() {
        write_event(&sink, &event);
    }
    if let Err(e) = sink.flush() {
        warn!(error = %e, "Failed to flush metrics file on shutdown");
    }
    debug!("Metrics writer stopped");
}

fn write_event(sink: &DailyFileSink, event: &Event) {
    let line = match serde_json::to_vec(event) {
        Ok(line) => line,
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics event");
            return;
        }
    };
    if let Err(e) = sink.write_line(&line) {
        warn!(error = %e, "Failed to write metrics event");
    }
}
