//! Zombie reaping for when the relay runs as PID 1.
//!
//! Inside a container the relay is often the init process, so every orphaned
//! descendant (for example `git pack-objects` outliving its parent) is
//! re-parented to it and must be reaped here. Live children owned by the
//! executor are registered in a [`ProcessTracker`]; when the reaper collects
//! one of them first, it stores the exit status so the executor can still
//! report it.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Registry of git children owned by the executor.
#[derive(Debug, Clone, Default)]
pub struct ProcessTracker {
    inner: Arc<Mutex<TrackerState>>,
}

#[derive(Debug, Default)]
struct TrackerState {
    live: HashSet<u32>,
    reaped: HashMap<u32, i32>,
}

impl ProcessTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spawned child.
    pub fn track(&self, pid: u32) {
        self.inner.lock().live.insert(pid);
    }

    /// Runs `spawn` and registers the pid it returns under the tracker lock.
    ///
    /// A reaper that collects the child right after it starts blocks on the
    /// same lock, so it always finds the pid registered and keeps the status.
    pub fn track_spawn<T>(
        &self,
        spawn: impl FnOnce() -> std::io::Result<(T, u32)>,
    ) -> std::io::Result<(T, u32)> {
        let mut state = self.inner.lock();
        let (child, pid) = spawn()?;
        if pid != 0 {
            state.live.insert(pid);
        }
        Ok((child, pid))
    }

    /// Unregisters a child, returning the raw wait status if the reaper
    /// collected it first.
    pub fn release(&self, pid: u32) -> Option<i32> {
        let mut state = self.inner.lock();
        state.live.remove(&pid);
        state.reaped.remove(&pid)
    }

    /// Records a reaped process. Statuses are kept only for tracked children.
    pub fn record_reaped(&self, pid: u32, raw_status: i32) -> bool {
        let mut state = self.inner.lock();
        if state.live.contains(&pid) {
            state.reaped.insert(pid, raw_status);
            true
        } else {
            false
        }
    }

    /// Number of tracked live children.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }
}

/// Whether this process is PID 1.
pub fn is_init_process() -> bool {
    std::process::id() == 1
}

/// Spawns the reaper task when running as the init process.
///
/// Returns `None` (and does nothing) otherwise.
#[cfg(unix)]
pub fn spawn_reaper(tracker: ProcessTracker) -> Option<tokio::task::JoinHandle<()>> {
    if !is_init_process() {
        return None;
    }

    let mut signals = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child()) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for SIGCHLD, zombies will not be reaped");
            return None;
        }
    };

    tracing::info!("Running as init process, zombie reaper enabled");
    Some(tokio::spawn(async move {
        while signals.recv().await.is_some() {
            reap_all(&tracker);
        }
    }))
}

/// Reaps every terminated child without blocking; returns how many were reaped.
#[cfg(unix)]
pub fn reap_all(tracker: &ProcessTracker) -> usize {
    let mut reaped = 0;
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: waitpid with WNOHANG only writes to `status`.
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        let owned = tracker.record_reaped(pid as u32, status);
        tracing::debug!(pid = pid, owned = owned, "Reaped child process");
        reaped += 1;
    }
    reaped
}
