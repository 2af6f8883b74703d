//! Git subprocess execution.
//!
//! Each smart HTTP request runs one `git <service> --stateless-rpc`
//! subprocess. [`GitProcess::pump`] streams the request inputs into its
//! stdin while copying its stdout to the response, and tears the child down
//! as soon as either side fails or the request is cancelled.

use crate::push::{is_zero_sha, RefUpdate};
use crate::reaper::ProcessTracker;
use crate::service::{Phase, Service};
use crate::{GitError, Result};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

/// A source of bytes fed to the subprocess stdin, in order.
pub type InputSource = Box<dyn AsyncRead + Send + Unpin>;

/// Spawns git subprocesses for the smart HTTP services.
#[derive(Debug, Clone)]
pub struct GitProcessExecutor {
    binary: PathBuf,
    tracker: ProcessTracker,
}

impl GitProcessExecutor {
    /// Creates an executor running `binary`, registering children in `tracker`.
    pub fn new(binary: impl Into<PathBuf>, tracker: ProcessTracker) -> Self {
        Self {
            binary: binary.into(),
            tracker,
        }
    }

    /// Path of the git binary.
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// The tracker shared with the reaper.
    pub fn tracker(&self) -> &ProcessTracker {
        &self.tracker
    }

    /// Starts `git <service> --stateless-rpc` for `repo_path`.
    ///
    /// The advertise phase adds `--advertise-refs` and gets no stdin.
    /// `git_protocol` is forwarded as `GIT_PROTOCOL`.
    pub fn spawn(
        &self,
        service: Service,
        phase: Phase,
        repo_path: &Path,
        git_protocol: Option<&str>,
    ) -> Result<GitProcess> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(service.as_str()).arg("--stateless-rpc");
        if phase == Phase::Advertise {
            cmd.arg("--advertise-refs");
        }
        cmd.arg(repo_path)
            .stdin(match phase {
                Phase::Advertise => Stdio::null(),
                Phase::Rpc => Stdio::piped(),
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(protocol) = git_protocol {
            cmd.env("GIT_PROTOCOL", protocol);
        }

        let (child, pid) = spawn_tracked(&mut cmd, &self.tracker).map_err(|source| {
            tracing::error!(service = %service, repo = %repo_path.display(), error = %source, "Failed to start git");
            GitError::Spawn {
                service: service.to_string(),
                source,
            }
        })?;
        tracing::debug!(service = %service, phase = %phase, pid = pid, "Started git");

        Ok(GitProcess {
            child,
            pid,
            service,
            repo: repo_path.display().to_string(),
            tracker: self.tracker.clone(),
        })
    }

    /// Counts the commits a ref update introduces.
    ///
    /// Deletions count zero. Creations count the commits reachable from the
    /// new tip and from no other ref; updates count `before..after`.
    pub async fn count_commits(&self, repo_path: &Path, update: &RefUpdate) -> Result<u64> {
        if update.is_delete {
            return Ok(0);
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--git-dir")
            .arg(repo_path)
            .arg("rev-list")
            .arg("--count");
        if is_zero_sha(&update.before) {
            cmd.arg(&update.after)
                .arg("--not")
                .arg(format!("--exclude={}", update.ref_name))
                .arg("--all");
        } else {
            cmd.arg(format!("{}..{}", update.before, update.after));
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let (mut child, pid) =
            spawn_tracked(&mut cmd, &self.tracker).map_err(|source| GitError::Spawn {
                service: "rev-list".to_string(),
                source,
            })?;

        let mut stdout = Vec::new();
        let read = match child.stdout.take() {
            Some(mut pipe) => pipe.read_to_end(&mut stdout).await.map(|_| ()),
            None => Err(std::io::Error::other("stdout pipe unavailable")),
        };
        if read.is_err() {
            let _ = child.start_kill();
        }
        let status = wait_tracked(&mut child, pid, &self.tracker).await?;
        read.map_err(|source| GitError::Stream {
            direction: "stdout",
            source,
        })?;
        if !status.success() {
            return Err(GitError::ExitStatus(status.to_string()));
        }

        let text = String::from_utf8_lossy(&stdout);
        text.trim()
            .parse::<u64>()
            .map_err(|_| GitError::UnexpectedOutput(text.trim().to_string()))
    }
}

/// A running git subprocess bound to one request.
///
/// Dropping it kills the child.
#[derive(Debug)]
pub struct GitProcess {
    child: Child,
    pid: u32,
    service: Service,
    repo: String,
    tracker: ProcessTracker,
}

impl GitProcess {
    /// OS process id, or 0 when unknown.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Streams `inputs` into stdin and stdout into `dest` until both finish.
    ///
    /// Any copy failure, or `cancel` firing, kills the child and returns the
    /// error. A clean copy still fails if git exits unsuccessfully.
    pub async fn pump<W>(
        mut self,
        inputs: Vec<InputSource>,
        dest: &mut W,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus>
    where
        W: AsyncWrite + Unpin,
    {
        let stdin = self.child.stdin.take();
        let Some(stdout) = self.child.stdout.take() else {
            self.abort().await;
            return Err(GitError::PipeUnavailable("stdout"));
        };
        if stdin.is_none() && !inputs.is_empty() {
            self.abort().await;
            return Err(GitError::PipeUnavailable("stdin"));
        }
        if let Some(stderr) = self.child.stderr.take() {
            log_stderr(stderr, self.service, self.repo.clone());
        }

        let outcome = tokio::select! {
            res = async { tokio::try_join!(feed_stdin(stdin, inputs), drain_stdout(stdout, dest)) } => res.map(|_| ()),
            _ = cancel.cancelled() => Err(GitError::Cancelled),
        };

        match outcome {
            Ok(()) => {
                let status = self.wait().await?;
                if status.success() {
                    Ok(status)
                } else {
                    tracing::warn!(service = %self.service, repo = %self.repo, status = %status, "git exited unsuccessfully");
                    Err(GitError::ExitStatus(status.to_string()))
                }
            }
            Err(e) => {
                tracing::warn!(service = %self.service, repo = %self.repo, error = %e, "Aborting git");
                self.abort().await;
                Err(e)
            }
        }
    }

    async fn abort(&mut self) {
        if let Err(e) = self.child.start_kill() {
            tracing::debug!(pid = self.pid, error = %e, "Kill failed, child already gone");
        }
        let _ = self.wait().await;
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        wait_tracked(&mut self.child, self.pid, &self.tracker).await
    }
}

impl Drop for GitProcess {
    fn drop(&mut self) {
        self.tracker.release(self.pid);
    }
}

fn spawn_tracked(cmd: &mut Command, tracker: &ProcessTracker) -> std::io::Result<(Child, u32)> {
    tracker.track_spawn(|| {
        let child = cmd.spawn()?;
        let pid = child.id().unwrap_or_default();
        Ok((child, pid))
    })
}

/// Waits for `child`, taking the status from `tracker` when the init reaper
/// collected it first.
async fn wait_tracked(child: &mut Child, pid: u32, tracker: &ProcessTracker) -> Result<ExitStatus> {
    let result = child.wait().await;
    let reaped = tracker.release(pid);
    match (result, reaped) {
        (Ok(status), _) => Ok(status),
        (Err(_), Some(raw)) => Ok(exit_status_from_raw(raw)),
        (Err(e), None) => Err(e.into()),
    }
}

#[cfg(unix)]
fn exit_status_from_raw(raw: i32) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;
    ExitStatus::from_raw(raw)
}

#[cfg(not(unix))]
fn exit_status_from_raw(raw: i32) -> ExitStatus {
    use std::os::windows::process::ExitStatusExt;
    ExitStatus::from_raw(raw as u32)
}

async fn feed_stdin(stdin: Option<ChildStdin>, inputs: Vec<InputSource>) -> Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };
    for mut input in inputs {
        tokio::io::copy(&mut input, &mut stdin)
            .await
            .map_err(|source| GitError::Stream {
                direction: "stdin",
                source,
            })?;
    }
    stdin.shutdown().await.map_err(|source| GitError::Stream {
        direction: "stdin",
        source,
    })?;
    Ok(())
}

async fn drain_stdout<W>(mut stdout: ChildStdout, dest: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let stream_err = |source: std::io::Error| GitError::Stream {
        direction: "stdout",
        source,
    };
    tokio::io::copy(&mut stdout, dest).await.map_err(stream_err)?;
    dest.flush().await.map_err(stream_err)?;
    Ok(())
}

fn log_stderr(stderr: ChildStderr, service: Service, repo: String) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::warn!(service = %service, repo = %repo, "git: {}", line);
        }
    });
}
