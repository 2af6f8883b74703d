//! Commit counting while a zombie reaper collects children.
//!
//! Lives in its own test binary: `reap_all` waits on any child of the
//! process, which would steal children from unrelated tests.

#![cfg(unix)]

use gitrelay_git::{reap_all, GitProcessExecutor, ProcessTracker, RefUpdate};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["-c", "user.name=t", "-c", "user.email=t@example.com"])
        .args(args)
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8(out.stdout).unwrap().trim().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_count_commits_with_reaper_running() {
    let available = Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if !available {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let work = dir.path().join("work");
    std::fs::create_dir(&work).unwrap();
    git(&work, &["init", "--quiet"]);
    git(&work, &["commit", "--allow-empty", "-q", "-m", "one"]);
    let before = git(&work, &["rev-parse", "HEAD"]);
    git(&work, &["commit", "--allow-empty", "-q", "-m", "two"]);
    git(&work, &["commit", "--allow-empty", "-q", "-m", "three"]);
    let after = git(&work, &["rev-parse", "HEAD"]);

    let tracker = ProcessTracker::new();
    let stop = Arc::new(AtomicBool::new(false));
    let reaper = {
        let tracker = tracker.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                reap_all(&tracker);
                std::thread::yield_now();
            }
        })
    };

    let executor = GitProcessExecutor::new("git", tracker.clone());
    let update = RefUpdate {
        before,
        after,
        ref_name: "refs/heads/main".to_string(),
        is_tag: false,
        is_delete: false,
    };
    let repo = work.join(".git");
    let mut failures = Vec::new();
    for _ in 0..50 {
        match executor.count_commits(&repo, &update).await {
            Ok(2) => {}
            other => failures.push(format!("{other:?}")),
        }
    }

    stop.store(true, Ordering::Relaxed);
    reaper.join().unwrap();
    assert!(failures.is_empty(), "{failures:?}");
    assert_eq!(tracker.live_count(), 0);
}
