//! Daily aggregates over one metrics file.

use crate::event::{Event, EventKind};
use gitrelay_git::{split_params, Phase, Service};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Request count for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoCount {
    pub repo: String,
    pub count: u64,
}

/// A total and its busiest repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoBucket {
    pub total: u64,
    pub top: Vec<RepoCount>,
}

/// Fetches split by shallow-clone depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullSummary {
    pub all: RepoBucket,
    /// `deepen 1`.
    pub depth_1: RepoBucket,
    /// Any other `deepen`, `deepen-since` or `deepen-not`.
    pub depth_other: RepoBucket,
    /// No shallow argument.
    pub full: RepoBucket,
}

/// Aggregate over the end events of one daily file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub ended: u64,
    pub by_service: BTreeMap<String, u64>,
    pub by_phase: BTreeMap<String, u64>,
    pub errors: u64,
    pub pulls: PullSummary,
    pub pushes: RepoBucket,
}

/// Shallow-clone depth class of an upload-pack request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullDepth {
    One,
    Other,
    Full,
}

/// Classifies the key-sorted command parameters of an upload-pack request.
pub fn classify_depth(params: &str) -> PullDepth {
    let mut shallow = false;
    for (key, value) in split_params(params) {
        match key {
            "deepen" if value == "1" => return PullDepth::One,
            "deepen" | "deepen-since" | "deepen-not" if !value.is_empty() => shallow = true,
            _ => {}
        }
    }
    if shallow {
        PullDepth::Other
    } else {
        PullDepth::Full
    }
}

#[derive(Default)]
struct Tally {
    total: u64,
    repos: HashMap<String, u64>,
}

impl Tally {
    fn add(&mut self, repo: &str) {
        self.total += 1;
        *self.repos.entry(repo.to_string()).or_default() += 1;
    }

    fn into_bucket(self, top_n: usize) -> RepoBucket {
        let mut top: Vec<RepoCount> = self
            .repos
            .into_iter()
            .map(|(repo, count)| RepoCount { repo, count })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.repo.cmp(&b.repo)));
        top.truncate(top_n);
        RepoBucket {
            total: self.total,
            top,
        }
    }
}

/// Streams `path` and summarizes its end events.
///
/// A missing or unreadable file yields an empty summary. Lines that do not
/// decode as events are skipped.
pub fn build_summary(path: &Path, top_n: usize) -> Summary {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Cannot read metrics file");
            }
            return Summary::default();
        }
    };

    let mut summary = Summary::default();
    let mut pulls = [Tally::default(), Tally::default(), Tally::default(), Tally::default()];
    let mut pushes = Tally::default();

    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Metrics file read failed");
                break;
            }
        }
        if line.trim_ascii().is_empty() {
            continue;
        }
        // Torn writes leave partial lines, possibly cut inside a UTF-8 sequence.
        let Ok(event) = serde_json::from_slice::<Event>(&line) else {
            continue;
        };
        if event.kind != EventKind::End {
            continue;
        }

        summary.ended += 1;
        *summary.by_service.entry(event.service.to_string()).or_default() += 1;
        *summary.by_phase.entry(event.phase.to_string()).or_default() += 1;
        if event.is_error() {
            summary.errors += 1;
        }

        match (event.service, event.phase) {
            (Service::UploadPack, Phase::Rpc) => {
                pulls[0].add(&event.repo);
                let bucket = match classify_depth(&event.command_params) {
                    PullDepth::One => 1,
                    PullDepth::Other => 2,
                    PullDepth::Full => 3,
                };
                pulls[bucket].add(&event.repo);
            }
            (Service::ReceivePack, Phase::Rpc) => pushes.add(&event.repo),
            _ => {}
        }
    }

    let [all, depth_1, depth_other, full] = pulls.map(|tally| tally.into_bucket(top_n));
    summary.pulls = PullSummary {
        all,
        depth_1,
        depth_other,
        full,
    };
    summary.pushes = pushes.into_bucket(top_n);
    summary
}
