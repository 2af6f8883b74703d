//! In-flight RPC registry.

use crate::event::Event;
use chrono::{DateTime, Utc};
use gitrelay_git::{Phase, Service};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Start events of requests that have not ended yet, keyed by correlation id.
#[derive(Debug, Default)]
pub struct ActiveTaskRegistry {
    tasks: RwLock<HashMap<String, Event>>,
}

/// Detail-list filter for [`ActiveTaskRegistry::snapshot`].
///
/// Filters narrow the detail list only; totals always cover every task.
#[derive(Debug, Clone, Default)]
pub struct ActiveFilter {
    /// Maximum number of detail entries.
    pub limit: usize,
    /// Minimum age of listed tasks.
    pub min_duration: Duration,
    pub service: Option<Service>,
    pub phase: Option<Phase>,
}

/// One in-flight request in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub correlation_id: String,
    pub service: Service,
    pub phase: Phase,
    pub repo: String,
    pub user_id: String,
    pub remote_ip: String,
    pub command: String,
    pub command_params: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Totals plus a filtered, longest-running-first detail list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActiveSnapshot {
    pub total: usize,
    pub by_service: BTreeMap<String, usize>,
    pub by_phase: BTreeMap<String, usize>,
    pub tasks: Vec<ActiveTask>,
}

impl ActiveTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a start event under its correlation id.
    pub fn insert(&self, event: Event) {
        self.tasks.write().insert(event.correlation_id.clone(), event);
    }

    /// Removes the task with `correlation_id`, if present.
    pub fn remove(&self, correlation_id: &str) -> Option<Event> {
        self.tasks.write().remove(correlation_id)
    }

    /// Fills in the decoded upload-pack command of a registered task.
    ///
    /// Returns `false` when the task already ended.
    pub fn update_command(&self, correlation_id: &str, command: &str, params: &str) -> bool {
        match self.tasks.write().get_mut(correlation_id) {
            Some(event) => {
                event.command = command.to_string();
                event.command_params = params.to_string();
                true
            }
            None => false,
        }
    }

    /// Number of in-flight requests.
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot as of the current time.
    pub fn snapshot(&self, filter: &ActiveFilter) -> ActiveSnapshot {
        self.snapshot_at(filter, Utc::now())
    }

    /// Snapshot with durations measured against `now`.
    pub fn snapshot_at(&self, filter: &ActiveFilter, now: DateTime<Utc>) -> ActiveSnapshot {
        // Copy out under the read lock; sorting happens after it is released.
        let events: Vec<Event> = self.tasks.read().values().cloned().collect();

        let mut snapshot = ActiveSnapshot {
            total: events.len(),
            ..Default::default()
        };
        for event in &events {
            *snapshot
                .by_service
                .entry(event.service.to_string())
                .or_default() += 1;
            *snapshot.by_phase.entry(event.phase.to_string()).or_default() += 1;
        }

        let min_ms = filter.min_duration.as_millis() as u64;
        let mut tasks: Vec<ActiveTask> = events
            .into_iter()
            .filter(|e| filter.service.map_or(true, |s| s == e.service))
            .filter(|e| filter.phase.map_or(true, |p| p == e.phase))
            .map(|e| {
                let duration_ms = (now - e.ts).num_milliseconds().max(0) as u64;
                ActiveTask {
                    correlation_id: e.correlation_id,
                    service: e.service,
                    phase: e.phase,
                    repo: e.repo,
                    user_id: e.user_id,
                    remote_ip: e.remote_ip,
                    command: e.command,
                    command_params: e.command_params,
                    started_at: e.ts,
                    duration_ms,
                }
            })
            .filter(|t| t.duration_ms >= min_ms)
            .collect();

        tasks.sort_by(|a, b| {
            b.duration_ms
                .cmp(&a.duration_ms)
                .then_with(|| a.correlation_id.cmp(&b.correlation_id))
        });
        tasks.truncate(filter.limit);
        snapshot.tasks = tasks;
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task(id: &str, service: Service, phase: Phase, age_ms: i64, now: DateTime<Utc>) -> Event {
        let mut event = Event::start(service, phase);
        event.correlation_id = id.to_string();
        event.repo = format!("owner/{id}");
        event.ts = now - chrono::Duration::milliseconds(age_ms);
        event
    }

    #[test]
    fn test_insert_update_remove() {
        let registry = ActiveTaskRegistry::new();
        registry.insert(task("a", Service::UploadPack, Phase::Rpc, 0, Utc::now()));

        assert!(registry.update_command("a", "fetch", "deepen=1"));
        assert!(!registry.update_command("missing", "fetch", ""));

        let removed = registry.remove("a").unwrap();
        assert_eq!(removed.command, "fetch");
        assert!(registry.is_empty());
        assert!(!registry.update_command("a", "ls-refs", ""));
    }

    #[test]
    fn test_filters_do_not_change_totals() {
        let now = Utc::now();
        let registry = ActiveTaskRegistry::new();
        registry.insert(task("a", Service::UploadPack, Phase::Rpc, 5_000, now));
        registry.insert(task("b", Service::UploadPack, Phase::Advertise, 100, now));
        registry.insert(task("c", Service::ReceivePack, Phase::Rpc, 9_000, now));

        let filter = ActiveFilter {
            limit: 10,
            min_duration: Duration::from_secs(1),
            service: Some(Service::UploadPack),
            phase: None,
        };
        let snapshot = registry.snapshot_at(&filter, now);

        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.by_service["upload-pack"], 2);
        assert_eq!(snapshot.by_service["receive-pack"], 1);
        assert_eq!(snapshot.by_phase["rpc"], 2);
        assert_eq!(snapshot.tasks.len(), 1);
        assert_eq!(snapshot.tasks[0].correlation_id, "a");
        assert_eq!(snapshot.tasks[0].duration_ms, 5_000);
    }

    #[test]
    fn test_concurrent_requests_keep_their_entries() {
        let registry = std::sync::Arc::new(ActiveTaskRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let id = format!("req-{i}");
                    registry.insert(task(&id, Service::UploadPack, Phase::Rpc, 0, Utc::now()));
                    if i % 2 == 0 {
                        registry.remove(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 4);
        for i in (1..8).step_by(2) {
            assert!(registry.update_command(&format!("req-{i}"), "fetch", ""));
        }
    }

    proptest! {
        #[test]
        fn prop_detail_sorted_and_limited(
            ages in prop::collection::vec(0i64..100_000, 0..40),
            limit in 0usize..50,
            min_ms in 0u64..50_000,
        ) {
            let now = Utc::now();
            let registry = ActiveTaskRegistry::new();
            for (i, age) in ages.iter().enumerate() {
                let service = if i % 3 == 0 { Service::ReceivePack } else { Service::UploadPack };
                registry.insert(task(&format!("t{i}"), service, Phase::Rpc, *age, now));
            }

            let filter = ActiveFilter {
                limit,
                min_duration: Duration::from_millis(min_ms),
                service: None,
                phase: None,
            };
            let snapshot = registry.snapshot_at(&filter, now);
            let matches = ages.iter().filter(|a| **a as u64 >= min_ms).count();

            prop_assert_eq!(snapshot.total, ages.len());
            prop_assert_eq!(snapshot.by_service.values().sum::<usize>(), ages.len());
            prop_assert_eq!(snapshot.tasks.len(), limit.min(matches));
            prop_assert!(snapshot.tasks.windows(2).all(|w| w[0].duration_ms >= w[1].duration_ms));
        }
    }
}
