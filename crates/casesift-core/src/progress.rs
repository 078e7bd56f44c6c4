/// Live ingest progress: per-worker activity snapshots and the per-module
/// run-time ledger.
///
/// Snapshots are immutable; a worker's state change replaces the whole
/// snapshot by `Arc` swap under the map lock, so a concurrent reader can
/// never observe a half-updated record. The ledger accumulates the time a
/// worker spent in a module by diffing the previous snapshot's start
/// instant against the new one whenever the activity changes; idle time is
/// never accumulated.
use chrono::{DateTime, Local};
use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Activity name reported while a worker has no task.
pub const IDLE_ACTIVITY: &str = "IDLE";

/// Immutable record of what one ingest worker is doing right now.
#[derive(Debug, Clone)]
pub struct ThreadActivitySnapshot {
    worker_id: u64,
    job_id: Option<u64>,
    activity: CompactString,
    data_source: CompactString,
    file: CompactString,
    started_at: DateTime<Local>,
    /// Monotonic twin of `started_at`, used for ledger arithmetic.
    started: Instant,
}

impl ThreadActivitySnapshot {
    /// Snapshot for a worker with no current task.
    fn idle(worker_id: u64) -> Self {
        Self {
            worker_id,
            job_id: None,
            activity: CompactString::new(IDLE_ACTIVITY),
            data_source: CompactString::default(),
            file: CompactString::default(),
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    /// Snapshot for a worker running a data-source-level module.
    fn data_source(worker_id: u64, job_id: u64, activity: &str, data_source: &str) -> Self {
        Self {
            worker_id,
            job_id: Some(job_id),
            activity: CompactString::new(activity),
            data_source: CompactString::new(data_source),
            file: CompactString::default(),
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    /// Snapshot for a worker running a file-level module.
    fn file(worker_id: u64, job_id: u64, activity: &str, data_source: &str, file: &str) -> Self {
        Self {
            worker_id,
            job_id: Some(job_id),
            activity: CompactString::new(activity),
            data_source: CompactString::new(data_source),
            file: CompactString::new(file),
            started_at: Local::now(),
            started: Instant::now(),
        }
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    pub fn job_id(&self) -> Option<u64> {
        self.job_id
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn data_source_name(&self) -> &str {
        &self.data_source
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn is_idle(&self) -> bool {
        self.activity == IDLE_ACTIVITY
    }
}

/// Tracks worker activity and cumulative module run times.
pub struct ProgressTracker {
    snapshots: RwLock<HashMap<u64, Arc<ThreadActivitySnapshot>>>,
    run_times: Mutex<HashMap<String, u64>>,
}

impl ProgressTracker {
    pub(crate) fn new() -> Self {
        Self {
            snapshots: RwLock::new(HashMap::new()),
            run_times: Mutex::new(HashMap::new()),
        }
    }

    /// Register a newly spawned worker with an idle snapshot.
    pub(crate) fn register_worker(&self, worker_id: u64) {
        self.snapshots
            .write()
            .insert(worker_id, Arc::new(ThreadActivitySnapshot::idle(worker_id)));
    }

    /// A data-source-level module started on `worker_id`.
    pub(crate) fn task_started_data_source(
        &self,
        worker_id: u64,
        job_id: u64,
        activity: &str,
        data_source: &str,
    ) {
        self.swap(
            worker_id,
            ThreadActivitySnapshot::data_source(worker_id, job_id, activity, data_source),
        );
    }

    /// A file-level module started on `worker_id`.
    pub(crate) fn task_started_file(
        &self,
        worker_id: u64,
        job_id: u64,
        activity: &str,
        data_source: &str,
        file: &str,
    ) {
        self.swap(
            worker_id,
            ThreadActivitySnapshot::file(worker_id, job_id, activity, data_source, file),
        );
    }

    /// The current task on `worker_id` finished; the worker is idle again.
    pub(crate) fn task_completed(&self, worker_id: u64) {
        self.swap(worker_id, ThreadActivitySnapshot::idle(worker_id));
    }

    /// Replace the worker's snapshot, crediting the interval spent in the
    /// previous activity to the ledger.
    fn swap(&self, worker_id: u64, next: ThreadActivitySnapshot) {
        let next = Arc::new(next);
        let previous = self.snapshots.write().insert(worker_id, Arc::clone(&next));
        if let Some(previous) = previous {
            if !previous.is_idle() {
                let elapsed = next
                    .started
                    .saturating_duration_since(previous.started)
                    .as_millis() as u64;
                *self
                    .run_times
                    .lock()
                    .entry(previous.activity.to_string())
                    .or_insert(0) += elapsed;
            }
        }
    }

    /// Point-in-time view of every worker's activity.
    pub fn snapshots(&self) -> Vec<Arc<ThreadActivitySnapshot>> {
        self.snapshots.read().values().cloned().collect()
    }

    /// Cumulative milliseconds spent per module display name.
    pub fn module_run_times(&self) -> HashMap<String, u64> {
        self.run_times.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn registered_worker_starts_idle() {
        let tracker = ProgressTracker::new();
        tracker.register_worker(1);

        let snaps = tracker.snapshots();
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].is_idle());
        assert_eq!(snaps[0].worker_id(), 1);
        assert_eq!(snaps[0].job_id(), None);
    }

    #[test]
    fn file_snapshot_carries_full_context() {
        let tracker = ProgressTracker::new();
        tracker.register_worker(3);
        tracker.task_started_file(3, 7, "Hash Lookup", "laptop-01", "invoice.pdf");

        let snap = tracker
            .snapshots()
            .into_iter()
            .find(|s| s.worker_id() == 3)
            .unwrap();
        assert_eq!(snap.job_id(), Some(7));
        assert_eq!(snap.activity(), "Hash Lookup");
        assert_eq!(snap.data_source_name(), "laptop-01");
        assert_eq!(snap.file_name(), "invoice.pdf");
        assert!(!snap.is_idle());
    }

    /// Idle intervals must never be credited to the ledger.
    #[test]
    fn idle_time_is_not_accumulated() {
        let tracker = ProgressTracker::new();
        tracker.register_worker(1);
        thread::sleep(Duration::from_millis(5));
        tracker.task_started_file(1, 1, "Module A", "ds", "f");
        tracker.task_completed(1);

        let times = tracker.module_run_times();
        assert!(!times.contains_key(IDLE_ACTIVITY));
        assert!(times.contains_key("Module A"));
    }

    /// The ledger entry for a module must cover the interval between its
    /// snapshot and the transition away from it.
    #[test]
    fn run_time_accumulates_across_transitions() {
        let tracker = ProgressTracker::new();
        tracker.register_worker(1);

        tracker.task_started_file(1, 1, "Module A", "ds", "f1");
        thread::sleep(Duration::from_millis(20));
        tracker.task_started_file(1, 1, "Module B", "ds", "f1");
        thread::sleep(Duration::from_millis(20));
        tracker.task_completed(1);

        let times = tracker.module_run_times();
        assert!(times["Module A"] >= 15, "Module A time: {:?}", times);
        assert!(times["Module B"] >= 15, "Module B time: {:?}", times);
    }

    /// Back-to-back snapshots naming the same module must still sum to
    /// the full contiguous interval.
    #[test]
    fn same_module_consecutive_snapshots_sum_contiguously() {
        let tracker = ProgressTracker::new();
        tracker.register_worker(1);

        tracker.task_started_file(1, 1, "Module A", "ds", "f1");
        thread::sleep(Duration::from_millis(10));
        tracker.task_started_file(1, 1, "Module A", "ds", "f2");
        thread::sleep(Duration::from_millis(10));
        tracker.task_completed(1);

        let times = tracker.module_run_times();
        assert!(times["Module A"] >= 15, "Module A time: {:?}", times);
    }
}
