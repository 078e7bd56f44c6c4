/// End-to-end ingest job lifecycle tests.
///
/// These tests exercise the real orchestrator — worker pools, scheduler,
/// event bus — against temporary directory trees, verifying job creation,
/// completion, cancellation, and the creation gate.
///
/// **Why a `tests/` integration test (not unit test)?**
///
/// The manager spawns real OS threads that block on real queues; the
/// interesting properties (exactly-once events, registry consistency,
/// cooperative cancellation) only exist with all of the pieces running
/// together. A tempdir plus a counting module exercises every code path
/// with zero mocking.
use casesift_core::events::JobEvent;
use casesift_core::messages::{IngestMessage, MessageSink};
use casesift_core::model::{DataSource, JobSettings};
use casesift_core::module::{
    IngestModule, IngestModuleFactory, IngestServices, IngestStatus, ModuleContext, ModuleError,
};
use casesift_core::monitor::MonitorConfig;
use casesift_core::{IngestConfig, IngestManager};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Build a manager with an open session, the given file-worker count, and
/// the resource monitor effectively disabled (floor 0) so low-disk CI
/// machines cannot cancel jobs out from under a test.
fn manager_with_workers(workers: usize) -> IngestManager {
    let manager = IngestManager::new(IngestConfig {
        file_ingest_workers: workers,
        interactive: true,
        monitor: MonitorConfig {
            path: std::env::temp_dir(),
            min_free_bytes: 0,
            poll_interval: Duration::from_secs(60),
        },
    });
    manager.open_session();
    manager
}

/// Create a reproducible directory tree:
///
/// ```text
/// root/
///   alpha/
///     a.txt   (100 bytes)
///     b.rs    (200 bytes)
///   beta/
///     c.png   (300 bytes)
///   d.zip     (400 bytes)
/// ```
fn build_test_tree(root: &Path) {
    let alpha = root.join("alpha");
    let beta = root.join("beta");
    fs::create_dir_all(&alpha).unwrap();
    fs::create_dir_all(&beta).unwrap();

    write_bytes(&alpha.join("a.txt"), 100);
    write_bytes(&alpha.join("b.rs"), 200);
    write_bytes(&beta.join("c.png"), 300);
    write_bytes(&root.join("d.zip"), 400);
}

fn write_bytes(path: &Path, n: usize) {
    let mut f = fs::File::create(path).unwrap();
    f.write_all(&vec![0u8; n]).unwrap();
}

/// Subscribe a channel to the manager's job events.
fn job_event_channel(manager: &IngestManager) -> Receiver<JobEvent> {
    let (tx, rx) = unbounded();
    manager.add_job_event_listener(move |event| {
        let _ = tx.send(event.clone());
    });
    rx
}

/// Collect job events until `stop_on` matches one, panicking after a
/// generous 30-second deadline so a wedged engine fails the suite instead
/// of hanging it.
fn collect_until(rx: &Receiver<JobEvent>, stop_on: impl Fn(&JobEvent) -> bool) -> Vec<JobEvent> {
    let deadline = Instant::now() + Duration::from_secs(30);
    let mut seen = Vec::new();
    while Instant::now() < deadline {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(event) => {
                let stop = stop_on(&event);
                seen.push(event);
                if stop {
                    return seen;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    panic!("timed out waiting for a job event; saw {seen:?}");
}

/// Shared counters recording what a `CountingModule` observed.
#[derive(Default)]
struct Counts {
    data_sources: AtomicU64,
    files: AtomicU64,
}

/// A module that counts the units it processes. Optionally fails at
/// startup, or blocks each file call on a gate channel until the test
/// releases it (by dropping the sender).
struct CountingFactory {
    name: String,
    counts: Arc<Counts>,
    fail_startup: bool,
    file_gate: Option<Receiver<()>>,
    startup_gate: Option<Receiver<()>>,
}

impl CountingFactory {
    fn new(name: &str) -> (Arc<Self>, Arc<Counts>) {
        let counts = Arc::new(Counts::default());
        let factory = Arc::new(Self {
            name: name.to_owned(),
            counts: Arc::clone(&counts),
            fail_startup: false,
            file_gate: None,
            startup_gate: None,
        });
        (factory, counts)
    }

    fn failing(name: &str) -> Arc<Self> {
        let (mut factory, _) = Self::new(name);
        Arc::get_mut(&mut factory).unwrap().fail_startup = true;
        factory
    }

    /// Every `process_file` call blocks until `gate` is closed.
    fn gated(name: &str, gate: Receiver<()>) -> (Arc<Self>, Arc<Counts>) {
        let (mut factory, counts) = Self::new(name);
        Arc::get_mut(&mut factory).unwrap().file_gate = Some(gate);
        (factory, counts)
    }

    /// `start_up` blocks until `gate` is closed; pins the thread that is
    /// starting the job (the starter worker, for queued jobs).
    fn startup_gated(name: &str, gate: Receiver<()>) -> (Arc<Self>, Arc<Counts>) {
        let (mut factory, counts) = Self::new(name);
        Arc::get_mut(&mut factory).unwrap().startup_gate = Some(gate);
        (factory, counts)
    }
}

impl IngestModuleFactory for CountingFactory {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> Box<dyn IngestModule> {
        Box::new(CountingModule {
            name: self.name.clone(),
            counts: Arc::clone(&self.counts),
            fail_startup: self.fail_startup,
            file_gate: self.file_gate.clone(),
            startup_gate: self.startup_gate.clone(),
        })
    }
}

struct CountingModule {
    name: String,
    counts: Arc<Counts>,
    fail_startup: bool,
    file_gate: Option<Receiver<()>>,
    startup_gate: Option<Receiver<()>>,
}

impl IngestModule for CountingModule {
    fn display_name(&self) -> &str {
        &self.name
    }

    fn start_up(&self, _context: &ModuleContext) -> Result<(), ModuleError> {
        if let Some(gate) = &self.startup_gate {
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        if self.fail_startup {
            Err(ModuleError::new("induced startup failure"))
        } else {
            Ok(())
        }
    }

    fn process_data_source(
        &self,
        _data_source: &casesift_core::model::DataSource,
        _services: &IngestServices,
    ) -> IngestStatus {
        self.counts.data_sources.fetch_add(1, Ordering::Relaxed);
        IngestStatus::Ok
    }

    fn process_file(
        &self,
        _file: &casesift_core::model::CaseFile,
        _services: &IngestServices,
    ) -> IngestStatus {
        if let Some(gate) = &self.file_gate {
            // Block until the test releases the gate (or 10 s passes, so
            // a buggy test cannot deadlock the suite).
            let _ = gate.recv_timeout(Duration::from_secs(10));
        }
        self.counts.files.fetch_add(1, Ordering::Relaxed);
        IngestStatus::Ok
    }
}

fn settings_with(factory: Arc<CountingFactory>) -> JobSettings {
    JobSettings::new(vec![factory as Arc<dyn IngestModuleFactory>])
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Three data sources, one module, two file workers: exactly one Started
/// and one Completed event, every file processed, the module present in
/// the run-time ledger, and the registry empty afterwards.
#[test]
fn end_to_end_three_sources_completes_once() {
    let manager = manager_with_workers(2);
    let events = job_event_channel(&manager);

    let tmps: Vec<TempDir> = (0..3).map(|_| TempDir::new().unwrap()).collect();
    for tmp in &tmps {
        build_test_tree(tmp.path());
    }
    let sources: Vec<DataSource> = tmps
        .iter()
        .map(|tmp| DataSource::folder(tmp.path()))
        .collect();

    let (factory, counts) = CountingFactory::new("Tally Module");
    let job = manager
        .start_job(sources, settings_with(factory))
        .expect("job should start");

    let seen = collect_until(&events, |e| matches!(e, JobEvent::Completed { .. }));

    let started = seen
        .iter()
        .filter(|e| matches!(e, JobEvent::Started { .. }))
        .count();
    let completed = seen
        .iter()
        .filter(|e| matches!(e, JobEvent::Completed { .. }))
        .count();
    let cancelled = seen
        .iter()
        .filter(|e| matches!(e, JobEvent::Cancelled { .. }))
        .count();
    assert_eq!(started, 1, "exactly one Started: {seen:?}");
    assert_eq!(completed, 1, "exactly one Completed: {seen:?}");
    assert_eq!(cancelled, 0, "no Cancelled: {seen:?}");

    // 4 files per tree, 3 trees.
    assert_eq!(counts.files.load(Ordering::Relaxed), 12);
    assert_eq!(counts.data_sources.load(Ordering::Relaxed), 3);
    assert_eq!(job.state(), casesift_core::job::JobState::Completed);

    // The ledger names the module once it has run.
    let times = manager.module_run_times();
    assert!(
        times.contains_key("Tally Module"),
        "run times missing module: {times:?}"
    );

    // The job is gone from the live registry.
    assert!(!manager.is_running());
    assert!(manager.job_snapshots().is_empty());

    manager.shutdown();
}

/// Cancelling mid-run fires Cancelled (never Completed) exactly once and
/// removes the job from subsequent snapshots.
#[test]
fn cancel_mid_run_fires_cancelled_exactly_once() {
    let manager = manager_with_workers(2);
    let events = job_event_channel(&manager);

    let tmp = TempDir::new().unwrap();
    for i in 0..10 {
        write_bytes(&tmp.path().join(format!("file{i:02}.bin")), 64);
    }

    let (gate_tx, gate_rx) = unbounded::<()>();
    let (factory, _counts) = CountingFactory::gated("Slow Module", gate_rx);

    let job = manager
        .start_job(vec![DataSource::folder(tmp.path())], settings_with(factory))
        .expect("job should start");
    assert!(manager.is_running());

    // Workers are now blocked inside process_file. Cancel, then release.
    manager.cancel_all_jobs();
    assert!(job.is_cancelled());
    drop(gate_tx);

    let seen = collect_until(&events, |e| matches!(e, JobEvent::Cancelled { .. }));
    assert_eq!(
        seen.iter()
            .filter(|e| matches!(e, JobEvent::Cancelled { .. }))
            .count(),
        1
    );
    assert!(
        !seen.iter().any(|e| matches!(e, JobEvent::Completed { .. })),
        "a cancelled job must not complete: {seen:?}"
    );

    assert!(manager.job_snapshots().is_empty());
    assert!(!manager.is_running());
    assert_eq!(job.state(), casesift_core::job::JobState::Cancelled);

    manager.shutdown();
}

/// A job with an empty pipeline is silently dropped: no registry entry,
/// no Started event.
#[test]
fn empty_pipeline_never_registers_or_fires() {
    let manager = manager_with_workers(1);
    let events = job_event_channel(&manager);

    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    assert!(manager
        .start_job(vec![DataSource::folder(tmp.path())], JobSettings::default())
        .is_none());
    assert!(manager
        .queue_job(vec![DataSource::folder(tmp.path())], JobSettings::default())
        .is_none());

    std::thread::sleep(Duration::from_millis(100));
    assert!(events.try_iter().next().is_none(), "no events expected");
    assert!(!manager.is_running());

    manager.shutdown();
}

/// While job creation is disabled, queue_job/start_job are no-ops.
#[test]
fn creation_disabled_is_noop() {
    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    // Freshly constructed manager: no session opened yet.
    let manager = IngestManager::new(IngestConfig {
        monitor: MonitorConfig {
            path: std::env::temp_dir(),
            min_free_bytes: 0,
            poll_interval: Duration::from_secs(60),
        },
        ..IngestConfig::default()
    });
    let (factory, counts) = CountingFactory::new("Never Runs");
    assert!(manager
        .start_job(
            vec![DataSource::folder(tmp.path())],
            settings_with(Arc::clone(&factory))
        )
        .is_none());
    assert!(manager
        .queue_job(
            vec![DataSource::folder(tmp.path())],
            settings_with(Arc::clone(&factory))
        )
        .is_none());

    // Open then close: still disabled.
    manager.open_session();
    manager.close_session();
    assert!(manager
        .start_job(vec![DataSource::folder(tmp.path())], settings_with(factory))
        .is_none());

    assert!(!manager.is_running());
    assert_eq!(counts.files.load(Ordering::Relaxed), 0);

    manager.shutdown();
}

/// cancel_all_jobs is idempotent: repeated calls with no live jobs leave
/// the (empty) registry unchanged.
#[test]
fn cancel_all_jobs_is_idempotent() {
    let manager = manager_with_workers(1);

    manager.cancel_all_jobs();
    manager.cancel_all_jobs();
    assert!(!manager.is_running());
    assert!(manager.job_snapshots().is_empty());

    manager.shutdown();
}

/// A module startup failure aborts the job: no Started event, nothing in
/// the registry, and the error is posted to the message sink.
#[test]
fn startup_failure_reports_errors_and_never_runs() {
    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<IngestMessage>>,
    }
    impl MessageSink for RecordingSink {
        fn post(&self, message: &IngestMessage) {
            self.messages.lock().push(message.clone());
        }
    }

    let manager = manager_with_workers(1);
    let sink = Arc::new(RecordingSink::default());
    manager.set_message_sink(Arc::clone(&sink) as Arc<dyn MessageSink>);
    let events = job_event_channel(&manager);

    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    let result = manager.start_job(
        vec![DataSource::folder(tmp.path())],
        settings_with(CountingFactory::failing("Broken Module")),
    );
    assert!(result.is_none());
    assert!(!manager.is_running());

    std::thread::sleep(Duration::from_millis(100));
    assert!(
        events.try_iter().next().is_none(),
        "a failed start must not fire events"
    );
    assert!(
        sink.messages
            .lock()
            .iter()
            .any(|m| m.source == "Broken Module"),
        "startup error must reach the message sink"
    );

    manager.shutdown();
}

/// queue_job starts the job asynchronously on the starter worker and the
/// returned handle reports completion.
#[test]
fn queue_job_starts_asynchronously() {
    let manager = manager_with_workers(2);
    let events = job_event_channel(&manager);

    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    let (factory, counts) = CountingFactory::new("Async Module");
    let handle = manager
        .queue_job(vec![DataSource::folder(tmp.path())], settings_with(factory))
        .expect("queue_job should accept the job");

    let seen = collect_until(&events, |e| matches!(e, JobEvent::Completed { .. }));
    assert!(seen.iter().any(|e| matches!(e, JobEvent::Started { .. })));
    assert_eq!(counts.files.load(Ordering::Relaxed), 4);

    // The starter marks the handle done after the start runs.
    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_done() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(handle.is_done());

    manager.shutdown();
}

/// A queued start whose handle is cancelled before the starter reaches it
/// never starts its job.
#[test]
fn cancelled_starter_never_starts_job() {
    let manager = manager_with_workers(1);
    let events = job_event_channel(&manager);

    let empty = TempDir::new().unwrap();
    let tmp = TempDir::new().unwrap();
    build_test_tree(tmp.path());

    // Pin the single starter worker inside the first job's start_up, so
    // the second starter task is still queued when we cancel.
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (blocking, _) = CountingFactory::startup_gated("Blocking Module", gate_rx);
    let first = manager
        .queue_job(
            vec![DataSource::folder(tmp.path())],
            settings_with(blocking),
        )
        .expect("first job queued");
    let (second_factory, second_counts) = CountingFactory::new("Second Module");
    let second = manager
        .queue_job(
            vec![DataSource::folder(empty.path())],
            settings_with(second_factory),
        )
        .expect("second job queued");

    // Wait until the starter has dequeued the first task (it is blocked
    // in start_up, so the first job is registered and running startup).
    let deadline = Instant::now() + Duration::from_secs(5);
    while !manager.is_running() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    // Cancel everything while the second starter task is still pending:
    // its cancel token stops it from ever running.
    manager.cancel_all_jobs();
    assert!(first.is_cancelled());
    assert!(second.is_cancelled());
    drop(gate_tx);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !(first.is_done() && second.is_done()) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(second.is_done());

    let seen: Vec<JobEvent> = events.try_iter().collect();
    let started_count = seen
        .iter()
        .filter(|e| matches!(e, JobEvent::Started { .. }))
        .count();
    assert!(
        started_count <= 1,
        "the cancelled second job must never start: {seen:?}"
    );
    assert_eq!(second_counts.files.load(Ordering::Relaxed), 0);

    manager.shutdown();
}
