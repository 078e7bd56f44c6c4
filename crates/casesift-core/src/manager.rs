/// The ingest orchestrator.
///
/// `IngestManager` composes the task scheduler, the worker pools, the
/// event publishers, the progress tracker, and the resource monitor into
/// one engine. It is an explicit instance — construct it once at process
/// start and pass clones of the handle to whatever needs it; there is no
/// hidden global.
///
/// Lifecycle: `new` spawns every pool thread immediately (workers block
/// on empty queues until work arrives); `open_session` enables job
/// creation; `close_session` disables it and cancels everything;
/// `shutdown` additionally closes the queues and joins all owned threads.
///
/// Locking: the live-job registry, starter registry, and snapshot maps
/// are individually locked and safe for concurrent use from any worker.
/// The job-creation gate is a coarse mutex because enabling, disabling,
/// and the creation checks are check-then-act sequences that must not
/// interleave. Lock order is gate before any registry; no code path takes
/// them in reverse.
use crate::events::{EventPublisher, JobEvent, ListenerId, ModuleEvent};
use crate::executor;
use crate::job::IngestJob;
use crate::messages::{IngestMessage, MessagePoster, MessageSink};
use crate::model::{DataSource, JobSettings, JobSnapshot};
use crate::module::IngestServices;
use crate::monitor::{start_monitor, MonitorConfig, MonitorHandle};
use crate::prefs;
use crate::progress::{ProgressTracker, ThreadActivitySnapshot};
use crate::scheduler::TaskScheduler;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, info};

/// Construction-time configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// File-tier worker count; clamped to the supported range.
    pub file_ingest_workers: usize,
    /// Whether operator messages are surfaced.
    pub interactive: bool,
    /// Resource monitor settings (the monitor itself starts lazily with
    /// the first job).
    pub monitor: MonitorConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            file_ingest_workers: prefs::DEFAULT_FILE_INGEST_WORKERS,
            interactive: true,
            monitor: MonitorConfig::default(),
        }
    }
}

/// Cancellation-token-bearing handle for a queued job start.
///
/// `cancel` prevents the start from running if it has not begun yet;
/// a start already under way runs to its natural conclusion, after which
/// normal job cancellation applies.
#[derive(Clone)]
pub struct JobStarterHandle {
    cancelled: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
}

impl JobStarterHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Relaxed)
    }

    fn mark_done(&self) {
        self.done.store(true, Ordering::Relaxed);
    }
}

/// A queued job start awaiting the starter worker.
struct StarterTask {
    starter_id: u64,
    job: Arc<IngestJob>,
    handle: JobStarterHandle,
}

/// Cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct IngestManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    pub(crate) scheduler: TaskScheduler,
    pub(crate) tracker: ProgressTracker,
    pub(crate) job_events: EventPublisher<JobEvent>,
    pub(crate) module_events: EventPublisher<ModuleEvent>,
    pub(crate) poster: MessagePoster,
    /// Live jobs: started but not yet completed or cancelled.
    jobs: RwLock<HashMap<u64, Arc<IngestJob>>>,
    /// Pending job starts, keyed by starter id.
    starters: Mutex<HashMap<u64, JobStarterHandle>>,
    starter_tx: Mutex<Option<Sender<StarterTask>>>,
    /// Job-creation gate; false until a session opens.
    gate: Mutex<bool>,
    monitor: Mutex<Option<MonitorHandle>>,
    monitor_config: MonitorConfig,
    // Independent id spaces: jobs, workers, and starter tasks never
    // cross-reference each other's sequences.
    next_job_id: AtomicU64,
    next_worker_id: AtomicU64,
    next_starter_id: AtomicU64,
    file_worker_count: usize,
    interactive: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl IngestManager {
    /// Build the orchestrator and spawn its pools: one data-source
    /// worker, the configured number of file workers, the job-starter
    /// worker, and both event dispatchers.
    pub fn new(config: IngestConfig) -> Self {
        let file_worker_count = prefs::clamp_workers(config.file_ingest_workers);
        let poster = MessagePoster::new(config.interactive);

        let inner = Arc::new(ManagerInner {
            scheduler: TaskScheduler::new(),
            tracker: ProgressTracker::new(),
            job_events: EventPublisher::new("job", poster.clone()),
            module_events: EventPublisher::new("module", poster.clone()),
            poster,
            jobs: RwLock::new(HashMap::new()),
            starters: Mutex::new(HashMap::new()),
            starter_tx: Mutex::new(None),
            gate: Mutex::new(false),
            monitor: Mutex::new(None),
            monitor_config: config.monitor,
            next_job_id: AtomicU64::new(0),
            next_worker_id: AtomicU64::new(0),
            next_starter_id: AtomicU64::new(0),
            file_worker_count,
            interactive: AtomicBool::new(config.interactive),
            workers: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(file_worker_count + 2);

        let ds_worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;
        inner.tracker.register_worker(ds_worker_id);
        workers.push(executor::spawn_data_source_worker(
            ds_worker_id,
            inner.scheduler.data_source_receiver(),
            Arc::downgrade(&inner),
        ));

        for _ in 0..file_worker_count {
            let worker_id = inner.next_worker_id.fetch_add(1, Ordering::Relaxed) + 1;
            inner.tracker.register_worker(worker_id);
            workers.push(executor::spawn_file_worker(
                worker_id,
                inner.scheduler.file_receiver(),
                Arc::downgrade(&inner),
            ));
        }

        let (starter_tx, starter_rx) = unbounded::<StarterTask>();
        workers.push(spawn_job_starter(starter_rx, Arc::downgrade(&inner)));
        *inner.starter_tx.lock() = Some(starter_tx);
        *inner.workers.lock() = workers;

        info!(
            "ingest manager started: 1 data-source worker, {file_worker_count} file workers"
        );
        Self { inner }
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Enable job creation and reset the message surface. Call when a
    /// case/session opens.
    pub fn open_session(&self) {
        *self.inner.gate.lock() = true;
        self.inner.poster.clear();
        info!("ingest session opened; job creation enabled");
    }

    /// Disable job creation, cancel everything in flight, and reset the
    /// message surface. Call when the session closes.
    pub fn close_session(&self) {
        *self.inner.gate.lock() = false;
        self.inner.cancel_all_jobs();
        self.inner.poster.clear();
        info!("ingest session closed; job creation disabled");
    }

    // ── Job creation ────────────────────────────────────────────────────

    /// Queue a job to be started on the job-starter worker.
    /// Fire-and-forget: returns a cancellation handle, or `None` when job
    /// creation is disabled or the pipeline would be empty (the request
    /// is silently dropped, matching the orderly-shutdown contract).
    pub fn queue_job(
        &self,
        data_sources: Vec<DataSource>,
        settings: JobSettings,
    ) -> Option<JobStarterHandle> {
        let inner = &self.inner;
        let gate = inner.gate.lock();
        if !*gate {
            return None;
        }
        let job = inner.make_job(data_sources, settings);
        if !job.has_pipeline() {
            return None;
        }

        let starter_id = inner.next_starter_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = JobStarterHandle::new();
        inner.starters.lock().insert(starter_id, handle.clone());
        let sent = match inner.starter_tx.lock().as_ref() {
            Some(tx) => tx
                .send(StarterTask {
                    starter_id,
                    job,
                    handle: handle.clone(),
                })
                .is_ok(),
            None => false,
        };
        if !sent {
            inner.starters.lock().remove(&starter_id);
            return None;
        }
        Some(handle)
    }

    /// Start a job synchronously on the calling thread (pipeline
    /// construction and file discovery included). Returns the job on
    /// success, `None` on disabled creation, an empty pipeline, or module
    /// startup errors.
    pub fn start_job(
        &self,
        data_sources: Vec<DataSource>,
        settings: JobSettings,
    ) -> Option<Arc<IngestJob>> {
        let job = {
            let gate = self.inner.gate.lock();
            if !*gate {
                return None;
            }
            let job = self.inner.make_job(data_sources, settings);
            if !job.has_pipeline() {
                return None;
            }
            job
        };
        ManagerInner::start_ingest_job(&self.inner, &job).then_some(job)
    }

    /// Cancel all pending job starts and request cancellation of every
    /// live job. Idempotent; safe with zero live jobs.
    pub fn cancel_all_jobs(&self) {
        self.inner.cancel_all_jobs();
    }

    /// True iff the live-job registry is non-empty. Advisory: the answer
    /// can be stale by the time the caller acts on it.
    pub fn is_running(&self) -> bool {
        !self.inner.jobs.read().is_empty()
    }

    // ── Listener registration ───────────────────────────────────────────

    pub fn add_job_event_listener(
        &self,
        listener: impl Fn(&JobEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.job_events.subscribe(listener)
    }

    pub fn remove_job_event_listener(&self, id: ListenerId) -> bool {
        self.inner.job_events.unsubscribe(id)
    }

    pub fn add_module_event_listener(
        &self,
        listener: impl Fn(&ModuleEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        self.inner.module_events.subscribe(listener)
    }

    pub fn remove_module_event_listener(&self, id: ListenerId) -> bool {
        self.inner.module_events.unsubscribe(id)
    }

    // ── Query surface (non-blocking, point-in-time) ─────────────────────

    /// Latest free-space sample from the resource monitor, −1 when
    /// unknown (monitor not yet started or query failed).
    pub fn free_disk_space(&self) -> i64 {
        self.inner
            .monitor
            .lock()
            .as_ref()
            .map(|m| m.free_space())
            .unwrap_or(-1)
    }

    /// Cumulative milliseconds spent per module display name.
    pub fn module_run_times(&self) -> HashMap<String, u64> {
        self.inner.tracker.module_run_times()
    }

    /// Current activity of every ingest worker.
    pub fn thread_activity_snapshots(&self) -> Vec<Arc<ThreadActivitySnapshot>> {
        self.inner.tracker.snapshots()
    }

    /// Per-data-source progress of every live job.
    pub fn job_snapshots(&self) -> Vec<JobSnapshot> {
        self.inner
            .jobs
            .read()
            .values()
            .flat_map(|job| job.snapshots())
            .collect()
    }

    pub fn file_worker_count(&self) -> usize {
        self.inner.file_worker_count
    }

    // ── Messages ────────────────────────────────────────────────────────

    pub fn set_interactive(&self, interactive: bool) {
        self.inner.interactive.store(interactive, Ordering::Relaxed);
        self.inner.poster.set_interactive(interactive);
    }

    pub fn set_message_sink(&self, sink: Arc<dyn MessageSink>) {
        self.inner.poster.set_sink(sink);
    }

    pub fn post_message(&self, message: IngestMessage) {
        self.inner.poster.post(message);
    }

    // ── Shutdown ────────────────────────────────────────────────────────

    /// Orderly teardown: disable creation, cancel everything, close the
    /// queues, and join every owned thread. Idempotent. Events already
    /// published are delivered before the dispatchers stop.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("ingest manager shutting down");

        *inner.gate.lock() = false;
        inner.cancel_all_jobs();

        // Stop producers first: no new job starts, no new tasks.
        drop(inner.starter_tx.lock().take());
        inner.scheduler.close();

        // Workers (including the starter) finish in-flight tasks, drain
        // the closed queues, and exit.
        let workers = std::mem::take(&mut *inner.workers.lock());
        for handle in workers {
            let _ = handle.join();
        }

        if let Some(monitor) = inner.monitor.lock().take() {
            monitor.stop_and_join();
        }

        // Event buses last, so completion events from the drain land.
        inner.job_events.shutdown();
        inner.module_events.shutdown();
        info!("ingest manager shut down");
    }
}

impl ManagerInner {
    fn make_job(&self, data_sources: Vec<DataSource>, settings: JobSettings) -> Arc<IngestJob> {
        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed) + 1;
        let cancelled = Arc::new(AtomicBool::new(false));
        let services = IngestServices::new(
            id,
            Arc::clone(&cancelled),
            self.module_events.sender(),
            self.poster.clone(),
        );
        IngestJob::new(
            id,
            data_sources.into_iter().map(Arc::new).collect(),
            settings,
            self.interactive.load(Ordering::Relaxed),
            cancelled,
            services,
        )
    }

    /// Start `job`: register it, build its pipelines, and on success fire
    /// `Started` and hand it to the scheduler. The registry insert happens
    /// *before* startup so `is_running()` is true while modules read
    /// shared configuration during `start_up`; a job that fails to start
    /// is removed again and never runs.
    pub(crate) fn start_ingest_job(inner: &Arc<ManagerInner>, job: &Arc<IngestJob>) -> bool {
        {
            let gate = inner.gate.lock();
            if !*gate {
                debug!("job {} not started: job creation is disabled", job.id());
                return false;
            }
            // First job of a batch gets a clean operator inbox.
            if inner.interactive.load(Ordering::Relaxed) && inner.jobs.read().is_empty() {
                inner.poster.clear();
            }
        }

        Self::ensure_monitor_started(inner);

        inner.jobs.write().insert(job.id(), Arc::clone(job));
        let errors = job.start();
        if errors.is_empty() {
            info!("ingest job {} started", job.id());
            inner.job_events.publish(JobEvent::Started { job_id: job.id() });
            inner.scheduler.schedule_job(job);
            // A job with no schedulable work completes immediately.
            job.maybe_finish(inner);
            true
        } else {
            inner.jobs.write().remove(&job.id());
            for error in &errors {
                error!("error starting ingest module: {error}");
                inner.poster.post(IngestMessage::error(
                    &error.module,
                    format!("Failed to start: {}", error.error),
                ));
            }
            info!("ingest job {} could not be started", job.id());
            false
        }
    }

    pub(crate) fn cancel_all_jobs(&self) {
        for handle in self.starters.lock().values() {
            handle.cancel();
        }
        let jobs: Vec<Arc<IngestJob>> = self.jobs.read().values().cloned().collect();
        info!("cancelling all ingest jobs ({} live)", jobs.len());
        for job in jobs {
            job.cancel();
        }
    }

    /// Remove a finished job from the registry and fire its terminal
    /// event. Called exactly once per job, by the job itself.
    pub(crate) fn finish_job(&self, job: &IngestJob) {
        self.jobs.write().remove(&job.id());
        if job.is_cancelled() {
            info!("ingest job {} cancelled", job.id());
            self.job_events.publish(JobEvent::Cancelled { job_id: job.id() });
        } else {
            info!("ingest job {} completed", job.id());
            self.job_events.publish(JobEvent::Completed { job_id: job.id() });
        }
    }

    /// Disk pressure: stop creating jobs and cancel the whole job set.
    pub(crate) fn handle_resource_breach(&self, free_bytes: u64) {
        *self.gate.lock() = false;
        self.poster.post(IngestMessage::error(
            "Ingest",
            format!(
                "Ingest stopped: only {free_bytes} bytes of free space remain on the case volume"
            ),
        ));
        self.cancel_all_jobs();
    }

    fn ensure_monitor_started(inner: &Arc<ManagerInner>) {
        let mut monitor = inner.monitor.lock();
        if monitor.is_none() {
            *monitor = Some(start_monitor(
                inner.monitor_config.clone(),
                Arc::downgrade(inner),
            ));
        }
    }
}

/// The single-threaded job-starter worker: pulls queued starts and runs
/// them unless their handle was cancelled first.
fn spawn_job_starter(
    tasks: Receiver<StarterTask>,
    manager: Weak<ManagerInner>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("casesift-job-starter".to_owned())
        .spawn(move || {
            debug!("job starter worker started");
            while let Ok(task) = tasks.recv() {
                let Some(inner) = manager.upgrade() else { break };
                if task.handle.is_cancelled() {
                    debug!(
                        "starter task {} cancelled before job {} started",
                        task.starter_id,
                        task.job.id()
                    );
                } else {
                    ManagerInner::start_ingest_job(&inner, &task.job);
                }
                task.handle.mark_done();
                inner.starters.lock().remove(&task.starter_id);
            }
            debug!("job starter worker stopped");
        })
        .expect("failed to spawn job starter worker")
}
