/// One ingest job: a set of data sources bound to a module pipeline.
///
/// The job owns pipeline construction and teardown, the cancellation flag
/// consulted by in-flight tasks, and the pending-task accounting that
/// detects completion even though file tasks are discovered incrementally.
/// All progress state is atomic, so snapshot queries never block task
/// execution.
use crate::manager::ManagerInner;
use crate::model::{DataSource, JobSettings, JobSnapshot};
use crate::module::{IngestServices, ModuleContext, ModulePipeline, ModuleStartError};
use chrono::{DateTime, Local};
use compact_str::CompactString;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Lifecycle of an ingest job. `Started` covers module startup; a job
/// whose startup fails reverts to `Created` and never runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Started,
    Running,
    Completed,
    Cancelled,
}

/// Progress counters for one data source within the job.
struct DataSourceProgress {
    name: CompactString,
    files_discovered: AtomicU64,
    files_processed: AtomicU64,
    data_source_done: AtomicBool,
}

pub struct IngestJob {
    id: u64,
    data_sources: Vec<Arc<DataSource>>,
    settings: JobSettings,
    interactive: bool,
    started_at: DateTime<Local>,
    cancelled: Arc<AtomicBool>,
    state: Mutex<JobState>,
    pipelines: RwLock<Vec<Arc<ModulePipeline>>>,
    progress: Vec<DataSourceProgress>,
    /// Tasks enqueued but not yet executed. Incremented before enqueue.
    pending_tasks: AtomicU64,
    /// Set once the scheduler has seeded every task for this job.
    seeded: AtomicBool,
    /// Guards the exactly-once completion report.
    finished: AtomicBool,
    services: IngestServices,
}

impl IngestJob {
    pub(crate) fn new(
        id: u64,
        data_sources: Vec<Arc<DataSource>>,
        settings: JobSettings,
        interactive: bool,
        cancelled: Arc<AtomicBool>,
        services: IngestServices,
    ) -> Arc<Self> {
        let progress = data_sources
            .iter()
            .map(|ds| DataSourceProgress {
                name: ds.name.clone(),
                files_discovered: AtomicU64::new(0),
                files_processed: AtomicU64::new(0),
                data_source_done: AtomicBool::new(false),
            })
            .collect();

        Arc::new(Self {
            id,
            data_sources,
            settings,
            interactive,
            started_at: Local::now(),
            cancelled,
            state: Mutex::new(JobState::Created),
            pipelines: RwLock::new(Vec::new()),
            progress,
            pending_tasks: AtomicU64::new(0),
            seeded: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            services,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn data_sources(&self) -> &[Arc<DataSource>] {
        &self.data_sources
    }

    pub fn settings(&self) -> &JobSettings {
        &self.settings
    }

    pub(crate) fn services(&self) -> &IngestServices {
        &self.services
    }

    /// True if the job's settings would produce a non-empty pipeline.
    pub fn has_pipeline(&self) -> bool {
        !self.settings.module_factories.is_empty()
    }

    /// Build and start one module pipeline per data source. Every factory
    /// is attempted so the caller sees the full error list; a non-empty
    /// return means the job never runs and the modules that did start
    /// have been shut down again.
    pub(crate) fn start(&self) -> Vec<ModuleStartError> {
        *self.state.lock() = JobState::Started;

        let mut pipelines = Vec::with_capacity(self.data_sources.len());
        let mut errors = Vec::new();
        for data_source in &self.data_sources {
            let context = ModuleContext {
                job_id: self.id,
                data_source: Arc::clone(data_source),
                interactive: self.interactive,
                services: self.services.clone(),
            };
            match ModulePipeline::build(&self.settings.module_factories, &context) {
                Ok(pipeline) => pipelines.push(Arc::new(pipeline)),
                Err(mut pipeline_errors) => errors.append(&mut pipeline_errors),
            }
        }

        if errors.is_empty() {
            *self.pipelines.write() = pipelines;
            *self.state.lock() = JobState::Running;
        } else {
            for pipeline in &pipelines {
                pipeline.shut_down();
            }
            *self.state.lock() = JobState::Created;
        }
        errors
    }

    /// Request cooperative cancellation. Idempotent; in-flight tasks
    /// observe the flag at their next pipeline-stage boundary.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::Relaxed) {
            info!("ingest job {} cancellation requested", self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Per-data-source progress, readable at any time without blocking
    /// task execution.
    pub fn snapshots(&self) -> Vec<JobSnapshot> {
        self.progress
            .iter()
            .map(|p| JobSnapshot {
                job_id: self.id,
                data_source: p.name.clone(),
                files_discovered: p.files_discovered.load(Ordering::Relaxed),
                files_processed: p.files_processed.load(Ordering::Relaxed),
                data_source_done: p.data_source_done.load(Ordering::Relaxed),
                cancelled: self.is_cancelled(),
                started_at: self.started_at,
            })
            .collect()
    }

    pub(crate) fn pipeline(&self, ds_index: usize) -> Option<Arc<ModulePipeline>> {
        self.pipelines.read().get(ds_index).cloned()
    }

    // ── Task accounting (scheduler + executors) ─────────────────────────

    pub(crate) fn task_enqueued(&self) {
        self.pending_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo `task_enqueued` when the enqueue itself failed (queue closed
    /// during shutdown).
    pub(crate) fn task_dropped(&self) {
        self.pending_tasks.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn seeding_complete(&self) {
        self.seeded.store(true, Ordering::SeqCst);
    }

    pub(crate) fn file_discovered(&self, ds_index: usize) {
        self.progress[ds_index]
            .files_discovered
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn file_processed(&self, ds_index: usize) {
        self.progress[ds_index]
            .files_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn data_source_done(&self, ds_index: usize) {
        self.progress[ds_index]
            .data_source_done
            .store(true, Ordering::Relaxed);
    }

    /// Called by an executor after a task of either tier finished.
    pub(crate) fn task_finished(&self, inner: &ManagerInner) {
        self.pending_tasks.fetch_sub(1, Ordering::SeqCst);
        self.maybe_finish(inner);
    }

    /// Report completion to the orchestrator exactly once, after seeding
    /// is done and the last task has drained. Shuts the pipelines down
    /// before the report so module teardown precedes the lifecycle event.
    pub(crate) fn maybe_finish(&self, inner: &ManagerInner) {
        if self.seeded.load(Ordering::SeqCst)
            && self.pending_tasks.load(Ordering::SeqCst) == 0
            && !self.finished.swap(true, Ordering::SeqCst)
        {
            for pipeline in self.pipelines.read().iter() {
                pipeline.shut_down();
            }
            *self.state.lock() = if self.is_cancelled() {
                JobState::Cancelled
            } else {
                JobState::Completed
            };
            inner.finish_job(self);
        }
    }
}
