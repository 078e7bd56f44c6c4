/// Ingest task executors — the worker loops consuming the task queues.
///
/// Each worker is a named OS thread running an unbounded loop: blocking
/// dequeue, execute, report, repeat. The loop ends only when its queue
/// closes (orchestrator shutdown) or the orchestrator itself is gone;
/// module failures and even module panics never kill a worker.
use crate::events::ModuleEvent;
use crate::manager::ManagerInner;
use crate::messages::IngestMessage;
use crate::module::{IngestModule, IngestServices, IngestStatus};
use crate::scheduler::{DataSourceTask, FileTask};
use crossbeam_channel::Receiver;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, error, warn};

/// Spawn the single data-source-tier worker.
pub(crate) fn spawn_data_source_worker(
    worker_id: u64,
    tasks: Receiver<DataSourceTask>,
    manager: Weak<ManagerInner>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("casesift-ds-ingest-{worker_id}"))
        .spawn(move || {
            debug!("data-source ingest worker {worker_id} started");
            while let Ok(task) = tasks.recv() {
                let Some(inner) = manager.upgrade() else { break };
                task.execute(worker_id, &inner);
            }
            debug!("data-source ingest worker {worker_id} stopped");
        })
        .expect("failed to spawn data-source ingest worker")
}

/// Spawn one file-tier worker.
pub(crate) fn spawn_file_worker(
    worker_id: u64,
    tasks: Receiver<FileTask>,
    manager: Weak<ManagerInner>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(format!("casesift-file-ingest-{worker_id}"))
        .spawn(move || {
            debug!("file ingest worker {worker_id} started");
            while let Ok(task) = tasks.recv() {
                let Some(inner) = manager.upgrade() else { break };
                task.execute(worker_id, &inner);
            }
            debug!("file ingest worker {worker_id} stopped");
        })
        .expect("failed to spawn file ingest worker")
}

/// Invoke one module entry point, containing failures and panics so the
/// worker loop survives any module behavior.
fn run_module<F>(module: &dyn IngestModule, services: &IngestServices, call: F)
where
    F: FnOnce() -> IngestStatus,
{
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(IngestStatus::Ok) => {}
        Ok(IngestStatus::Error) => {
            warn!(
                "module '{}' reported an error (job {})",
                module.display_name(),
                services.job_id()
            );
        }
        Err(_) => {
            error!(
                "module '{}' panicked during processing (job {}); worker continues",
                module.display_name(),
                services.job_id()
            );
            services.post_message(IngestMessage::error(
                module.display_name(),
                "Module failed unexpectedly during processing",
            ));
        }
    }
}

impl DataSourceTask {
    /// Run every data-source pipeline stage for this task's data source,
    /// checking the job's cancellation flag at each stage boundary.
    pub(crate) fn execute(&self, worker_id: u64, inner: &Arc<ManagerInner>) {
        if !self.job.is_cancelled() {
            if let Some(pipeline) = self.job.pipeline(self.ds_index) {
                let services = self.job.services().clone();
                for module in pipeline.modules() {
                    if self.job.is_cancelled() {
                        break;
                    }
                    inner.tracker.task_started_data_source(
                        worker_id,
                        self.job.id(),
                        module.display_name(),
                        &self.data_source.name,
                    );
                    run_module(module.as_ref(), &services, || {
                        module.process_data_source(&self.data_source, &services)
                    });
                }
            }
        }
        inner.tracker.task_completed(worker_id);
        self.job.data_source_done(self.ds_index);
        self.job.task_finished(inner);
    }
}

impl FileTask {
    /// Run every file pipeline stage for this task's file. A completed
    /// (non-cancelled) pass fires `FileDone` and counts toward the data
    /// source's processed total.
    pub(crate) fn execute(&self, worker_id: u64, inner: &Arc<ManagerInner>) {
        let mut processed = false;
        if !self.job.is_cancelled() {
            if let Some(pipeline) = self.job.pipeline(self.ds_index) {
                let services = self.job.services().clone();
                for module in pipeline.modules() {
                    if self.job.is_cancelled() {
                        break;
                    }
                    inner.tracker.task_started_file(
                        worker_id,
                        self.job.id(),
                        module.display_name(),
                        &self.file.data_source,
                        &self.file.name,
                    );
                    run_module(module.as_ref(), &services, || {
                        module.process_file(&self.file, &services)
                    });
                }
                processed = !self.job.is_cancelled();
            }
        }

        if processed {
            self.job.file_processed(self.ds_index);
            inner.module_events.publish(ModuleEvent::FileDone {
                file: Arc::clone(&self.file),
            });
        }
        inner.tracker.task_completed(worker_id);
        self.job.task_finished(inner);
    }
}
