/// Task decomposition and the blocking task queues.
///
/// Every ingest job is broken into two tiers of tasks: one data-source
/// task per data source, seeded up front, and file tasks added
/// incrementally while the data source is walked. Both tiers feed
/// process-wide queues shared by all jobs, so tasks from concurrent jobs
/// interleave and no job starves the other tier.
///
/// Queue shutdown is signalled by closing the underlying channel: a
/// blocked dequeue then fails with [`QueueClosed`] rather than returning a
/// sentinel, so consumers never confuse "no data yet" with "shut down".
use crate::job::IngestJob;
use crate::model::{CaseFile, DataSource};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// How many walked entries between cancellation checks during file
/// discovery.
const CANCEL_CHECK_INTERVAL: u64 = 256;

/// Dequeue failure: the queue was shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("task queue closed")]
pub struct QueueClosed;

/// An ordered, thread-safe holding area for pending tasks.
///
/// Unbounded: admission policy is the scheduler's job, applied before
/// enqueue. Consumers block on [`TaskQueue::dequeue`] (or a cloned
/// receiver) until a task arrives or the queue closes.
pub struct TaskQueue<T> {
    tx: Mutex<Option<Sender<T>>>,
    rx: Receiver<T>,
}

impl<T> TaskQueue<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Consumer endpoint for a worker loop. All receivers observe the
    /// close signal once the queue drains.
    pub(crate) fn receiver(&self) -> Receiver<T> {
        self.rx.clone()
    }

    /// Non-blocking enqueue. Returns false once the queue is closed.
    pub(crate) fn enqueue(&self, task: T) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(task).is_ok(),
            None => false,
        }
    }

    /// Block until a task is available or the queue is closed and empty.
    pub fn dequeue(&self) -> Result<T, QueueClosed> {
        self.rx.recv().map_err(|_| QueueClosed)
    }

    /// Close the queue. Pending tasks remain dequeueable; once drained,
    /// every blocked or future dequeue fails with [`QueueClosed`].
    pub(crate) fn close(&self) {
        drop(self.tx.lock().take());
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// A data-source-level unit of work: run the data-source pipeline stages
/// for one data source of one job.
pub struct DataSourceTask {
    pub(crate) job: Arc<IngestJob>,
    pub(crate) data_source: Arc<DataSource>,
    pub(crate) ds_index: usize,
}

/// A file-level unit of work: run the file pipeline stages for one file.
pub struct FileTask {
    pub(crate) job: Arc<IngestJob>,
    pub(crate) file: Arc<CaseFile>,
    pub(crate) ds_index: usize,
}

/// Converts jobs into task streams and owns both queues.
pub(crate) struct TaskScheduler {
    data_source_queue: TaskQueue<DataSourceTask>,
    file_queue: TaskQueue<FileTask>,
}

impl TaskScheduler {
    pub(crate) fn new() -> Self {
        Self {
            data_source_queue: TaskQueue::new(),
            file_queue: TaskQueue::new(),
        }
    }

    pub(crate) fn data_source_receiver(&self) -> Receiver<DataSourceTask> {
        self.data_source_queue.receiver()
    }

    pub(crate) fn file_receiver(&self) -> Receiver<FileTask> {
        self.file_queue.receiver()
    }

    /// Close both queues; blocked workers exit once the queues drain.
    pub(crate) fn close(&self) {
        self.data_source_queue.close();
        self.file_queue.close();
    }

    /// Decompose `job` into tasks. Data-source tasks are seeded first so
    /// that tier starts immediately; file tasks are enqueued while each
    /// data source is walked. Marks the job fully seeded on return, even
    /// when cancellation cut the walk short, so completion accounting
    /// always converges.
    pub(crate) fn schedule_job(&self, job: &Arc<IngestJob>) {
        for (ds_index, data_source) in job.data_sources().iter().enumerate() {
            job.task_enqueued();
            let task = DataSourceTask {
                job: Arc::clone(job),
                data_source: Arc::clone(data_source),
                ds_index,
            };
            if !self.data_source_queue.enqueue(task) {
                job.task_dropped();
            }
        }

        for (ds_index, data_source) in job.data_sources().iter().enumerate() {
            if job.is_cancelled() {
                break;
            }
            self.schedule_files(job, ds_index, data_source);
        }

        job.seeding_complete();
    }

    /// Walk one data source, enqueuing a file task for every file the
    /// job's filter admits. Unreadable entries are skipped, not fatal.
    fn schedule_files(&self, job: &Arc<IngestJob>, ds_index: usize, data_source: &Arc<DataSource>) {
        debug!(
            "job {}: discovering files in '{}' ({})",
            job.id(),
            data_source.name,
            data_source.root.display()
        );

        let walker = jwalk::WalkDir::new(&data_source.root)
            .skip_hidden(false)
            .follow_links(false)
            .parallelism(jwalk::Parallelism::RayonNewPool(num_cpus::get()));

        let mut visited: u64 = 0;
        let mut admitted: u64 = 0;

        for entry_result in walker {
            visited += 1;
            if visited % CANCEL_CHECK_INTERVAL == 0 && job.is_cancelled() {
                break;
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(
                        "job {}: skipping unreadable entry in '{}': {err}",
                        job.id(),
                        data_source.name
                    );
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let size = match std::fs::symlink_metadata(&path) {
                Ok(meta) => meta.len(),
                Err(err) => {
                    debug!("job {}: cannot stat {}: {err}", job.id(), path.display());
                    continue;
                }
            };

            let file = Arc::new(CaseFile::new(data_source.name.clone(), path, size));
            if !job.settings().filter.admits(&file) {
                continue;
            }

            job.file_discovered(ds_index);
            job.task_enqueued();
            let task = FileTask {
                job: Arc::clone(job),
                file,
                ds_index,
            };
            if !self.file_queue.enqueue(task) {
                job.task_dropped();
                break;
            }
            admitted += 1;
        }

        debug!(
            "job {}: '{}' walk done, {admitted} of {visited} entries admitted",
            job.id(),
            data_source.name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn dequeue_returns_tasks_in_order() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(queue.enqueue(1));
        assert!(queue.enqueue(2));
        assert_eq!(queue.dequeue(), Ok(1));
        assert_eq!(queue.dequeue(), Ok(2));
    }

    /// A blocked dequeue must wake when a task arrives.
    #[test]
    fn dequeue_blocks_until_task_arrives() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(queue.enqueue(99));
        assert_eq!(consumer.join().unwrap(), Ok(99));
    }

    /// A blocked dequeue must fail with `QueueClosed` on shutdown, not
    /// hang or return a sentinel.
    #[test]
    fn close_unblocks_pending_dequeue_with_closed_error() {
        let queue: Arc<TaskQueue<u32>> = Arc::new(TaskQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(consumer.join().unwrap(), Err(QueueClosed));
    }

    /// Tasks enqueued before close must still be dequeueable; only after
    /// the drain does dequeue report closure.
    #[test]
    fn close_drains_before_failing() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(queue.enqueue(1));
        queue.close();

        assert_eq!(queue.dequeue(), Ok(1));
        assert_eq!(queue.dequeue(), Err(QueueClosed));
        assert!(!queue.enqueue(2));
    }

    #[test]
    fn len_reflects_pending_tasks() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        assert!(queue.is_empty());
        queue.enqueue(1);
        queue.enqueue(2);
        assert_eq!(queue.len(), 2);
    }
}
