/// Point-in-time views of job progress handed to frontends.
///
/// Snapshots are plain owned values built from the job's atomics, so a
/// frontend can poll them at any cadence without blocking ingest workers.
use chrono::{DateTime, Local};
use compact_str::CompactString;

/// Progress of one data source within one ingest job.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// Id of the owning job.
    pub job_id: u64,
    /// Display name of the data source.
    pub data_source: CompactString,
    /// Files admitted for file-level ingest so far.
    pub files_discovered: u64,
    /// Files whose file-level pipeline has completed.
    pub files_processed: u64,
    /// Whether the data-source-level task has completed.
    pub data_source_done: bool,
    /// Whether the owning job has been cancelled.
    pub cancelled: bool,
    /// Wall-clock time the job started.
    pub started_at: DateTime<Local>,
}
