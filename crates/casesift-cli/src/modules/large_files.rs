/// Largest-files module.
///
/// Keeps the top-N largest files seen across all workers in a bounded
/// min-heap, shared through the factory so the CLI reads one result set
/// after the job finishes.
use casesift_core::model::CaseFile;
use casesift_core::module::{IngestModule, IngestModuleFactory, IngestServices, IngestStatus};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;

const MODULE_NAME: &str = "Largest Files";

/// One entry in the largest-files report.
#[derive(Debug, Clone)]
pub struct LargestFile {
    pub path: PathBuf,
    pub size: u64,
}

pub struct LargeFileModuleFactory {
    top_n: usize,
    /// Min-heap of (size, path): the root is the smallest retained entry,
    /// evicted whenever a larger file arrives.
    entries: Arc<Mutex<BinaryHeap<Reverse<(u64, PathBuf)>>>>,
}

impl LargeFileModuleFactory {
    pub fn new(top_n: usize) -> Arc<Self> {
        Arc::new(Self {
            top_n,
            entries: Arc::new(Mutex::new(BinaryHeap::new())),
        })
    }

    /// The retained files, largest first.
    pub fn report(&self) -> Vec<LargestFile> {
        let mut entries: Vec<LargestFile> = self
            .entries
            .lock()
            .iter()
            .map(|Reverse((size, path))| LargestFile {
                path: path.clone(),
                size: *size,
            })
            .collect();
        entries.sort_by(|a, b| b.size.cmp(&a.size));
        entries
    }
}

impl IngestModuleFactory for LargeFileModuleFactory {
    fn display_name(&self) -> &str {
        MODULE_NAME
    }

    fn create(&self) -> Box<dyn IngestModule> {
        Box::new(LargeFileModule {
            top_n: self.top_n,
            entries: Arc::clone(&self.entries),
        })
    }
}

struct LargeFileModule {
    top_n: usize,
    entries: Arc<Mutex<BinaryHeap<Reverse<(u64, PathBuf)>>>>,
}

impl IngestModule for LargeFileModule {
    fn display_name(&self) -> &str {
        MODULE_NAME
    }

    fn process_file(&self, file: &CaseFile, _services: &IngestServices) -> IngestStatus {
        if self.top_n == 0 {
            return IngestStatus::Ok;
        }
        let mut entries = self.entries.lock();
        entries.push(Reverse((file.size, file.path.clone())));
        while entries.len() > self.top_n {
            entries.pop();
        }
        IngestStatus::Ok
    }
}
