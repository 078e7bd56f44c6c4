/// User preferences persisted as JSON by the frontend.
///
/// The core reads the file-worker pool size once at manager construction;
/// out-of-range values are clamped on read rather than rejected, so a
/// hand-edited file can never wedge startup.
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_FILE_INGEST_WORKERS: usize = 1;
pub const MAX_FILE_INGEST_WORKERS: usize = 16;
pub const DEFAULT_FILE_INGEST_WORKERS: usize = 2;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PrefsError {
    #[error("failed to read preferences: {0}")]
    Io(String),
    #[error("failed to parse preferences: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    /// Number of file-tier ingest workers, clamped to
    /// `MIN_FILE_INGEST_WORKERS..=MAX_FILE_INGEST_WORKERS` on read.
    #[serde(default = "default_file_ingest_workers")]
    pub file_ingest_workers: usize,
}

fn default_file_ingest_workers() -> usize {
    DEFAULT_FILE_INGEST_WORKERS
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            file_ingest_workers: DEFAULT_FILE_INGEST_WORKERS,
        }
    }
}

impl Preferences {
    /// Load preferences from `path`. A missing file yields defaults; a
    /// malformed file is an error; values are clamped to range.
    pub fn load(path: &Path) -> Result<Self, PrefsError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| PrefsError::Io(e.to_string()))?;
        let mut prefs: Self =
            serde_json::from_str(&raw).map_err(|e| PrefsError::Parse(e.to_string()))?;
        prefs.file_ingest_workers = clamp_workers(prefs.file_ingest_workers);
        Ok(prefs)
    }

    /// Write preferences to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), PrefsError> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| PrefsError::Parse(e.to_string()))?;
        std::fs::write(path, raw).map_err(|e| PrefsError::Io(e.to_string()))
    }
}

/// Clamp a worker count into the supported range.
pub fn clamp_workers(count: usize) -> usize {
    count.clamp(MIN_FILE_INGEST_WORKERS, MAX_FILE_INGEST_WORKERS)
}
