/// Per-job configuration: the ordered module pipeline and the file filter
/// that gates admission of file-level tasks.
use crate::model::CaseFile;
use crate::module::IngestModuleFactory;
use compact_str::CompactString;
use std::collections::HashSet;
use std::sync::Arc;

/// Admission filter applied to every discovered file before a file-level
/// task is created for it. Files rejected here never reach the task queue.
///
/// The default filter admits everything. Known-file and excluded-name
/// skipping is expressed by populating the exclusion sets.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Exact file names to skip (case-sensitive).
    pub excluded_names: HashSet<CompactString>,
    /// Lowercased extensions to skip.
    pub excluded_extensions: HashSet<CompactString>,
    /// Skip files larger than this many bytes, when set.
    pub max_size: Option<u64>,
}

impl FileFilter {
    /// True if `file` should be scheduled for file-level ingest.
    pub fn admits(&self, file: &CaseFile) -> bool {
        if self.excluded_names.contains(&file.name) {
            return false;
        }
        if !self.excluded_extensions.is_empty()
            && self.excluded_extensions.contains(&file.extension())
        {
            return false;
        }
        if let Some(max) = self.max_size {
            if file.size > max {
                return false;
            }
        }
        true
    }
}

/// Settings for one ingest job: which modules run, in what order, and
/// which files are admitted.
#[derive(Clone, Default)]
pub struct JobSettings {
    /// Ordered module factories; one module instance per data source
    /// pipeline is created from each factory at job start.
    pub module_factories: Vec<Arc<dyn IngestModuleFactory>>,
    /// File admission filter.
    pub filter: FileFilter,
}

impl JobSettings {
    pub fn new(module_factories: Vec<Arc<dyn IngestModuleFactory>>) -> Self {
        Self {
            module_factories,
            filter: FileFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl std::fmt::Debug for JobSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSettings")
            .field(
                "modules",
                &self
                    .module_factories
                    .iter()
                    .map(|m| m.display_name().to_owned())
                    .collect::<Vec<_>>(),
            )
            .field("filter", &self.filter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str, size: u64) -> CaseFile {
        CaseFile::new(
            CompactString::new("ds"),
            PathBuf::from(format!("/e/{name}")),
            size,
        )
    }

    #[test]
    fn default_filter_admits_everything() {
        let filter = FileFilter::default();
        assert!(filter.admits(&file("anything.bin", 0)));
        assert!(filter.admits(&file("huge.img", u64::MAX)));
    }

    #[test]
    fn excluded_name_is_rejected() {
        let mut filter = FileFilter::default();
        filter.excluded_names.insert(CompactString::new("pagefile.sys"));
        assert!(!filter.admits(&file("pagefile.sys", 100)));
        assert!(filter.admits(&file("hiberfil.sys", 100)));
    }

    #[test]
    fn excluded_extension_matches_case_insensitively() {
        let mut filter = FileFilter::default();
        filter.excluded_extensions.insert(CompactString::new("tmp"));
        assert!(!filter.admits(&file("scratch.TMP", 1)));
        assert!(filter.admits(&file("scratch.txt", 1)));
    }

    #[test]
    fn max_size_bound_is_inclusive() {
        let filter = FileFilter {
            max_size: Some(1_000),
            ..FileFilter::default()
        };
        assert!(filter.admits(&file("small.bin", 1_000)));
        assert!(!filter.admits(&file("big.bin", 1_001)));
    }
}
