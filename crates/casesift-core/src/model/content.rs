/// Content units flowing through an ingest job.
///
/// A `DataSource` is the root of analysis — a folder of files, a disk
/// image, or an attached drive. A `CaseFile` is one file discovered inside
/// a data source. Both are shared between the scheduler, the worker pools,
/// and event payloads as `Arc`s, so they are immutable after construction.
use compact_str::CompactString;
use std::path::{Path, PathBuf};

/// The kind of evidence a data source represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSourceKind {
    /// A folder of loose files.
    Folder,
    /// A forensic disk image file.
    Image,
    /// A locally attached drive.
    Drive,
}

impl DataSourceKind {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Folder => "Folder",
            Self::Image => "Image",
            Self::Drive => "Drive",
        }
    }
}

/// A data source under analysis.
#[derive(Debug, Clone)]
pub struct DataSource {
    /// Display name shown in snapshots and logs.
    pub name: CompactString,
    /// Root path of the source on the local filesystem.
    pub root: PathBuf,
    /// What kind of evidence this is.
    pub kind: DataSourceKind,
}

impl DataSource {
    /// Create a folder data source, deriving the display name from the
    /// last path component (or the whole path for roots like `/`).
    pub fn folder(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let name = root
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_else(|| CompactString::new(root.to_string_lossy()));
        Self {
            name,
            root,
            kind: DataSourceKind::Folder,
        }
    }

    /// Create a data source with an explicit display name and kind.
    pub fn new(name: impl AsRef<str>, root: impl Into<PathBuf>, kind: DataSourceKind) -> Self {
        Self {
            name: CompactString::new(name.as_ref()),
            root: root.into(),
            kind,
        }
    }
}

/// A single file discovered inside a data source.
#[derive(Debug, Clone)]
pub struct CaseFile {
    /// Display name of the owning data source.
    pub data_source: CompactString,
    /// Full path of the file.
    pub path: PathBuf,
    /// File name only.
    pub name: CompactString,
    /// Logical size in bytes.
    pub size: u64,
}

impl CaseFile {
    pub fn new(data_source: CompactString, path: PathBuf, size: u64) -> Self {
        let name = path
            .file_name()
            .map(|n| CompactString::new(n.to_string_lossy()))
            .unwrap_or_default();
        Self {
            data_source,
            path,
            name,
            size,
        }
    }

    /// Lowercased file extension, empty when there is none.
    pub fn extension(&self) -> CompactString {
        Path::new(self.name.as_str())
            .extension()
            .map(|e| CompactString::new(e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_source_derives_name_from_last_component() {
        let ds = DataSource::folder("/evidence/laptop-01");
        assert_eq!(ds.name, "laptop-01");
        assert_eq!(ds.kind, DataSourceKind::Folder);
    }

    #[test]
    fn case_file_extension_is_lowercased() {
        let f = CaseFile::new(
            CompactString::new("ds"),
            PathBuf::from("/evidence/IMG_0001.JPG"),
            1024,
        );
        assert_eq!(f.name, "IMG_0001.JPG");
        assert_eq!(f.extension(), "jpg");
    }

    #[test]
    fn case_file_without_extension() {
        let f = CaseFile::new(CompactString::new("ds"), PathBuf::from("/evidence/README"), 0);
        assert_eq!(f.extension(), "");
    }
}
