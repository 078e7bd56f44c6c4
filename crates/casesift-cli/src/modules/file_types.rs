/// File-type tally module.
///
/// Categorises every ingested file by extension into broad forensic
/// buckets and accumulates per-category counts and byte totals. The
/// factory shares one tally across all of its module instances, so the
/// CLI can print a single report after the job finishes.
use casesift_core::model::CaseFile;
use casesift_core::module::{IngestModule, IngestModuleFactory, IngestServices, IngestStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

const MODULE_NAME: &str = "File Type Tally";

/// Broad file-type buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Documents,
    Images,
    Video,
    Audio,
    Archives,
    Code,
    Executables,
    Other,
}

impl FileCategory {
    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Documents => "Documents",
            Self::Images => "Images",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Archives => "Archives",
            Self::Code => "Code",
            Self::Executables => "Executables",
            Self::Other => "Other",
        }
    }
}

/// Map a lowercased extension to its category.
pub fn categorise_extension(ext: &str) -> FileCategory {
    match ext {
        "doc" | "docx" | "pdf" | "txt" | "rtf" | "odt" | "xls" | "xlsx" | "ppt" | "pptx"
        | "csv" | "md" => FileCategory::Documents,
        "jpg" | "jpeg" | "png" | "gif" | "bmp" | "svg" | "webp" | "tiff" | "heic" => {
            FileCategory::Images
        }
        "mp4" | "mkv" | "avi" | "mov" | "wmv" | "webm" | "mpg" | "mpeg" => FileCategory::Video,
        "mp3" | "wav" | "flac" | "aac" | "ogg" | "m4a" | "opus" => FileCategory::Audio,
        "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" | "zst" | "iso" => {
            FileCategory::Archives
        }
        "rs" | "py" | "js" | "ts" | "c" | "cpp" | "h" | "cs" | "java" | "go" | "rb" | "php"
        | "html" | "css" | "json" | "xml" | "yaml" | "yml" | "toml" | "sql" | "sh" | "ps1" => {
            FileCategory::Code
        }
        "exe" | "msi" | "dll" | "so" | "dylib" | "app" | "com" | "scr" => {
            FileCategory::Executables
        }
        _ => FileCategory::Other,
    }
}

/// Count and byte total for one category.
#[derive(Debug, Default, Clone, Copy)]
pub struct CategoryTally {
    pub files: u64,
    pub bytes: u64,
}

pub struct FileTypeModuleFactory {
    tallies: Arc<Mutex<HashMap<FileCategory, CategoryTally>>>,
}

impl FileTypeModuleFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tallies: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Per-category totals, largest byte share first.
    pub fn report(&self) -> Vec<(FileCategory, CategoryTally)> {
        let mut entries: Vec<(FileCategory, CategoryTally)> =
            self.tallies.lock().iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by(|a, b| b.1.bytes.cmp(&a.1.bytes));
        entries
    }
}

impl IngestModuleFactory for FileTypeModuleFactory {
    fn display_name(&self) -> &str {
        MODULE_NAME
    }

    fn create(&self) -> Box<dyn IngestModule> {
        Box::new(FileTypeModule {
            tallies: Arc::clone(&self.tallies),
        })
    }
}

struct FileTypeModule {
    tallies: Arc<Mutex<HashMap<FileCategory, CategoryTally>>>,
}

impl IngestModule for FileTypeModule {
    fn display_name(&self) -> &str {
        MODULE_NAME
    }

    fn process_file(&self, file: &CaseFile, services: &IngestServices) -> IngestStatus {
        let category = categorise_extension(file.extension().as_str());
        {
            let mut tallies = self.tallies.lock();
            let tally = tallies.entry(category).or_default();
            tally.files += 1;
            tally.bytes += file.size;
        }
        // Executables inside evidence are always worth flagging.
        if category == FileCategory::Executables {
            services.fire_data_added(MODULE_NAME, "executable file", 1);
        }
        IngestStatus::Ok
    }
}
