/// Built-in demonstration ingest modules.
///
/// These are ordinary `IngestModuleFactory` implementations, exactly like
/// the ones a third party would plug into the engine; the CLI wires them
/// into every job it runs.
pub mod file_types;
pub mod large_files;

pub use file_types::{categorise_extension, FileCategory, FileTypeModuleFactory};
pub use large_files::{LargeFileModuleFactory, LargestFile};
