/// Data model for CaseSift ingest jobs.
///
/// Re-exports the content units (data sources, case files), job settings,
/// and the snapshot types read by frontends.
pub mod content;
pub mod settings;
pub mod snapshot;

pub use content::{CaseFile, DataSource, DataSourceKind};
pub use settings::{FileFilter, JobSettings};
pub use snapshot::JobSnapshot;
