/// Command-line arguments.
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "casesift",
    version,
    about = "Run a forensic ingest pipeline over one or more folders"
)]
pub struct CliArgs {
    /// Folders to ingest, one data source each.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// File ingest worker count (1-16); overrides the preferences file.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Preferences file (JSON). Missing file means defaults.
    #[arg(long)]
    pub prefs: Option<PathBuf>,

    /// Free-space floor in bytes on the first data source's volume;
    /// dropping below it cancels the run.
    #[arg(long, default_value_t = casesift_core::monitor::DEFAULT_MIN_FREE_BYTES)]
    pub min_free_bytes: u64,

    /// How many of the largest files to report.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}
