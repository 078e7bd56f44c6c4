/// CaseSift command-line frontend.
///
/// Parses arguments, builds the ingest manager, and runs one ingest job
/// over the given folders with the built-in demonstration modules.
pub mod args;
pub mod modules;
pub mod runner;

use clap::Parser;

/// Entry point called by the `casesift` binary.
pub fn run() -> anyhow::Result<()> {
    let args = args::CliArgs::parse();
    runner::run(&args)
}
