//! CaseSift — concurrent forensic ingest orchestration.
//!
//! Thin binary entry point. All logic lives in the `casesift-core`
//! and `casesift-cli` crates.

fn main() -> anyhow::Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    tracing::info!("CaseSift starting");

    casesift_cli::run()
}
