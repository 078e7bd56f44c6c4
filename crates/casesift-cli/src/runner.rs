/// Wires the ingest engine to the command line: builds a manager from the
/// arguments and preferences, runs one job over the given folders with
/// the built-in modules, waits for the terminal event, and renders the
/// summary.
use crate::args::CliArgs;
use crate::modules::{FileTypeModuleFactory, LargeFileModuleFactory};
use casesift_core::events::{JobEvent, ModuleEvent};
use casesift_core::messages::{IngestMessage, MessageKind, MessageSink};
use casesift_core::model::{DataSource, JobSettings};
use casesift_core::module::IngestModuleFactory;
use casesift_core::monitor::{MonitorConfig, DEFAULT_POLL_INTERVAL};
use casesift_core::prefs::Preferences;
use casesift_core::{IngestConfig, IngestManager};

use crate::modules::file_types::{CategoryTally, FileCategory};
use crate::modules::LargestFile;
use anyhow::Context;
use chrono::{DateTime, Local};
use crossbeam_channel::unbounded;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Everything the run produced, separated from printing so tests can
/// inspect it.
pub struct RunSummary {
    pub cancelled: bool,
    pub started_at: DateTime<Local>,
    pub files_done: u64,
    pub run_times: HashMap<String, u64>,
    pub categories: Vec<(FileCategory, CategoryTally)>,
    pub largest: Vec<LargestFile>,
}

/// Message sink that forwards operator messages to the log.
struct ConsoleSink;

impl MessageSink for ConsoleSink {
    fn post(&self, message: &IngestMessage) {
        match message.kind {
            MessageKind::Info => tracing::info!("[{}] {}", message.source, message.text),
            MessageKind::Warning => tracing::warn!("[{}] {}", message.source, message.text),
            MessageKind::Error => tracing::error!("[{}] {}", message.source, message.text),
        }
    }
}

/// Run one ingest job over the argument paths and return its summary.
pub fn execute(args: &CliArgs) -> anyhow::Result<RunSummary> {
    let prefs = match &args.prefs {
        Some(path) => Preferences::load(path).context("loading preferences")?,
        None => Preferences::default(),
    };
    let workers = args.workers.unwrap_or(prefs.file_ingest_workers);
    let monitor_path = args
        .paths
        .first()
        .cloned()
        .unwrap_or_else(|| PathBuf::from("."));

    let manager = IngestManager::new(IngestConfig {
        file_ingest_workers: workers,
        interactive: true,
        monitor: MonitorConfig {
            path: monitor_path,
            min_free_bytes: args.min_free_bytes,
            poll_interval: DEFAULT_POLL_INTERVAL,
        },
    });
    manager.set_message_sink(Arc::new(ConsoleSink));
    manager.open_session();

    let type_tally = FileTypeModuleFactory::new();
    let large_files = LargeFileModuleFactory::new(args.top);
    let settings = JobSettings::new(vec![
        Arc::clone(&type_tally) as Arc<dyn IngestModuleFactory>,
        Arc::clone(&large_files) as Arc<dyn IngestModuleFactory>,
    ]);

    let (event_tx, event_rx) = unbounded::<JobEvent>();
    manager.add_job_event_listener(move |event| {
        let _ = event_tx.send(event.clone());
    });
    let files_done = Arc::new(AtomicU64::new(0));
    let files_done_listener = Arc::clone(&files_done);
    manager.add_module_event_listener(move |event| {
        if matches!(event, ModuleEvent::FileDone { .. }) {
            files_done_listener.fetch_add(1, Ordering::Relaxed);
        }
    });

    let sources: Vec<DataSource> = args.paths.iter().map(|p| DataSource::folder(p)).collect();
    let job = manager
        .start_job(sources, settings)
        .context("ingest job failed to start; see the log for module errors")?;
    tracing::info!(
        "ingest job {} running with {} file workers",
        job.id(),
        manager.file_worker_count()
    );

    let outcome = loop {
        match event_rx.recv() {
            Ok(event @ (JobEvent::Completed { .. } | JobEvent::Cancelled { .. })) => break event,
            Ok(_) => {}
            Err(_) => anyhow::bail!("event channel closed before the job finished"),
        }
    };

    let run_times = manager.module_run_times();
    manager.shutdown();

    Ok(RunSummary {
        cancelled: matches!(outcome, JobEvent::Cancelled { .. }),
        started_at: job.started_at(),
        files_done: files_done.load(Ordering::Relaxed),
        run_times,
        categories: type_tally.report(),
        largest: large_files.report(),
    })
}

/// Run and print.
pub fn run(args: &CliArgs) -> anyhow::Result<()> {
    let summary = execute(args)?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.cancelled {
        println!("Ingest CANCELLED (partial results below)");
    } else {
        println!("Ingest complete");
    }
    println!(
        "  started {}  |  {} files processed",
        summary.started_at.format("%Y-%m-%d %H:%M:%S"),
        summary.files_done
    );

    if !summary.categories.is_empty() {
        println!("\nFile types:");
        for (category, tally) in &summary.categories {
            println!(
                "  {:<12} {:>8} files  {:>12}",
                category.label(),
                tally.files,
                format_bytes(tally.bytes)
            );
        }
    }

    if !summary.largest.is_empty() {
        println!("\nLargest files:");
        for entry in &summary.largest {
            println!("  {:>12}  {}", format_bytes(entry.size), entry.path.display());
        }
    }

    if !summary.run_times.is_empty() {
        println!("\nModule run times:");
        let mut times: Vec<(&String, &u64)> = summary.run_times.iter().collect();
        times.sort_by(|a, b| b.1.cmp(a.1));
        for (module, millis) in times {
            println!("  {module:<20} {millis} ms");
        }
    }
}

/// Human-readable byte count.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[0])
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
