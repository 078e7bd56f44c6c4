/// Resource monitor — watchdog for disk pressure during ingest.
///
/// A background thread samples free space on the volume backing case data
/// and caches the latest reading so queries never block. When free space
/// drops below the configured floor, the monitor escalates once: all
/// ingest jobs are cancelled and job creation is disabled until the
/// session is reopened.
///
/// The monitor is started lazily by the orchestrator on the first job
/// start, so an idle process pays no monitoring cost.
///
/// # Cancellation
///
/// Call [`MonitorHandle::stop`]. The thread polls the flag every 200 ms
/// between samples and exits promptly.
use crate::manager::ManagerInner;
use crate::platform;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default free-space floor: 100 MB, matching the smallest volume on
/// which case output can still be flushed safely.
pub const DEFAULT_MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

/// Default sampling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Granularity of cancel-flag checks between samples.
const CANCEL_POLL: Duration = Duration::from_millis(200);

/// Where and how aggressively to watch for disk pressure.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// A path on the volume backing case data.
    pub path: PathBuf,
    /// Breach threshold in bytes.
    pub min_free_bytes: u64,
    /// Time between samples.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Handle to the running monitor thread.
pub(crate) struct MonitorHandle {
    cancel: Arc<AtomicBool>,
    free_space: Arc<AtomicI64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the monitor thread to stop. Non-blocking.
    pub(crate) fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Stop and wait for the thread to exit.
    pub(crate) fn stop_and_join(mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    /// Most recent free-space sample in bytes, −1 if unknown.
    pub(crate) fn free_space(&self) -> i64 {
        self.free_space.load(Ordering::Relaxed)
    }
}

/// Start the monitor on a background thread.
pub(crate) fn start_monitor(config: MonitorConfig, manager: Weak<ManagerInner>) -> MonitorHandle {
    let cancel = Arc::new(AtomicBool::new(false));
    let free_space = Arc::new(AtomicI64::new(-1));

    let cancel_clone = Arc::clone(&cancel);
    let free_clone = Arc::clone(&free_space);
    let thread = thread::Builder::new()
        .name("casesift-monitor".to_owned())
        .spawn(move || {
            run_monitor(config, cancel_clone, free_clone, manager);
        })
        .expect("failed to spawn monitor thread");

    MonitorHandle {
        cancel,
        free_space,
        thread: Some(thread),
    }
}

fn run_monitor(
    config: MonitorConfig,
    cancel: Arc<AtomicBool>,
    free_space: Arc<AtomicI64>,
    manager: Weak<ManagerInner>,
) {
    debug!(
        "monitor: watching {:?}, floor {} bytes",
        config.path, config.min_free_bytes
    );
    // Escalate once per excursion below the floor, not once per sample.
    let mut breached = false;

    'outer: loop {
        if cancel.load(Ordering::Relaxed) {
            break;
        }

        match platform::free_disk_space(&config.path) {
            Some(free) => {
                free_space.store(free as i64, Ordering::Relaxed);
                if free < config.min_free_bytes {
                    if !breached {
                        breached = true;
                        warn!(
                            "monitor: free space on {:?} is {free} bytes, below the \
                             {}-byte floor — cancelling all ingest jobs",
                            config.path, config.min_free_bytes
                        );
                        if let Some(inner) = manager.upgrade() {
                            inner.handle_resource_breach(free);
                        }
                    }
                } else {
                    breached = false;
                }
            }
            None => {
                free_space.store(-1, Ordering::Relaxed);
                debug!("monitor: free-space query failed for {:?}", config.path);
            }
        }

        // Sleep one poll interval in small slices so stop() takes effect
        // within ~200 ms.
        let deadline = Instant::now() + config.poll_interval;
        while Instant::now() < deadline {
            if cancel.load(Ordering::Relaxed) {
                break 'outer;
            }
            thread::sleep(CANCEL_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    debug!("monitor: stopped");
}
