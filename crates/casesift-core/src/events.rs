/// Typed event bus for job and module lifecycle events.
///
/// Each `EventPublisher` owns a dedicated dispatch thread fed by an
/// unbounded channel, so firing an event never blocks the worker that
/// produced it. Listeners on one publisher observe events in enqueue
/// order; the job-event and module-event publishers are independent and
/// share no ordering.
///
/// A listener that panics is caught and logged, the operator is alerted
/// once, and dispatch continues — one bad listener cannot stall the bus
/// or starve the listeners after it.
use crate::messages::{IngestMessage, MessagePoster};
use crate::model::CaseFile;
use compact_str::CompactString;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// Ingest job lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A job's module pipelines all started successfully.
    Started { job_id: u64 },
    /// A job ran to completion.
    Completed { job_id: u64 },
    /// A job was cancelled before completion.
    Cancelled { job_id: u64 },
}

impl JobEvent {
    pub fn job_id(&self) -> u64 {
        match *self {
            Self::Started { job_id } | Self::Completed { job_id } | Self::Cancelled { job_id } => {
                job_id
            }
        }
    }
}

/// Events fired by ingest modules (or on their behalf) during processing.
#[derive(Debug, Clone)]
pub enum ModuleEvent {
    /// A module added analysis results for a kind of artifact.
    DataAdded {
        module: CompactString,
        artifact_kind: CompactString,
        count: usize,
    },
    /// A module added or altered content, e.g. extracted a file from an
    /// archive.
    ContentChanged {
        module: CompactString,
        path: PathBuf,
    },
    /// The file-level pipeline finished processing a file.
    FileDone { file: Arc<CaseFile> },
}

/// Opaque handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Lightweight producer handle cloned into ingest services so modules can
/// fire events without a reference to the publisher itself.
#[derive(Clone)]
pub struct EventSender<E> {
    tx: Sender<E>,
}

impl<E> EventSender<E> {
    /// Enqueue an event for dispatch. Never blocks; silently drops the
    /// event if the publisher has shut down.
    pub fn send(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// A sender wired to nothing; every send is discarded.
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = unbounded();
        Self { tx }
    }
}

/// Asynchronous, ordered-per-listener event publisher.
pub struct EventPublisher<E: Send + 'static> {
    tx: Sender<E>,
    /// Dropping this signals the dispatch thread to drain and exit.
    stop_tx: Mutex<Option<Sender<()>>>,
    listeners: Arc<Mutex<Vec<(ListenerId, Listener<E>)>>>,
    next_id: AtomicU64,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<E: Send + 'static> EventPublisher<E> {
    /// Create a publisher and spawn its dispatch thread. `name` is used
    /// for the thread name and log lines; `alert` receives the one-time
    /// operator notification when a listener panics.
    pub(crate) fn new(name: &str, alert: MessagePoster) -> Self {
        let (tx, rx) = unbounded::<E>();
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let listeners: Arc<Mutex<Vec<(ListenerId, Listener<E>)>>> =
            Arc::new(Mutex::new(Vec::new()));

        let thread_listeners = Arc::clone(&listeners);
        let publisher_name = name.to_owned();
        let dispatcher = thread::Builder::new()
            .name(format!("casesift-{name}-events"))
            .spawn(move || {
                run_dispatch(&publisher_name, rx, stop_rx, thread_listeners, alert);
            })
            .expect("failed to spawn event dispatch thread");

        Self {
            tx,
            stop_tx: Mutex::new(Some(stop_tx)),
            listeners,
            next_id: AtomicU64::new(0),
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Register a listener; events enqueued after registration are
    /// delivered to it in order.
    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if the id was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    /// Enqueue an event for asynchronous dispatch. Never blocks.
    pub fn publish(&self, event: E) {
        let _ = self.tx.send(event);
    }

    /// Cloneable producer handle for ingest services.
    pub(crate) fn sender(&self) -> EventSender<E> {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    /// Signal the dispatch thread to deliver all pending events and exit,
    /// then join it. Idempotent.
    pub(crate) fn shutdown(&self) {
        drop(self.stop_tx.lock().take());
        if let Some(handle) = self.dispatcher.lock().take() {
            let _ = handle.join();
        }
    }
}

impl<E: Send + 'static> Drop for EventPublisher<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Dispatch loop: deliver events as they arrive until either the event
/// channel disconnects or the stop signal fires, in which case pending
/// events are drained first so nothing published before shutdown is lost.
fn run_dispatch<E: Send + 'static>(
    name: &str,
    rx: Receiver<E>,
    stop_rx: Receiver<()>,
    listeners: Arc<Mutex<Vec<(ListenerId, Listener<E>)>>>,
    alert: MessagePoster,
) {
    let alerted = AtomicBool::new(false);

    let deliver = |event: &E| {
        // Snapshot the listener list so a listener can (un)subscribe from
        // inside its own callback without deadlocking the dispatcher.
        let current: Vec<(ListenerId, Listener<E>)> = listeners.lock().clone();
        for (id, listener) in current {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("{name} event listener {id:?} panicked; continuing dispatch");
                if !alerted.swap(true, Ordering::Relaxed) {
                    alert.post(IngestMessage::error(
                        "Ingest",
                        format!("A {name} event listener failed; see the log for details"),
                    ));
                }
            }
        }
    };

    loop {
        crossbeam_channel::select! {
            recv(rx) -> event => match event {
                Ok(event) => deliver(&event),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => {
                for event in rx.try_iter() {
                    deliver(&event);
                }
                break;
            }
        }
    }
    debug!("{name} event dispatcher stopped");
}
