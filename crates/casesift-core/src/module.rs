/// Ingest module contract — the seam between the orchestration core and
/// pluggable analysis code.
///
/// Modules are opaque collaborators: the core never inspects what they do
/// with a data source or file, it only routes units of work through them
/// and honors the startup-error contract. Modules must be `Send + Sync`;
/// any mutable state they keep is their own concern (interior mutability),
/// since file-level calls arrive concurrently from multiple workers.
use crate::events::{EventSender, ModuleEvent};
use crate::messages::{IngestMessage, MessagePoster};
use crate::model::{CaseFile, DataSource};
use compact_str::CompactString;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Outcome of one module processing one unit of work. An `Error` is a
/// module-internal failure; it is logged but does not stop the pipeline,
/// the job, or the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStatus {
    Ok,
    Error,
}

/// An error produced by a module, typically during startup.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ModuleError {
    pub message: String,
}

impl ModuleError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A startup error attributed to the module that produced it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{module}: {error}")]
pub struct ModuleStartError {
    pub module: String,
    #[source]
    pub error: ModuleError,
}

/// Facilities handed to modules during processing: event firing, message
/// posting, and the owning job's cancellation flag. Cheap to clone.
#[derive(Clone)]
pub struct IngestServices {
    job_id: u64,
    cancelled: Arc<AtomicBool>,
    module_events: EventSender<ModuleEvent>,
    messages: MessagePoster,
}

impl IngestServices {
    pub(crate) fn new(
        job_id: u64,
        cancelled: Arc<AtomicBool>,
        module_events: EventSender<ModuleEvent>,
        messages: MessagePoster,
    ) -> Self {
        Self {
            job_id,
            cancelled,
            module_events,
            messages,
        }
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }

    /// True once the owning job has been cancelled. Long-running module
    /// work should poll this and return early.
    pub fn is_job_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Announce that the module added analysis results.
    pub fn fire_data_added(&self, module: &str, artifact_kind: &str, count: usize) {
        self.module_events.send(ModuleEvent::DataAdded {
            module: CompactString::new(module),
            artifact_kind: CompactString::new(artifact_kind),
            count,
        });
    }

    /// Announce that the module added or altered content on disk.
    pub fn fire_content_changed(&self, module: &str, path: &Path) {
        self.module_events.send(ModuleEvent::ContentChanged {
            module: CompactString::new(module),
            path: path.to_path_buf(),
        });
    }

    /// Post a message to the operator inbox (error volume is capped).
    pub fn post_message(&self, message: IngestMessage) {
        self.messages.post(message);
    }

    /// Services wired to nothing: events and messages are discarded and
    /// the job never reports cancelled. For module unit tests.
    pub fn detached() -> Self {
        Self::new(
            0,
            Arc::new(AtomicBool::new(false)),
            EventSender::detached(),
            MessagePoster::new(false),
        )
    }
}

/// Context given to a module at startup.
pub struct ModuleContext {
    pub job_id: u64,
    pub data_source: Arc<DataSource>,
    pub interactive: bool,
    pub services: IngestServices,
}

/// One pluggable analysis unit.
///
/// Default implementations make every entry point optional, so a module
/// that only cares about files implements `process_file` alone.
pub trait IngestModule: Send + Sync {
    /// Name shown in progress snapshots, run-time ledgers, and messages.
    fn display_name(&self) -> &str;

    /// Called once per pipeline before any processing. A returned error
    /// aborts the whole job's startup.
    fn start_up(&self, _context: &ModuleContext) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Process a whole data source (data-source-level tier).
    fn process_data_source(
        &self,
        _data_source: &DataSource,
        _services: &IngestServices,
    ) -> IngestStatus {
        IngestStatus::Ok
    }

    /// Process one file (file-level tier). Called concurrently from
    /// multiple file workers.
    fn process_file(&self, _file: &CaseFile, _services: &IngestServices) -> IngestStatus {
        IngestStatus::Ok
    }

    /// Called once when the pipeline shuts down (job completion,
    /// cancellation, or startup failure of a sibling module).
    fn shut_down(&self) {}
}

/// Creates module instances. A job instantiates one module per factory
/// for each of its data-source pipelines.
pub trait IngestModuleFactory: Send + Sync {
    fn display_name(&self) -> &str;
    fn create(&self) -> Box<dyn IngestModule>;
}

/// An ordered chain of started modules bound to one data source.
pub struct ModulePipeline {
    modules: Vec<Box<dyn IngestModule>>,
}

impl ModulePipeline {
    /// Instantiate and start a module per factory, in order. Every factory
    /// is attempted so the caller sees the full error list; on any failure
    /// the modules that did start are shut down best-effort and no
    /// pipeline is returned.
    pub(crate) fn build(
        factories: &[Arc<dyn IngestModuleFactory>],
        context: &ModuleContext,
    ) -> Result<Self, Vec<ModuleStartError>> {
        let mut modules: Vec<Box<dyn IngestModule>> = Vec::with_capacity(factories.len());
        let mut errors = Vec::new();

        for factory in factories {
            let module = factory.create();
            match module.start_up(context) {
                Ok(()) => modules.push(module),
                Err(error) => errors.push(ModuleStartError {
                    module: module.display_name().to_owned(),
                    error,
                }),
            }
        }

        if errors.is_empty() {
            Ok(Self { modules })
        } else {
            for module in &modules {
                module.shut_down();
            }
            Err(errors)
        }
    }

    pub fn modules(&self) -> &[Box<dyn IngestModule>] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub(crate) fn shut_down(&self) {
        for module in &self.modules {
            module.shut_down();
        }
    }
}
