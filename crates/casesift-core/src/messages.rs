/// Operator message surface.
///
/// Ingest modules and the orchestrator post human-readable messages
/// (startup failures, resource warnings) to an inbox owned by the frontend.
/// The core only defines the sink contract and enforces the error-volume
/// cap; rendering is the frontend's concern.
use chrono::{DateTime, Local};
use compact_str::CompactString;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Ceiling on error/warning posts per session. Past this, a single
/// limit-reached message is posted and further errors are dropped so a
/// misbehaving module cannot bog down the frontend.
pub const MAX_ERROR_MESSAGE_POSTS: u64 = 200;

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Info,
    Warning,
    Error,
}

/// A single message for the operator inbox.
#[derive(Debug, Clone)]
pub struct IngestMessage {
    pub kind: MessageKind,
    /// Component that produced the message, usually a module display name.
    pub source: CompactString,
    pub text: String,
    pub posted_at: DateTime<Local>,
}

impl IngestMessage {
    pub fn info(source: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Info, source, text)
    }

    pub fn warning(source: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Warning, source, text)
    }

    pub fn error(source: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::new(MessageKind::Error, source, text)
    }

    fn new(kind: MessageKind, source: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self {
            kind,
            source: CompactString::new(source.as_ref()),
            text: text.into(),
            posted_at: Local::now(),
        }
    }
}

/// Destination for operator messages. Implemented by the frontend
/// (console printer, inbox panel); registered on the manager at startup.
pub trait MessageSink: Send + Sync {
    fn post(&self, message: &IngestMessage);
}

/// Shared posting handle with the error-volume cap baked in.
///
/// Cloned into ingest services so modules can post without a reference to
/// the manager. Posting is a no-op until a sink is registered or while the
/// manager runs non-interactively.
#[derive(Clone)]
pub struct MessagePoster {
    inner: Arc<PosterInner>,
}

struct PosterInner {
    sink: RwLock<Option<Arc<dyn MessageSink>>>,
    interactive: AtomicBool,
    error_posts: AtomicU64,
}

impl MessagePoster {
    pub(crate) fn new(interactive: bool) -> Self {
        Self {
            inner: Arc::new(PosterInner {
                sink: RwLock::new(None),
                interactive: AtomicBool::new(interactive),
                error_posts: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn set_sink(&self, sink: Arc<dyn MessageSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    pub(crate) fn set_interactive(&self, interactive: bool) {
        self.inner.interactive.store(interactive, Ordering::Relaxed);
    }

    /// Reset the error-post counter, e.g. when a session opens or closes.
    pub(crate) fn clear(&self) {
        self.inner.error_posts.store(0, Ordering::Relaxed);
    }

    /// Post a message, applying the error-volume cap to warnings and errors.
    pub fn post(&self, message: IngestMessage) {
        if !self.inner.interactive.load(Ordering::Relaxed) {
            return;
        }
        let sink = self.inner.sink.read().clone();
        let Some(sink) = sink else { return };

        match message.kind {
            MessageKind::Info => sink.post(&message),
            MessageKind::Warning | MessageKind::Error => {
                let posts = self.inner.error_posts.fetch_add(1, Ordering::Relaxed) + 1;
                if posts <= MAX_ERROR_MESSAGE_POSTS {
                    sink.post(&message);
                } else if posts == MAX_ERROR_MESSAGE_POSTS + 1 {
                    sink.post(&IngestMessage::error(
                        "Ingest",
                        format!(
                            "Error message limit of {MAX_ERROR_MESSAGE_POSTS} reached; \
                             further error messages will not be displayed"
                        ),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<IngestMessage>>,
    }

    impl MessageSink for RecordingSink {
        fn post(&self, message: &IngestMessage) {
            self.messages.lock().push(message.clone());
        }
    }

    #[test]
    fn posting_without_sink_is_a_noop() {
        let poster = MessagePoster::new(true);
        poster.post(IngestMessage::info("test", "hello"));
    }

    #[test]
    fn non_interactive_poster_drops_messages() {
        let poster = MessagePoster::new(false);
        let sink = Arc::new(RecordingSink::default());
        poster.set_sink(sink.clone());
        poster.post(IngestMessage::info("test", "hello"));
        assert!(sink.messages.lock().is_empty());
    }

    #[test]
    fn error_posts_are_capped_with_single_limit_message() {
        let poster = MessagePoster::new(true);
        let sink = Arc::new(RecordingSink::default());
        poster.set_sink(sink.clone());

        for i in 0..MAX_ERROR_MESSAGE_POSTS + 50 {
            poster.post(IngestMessage::error("module", format!("error {i}")));
        }

        // Cap's worth of errors plus exactly one limit-reached message.
        let posted = sink.messages.lock();
        assert_eq!(posted.len() as u64, MAX_ERROR_MESSAGE_POSTS + 1);
        assert!(posted.last().unwrap().text.contains("limit"));
    }

    #[test]
    fn info_messages_are_not_capped() {
        let poster = MessagePoster::new(true);
        let sink = Arc::new(RecordingSink::default());
        poster.set_sink(sink.clone());

        for _ in 0..MAX_ERROR_MESSAGE_POSTS {
            poster.post(IngestMessage::error("module", "err"));
        }
        poster.post(IngestMessage::info("module", "still visible"));

        let posted = sink.messages.lock();
        assert_eq!(posted.last().unwrap().kind, MessageKind::Info);
    }

    #[test]
    fn clear_resets_the_cap() {
        let poster = MessagePoster::new(true);
        let sink = Arc::new(RecordingSink::default());
        poster.set_sink(sink.clone());

        for _ in 0..MAX_ERROR_MESSAGE_POSTS + 10 {
            poster.post(IngestMessage::error("module", "err"));
        }
        poster.clear();
        poster.post(IngestMessage::error("module", "after clear"));

        assert!(sink
            .messages
            .lock()
            .iter()
            .any(|m| m.text == "after clear"));
    }
}
