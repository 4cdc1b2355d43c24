//! Session recorder.
//!
//! [`Recorder`] is the synchronous core: it walks the initial tree, turns
//! mutation batches and input events into records and buffers them. Times are
//! milliseconds since the session started and are supplied by the caller.
//! [`RecordingSession`] drives a recorder against a shared live document on a
//! tokio task and forwards drained chunks to a [`RecordSink`](crate::transport::RecordSink).

mod buffer;
mod capture;
mod observer;
mod session;
mod walker;

use thiserror::Error;

use crate::dom::{Document, Mutation};
use crate::model::{Record, RecordKind, RootEnvelope, RootMeta};
use crate::resource::ResourceNormalizer;
use crate::transport::TransportError;

pub use buffer::{PendingRecord, RecordBuffer, TransientSiblings};
pub use capture::{ScrollSample, Throttle};
pub use session::{RecorderCommand, RecorderHandle, RecordingSession};
pub use walker::{is_ignored, NodeRegistry, Walked};

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderOptions {
    pub scroll_throttle_ms: u64,
    pub pointer_throttle_ms: u64,
    /// Buffered records needed before a non-final flush drains.
    pub buffer_size: usize,
    /// Upper bound on records per submitted chunk.
    pub max_emit_size: usize,
    pub debug: bool,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self {
            scroll_throttle_ms: 100,
            pointer_throttle_ms: 100,
            buffer_size: 100,
            max_emit_size: 500,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Idle,
    /// Root captured, acknowledgment outstanding. Records buffer but never drain.
    AwaitingRoot,
    Ready,
    /// Root or record submission failed; nothing more is captured.
    Halted,
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("document root could not be captured")]
    RootNotCaptured,

    #[error("root snapshot rejected: {0}")]
    RootRejected(#[source] TransportError),

    #[error("record submission failed: {0}")]
    Transport(#[from] TransportError),

    #[error("recording task ended unexpectedly")]
    TaskGone,
}

pub struct Recorder {
    options: RecorderOptions,
    state: RecorderState,
    session_id: Option<String>,
    registry: NodeRegistry,
    next_record_id: u64,
    buffer: RecordBuffer,
    normalizer: ResourceNormalizer,
    last_location: String,
    scroll_throttle: Throttle<ScrollSample>,
    pointer_throttle: Throttle<(f64, f64)>,
}

impl Recorder {
    pub fn new(options: RecorderOptions) -> Self {
        Self {
            registry: NodeRegistry::new(options.debug),
            buffer: RecordBuffer::new(options.buffer_size, options.max_emit_size),
            scroll_throttle: Throttle::new(options.scroll_throttle_ms),
            pointer_throttle: Throttle::new(options.pointer_throttle_ms),
            normalizer: ResourceNormalizer::new(""),
            options,
            state: RecorderState::Idle,
            session_id: None,
            next_record_id: 0,
            last_location: String::new(),
        }
    }

    pub fn options(&self) -> &RecorderOptions {
        &self.options
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Number of records created but not yet drained.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn is_accepting(&self) -> bool {
        matches!(self.state, RecorderState::AwaitingRoot | RecorderState::Ready)
    }

    fn reset(&mut self) {
        self.registry.clear();
        self.buffer.clear();
        self.scroll_throttle.reset();
        self.pointer_throttle.reset();
        self.next_record_id = 0;
        self.session_id = None;
        self.last_location.clear();
        self.normalizer = ResourceNormalizer::new("");
    }

    /// Reset all session state and capture the whole document.
    ///
    /// The caller submits the returned envelope and reports the outcome with
    /// [`root_acknowledged`](Self::root_acknowledged) or [`halt`](Self::halt).
    pub fn start(
        &mut self,
        doc: &mut Document,
        session_id: impl Into<String>,
        base_timestamp: i64,
    ) -> Result<RootEnvelope, RecordError> {
        self.reset();
        let session_id = session_id.into();
        self.last_location = doc.location().to_string();
        self.normalizer = ResourceNormalizer::new(&self.last_location);

        let root_key = doc.root();
        let Some(Walked::New(root)) = self.registry.walk(doc, root_key, &self.normalizer) else {
            return Err(RecordError::RootNotCaptured);
        };
        tracing::info!(
            session_id = %session_id,
            nodes = root.node_count(),
            "captured root snapshot"
        );
        self.session_id = Some(session_id.clone());
        self.state = RecorderState::AwaitingRoot;
        Ok(RootEnvelope {
            session_id,
            location: self.last_location.clone(),
            meta_info: RootMeta { base_timestamp },
            root,
        })
    }

    /// The sink accepted the root. Buffered records may drain from now on.
    pub fn root_acknowledged(&mut self) -> Vec<Vec<Record>> {
        if self.state != RecorderState::AwaitingRoot {
            return Vec::new();
        }
        self.state = RecorderState::Ready;
        self.flush(false)
    }

    /// Stop capturing for good. Buffered records are discarded.
    pub fn halt(&mut self) {
        if self.state != RecorderState::Halted {
            tracing::warn!(
                session_id = self.session_id.as_deref().unwrap_or_default(),
                dropped = self.buffer.len(),
                "recording halted"
            );
        }
        self.state = RecorderState::Halted;
        self.buffer.clear();
    }

    /// Handle one delivered mutation batch.
    pub fn observe(&mut self, doc: &mut Document, batch: &[Mutation], at: u64) -> Vec<Vec<Record>> {
        if !self.is_accepting() {
            return Vec::new();
        }
        self.check_navigation(doc, at);
        for mutation in batch {
            self.handle_mutation(doc, mutation, at);
        }
        self.flush(false)
    }

    /// End the session: handle mutations still queued on the document, append
    /// the end marker and drain everything. State is reset afterwards.
    pub fn stop(&mut self, doc: &mut Document, at: u64) -> Vec<Vec<Record>> {
        let chunks = if self.is_accepting() {
            let queued = doc.disconnect();
            for mutation in &queued {
                self.handle_mutation(doc, mutation, at);
            }
            self.push(RecordKind::SessionEnd, at, None);
            if self.state == RecorderState::AwaitingRoot {
                tracing::warn!(
                    buffered = self.buffer.len(),
                    "stopped before the root was acknowledged, records are lost"
                );
            }
            self.flush(true)
        } else {
            doc.disconnect();
            Vec::new()
        };
        tracing::info!(
            session_id = self.session_id.as_deref().unwrap_or_default(),
            records = self.next_record_id,
            "recording stopped"
        );
        self.reset();
        self.state = RecorderState::Idle;
        chunks
    }

    fn push(&mut self, kind: RecordKind, at: u64, siblings: Option<TransientSiblings>) {
        let record_id = self.next_record_id;
        self.next_record_id += 1;
        if self.options.debug {
            tracing::debug!(record_id, kind = kind.name(), "new record");
        }
        self.buffer.append(Record::new(record_id, at, kind), siblings);
    }

    fn flush(&mut self, is_final: bool) -> Vec<Vec<Record>> {
        let registry = &self.registry;
        self.buffer.flush(
            is_final,
            self.state == RecorderState::Ready,
            |key| registry.id_of(key),
        )
    }
}
