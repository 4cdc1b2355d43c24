//! Pointer, scroll, click, navigation and highlight capture.

use crate::dom::{Document, NodeKey};
use crate::model::{Record, RecordKind, URL_SEMANTIC};

use super::Recorder;

/// Leading-and-trailing rate limiter: the first sample in a window is emitted
/// immediately, the latest sample seen during the rest of the window is
/// emitted once the window closes.
#[derive(Debug, Clone)]
pub struct Throttle<T> {
    window_ms: u64,
    last_emit: Option<u64>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_emit: None,
            pending: None,
        }
    }

    pub fn offer(&mut self, at: u64, sample: T) -> Option<T> {
        match self.last_emit {
            Some(last) if at < last.saturating_add(self.window_ms) => {
                self.pending = Some(sample);
                None
            }
            _ => {
                self.last_emit = Some(at);
                self.pending = None;
                Some(sample)
            }
        }
    }

    /// Emit the trailing sample if its window has closed.
    pub fn poll(&mut self, at: u64) -> Option<T> {
        let deadline = self.deadline()?;
        if at < deadline {
            return None;
        }
        self.last_emit = Some(at);
        self.pending.take()
    }

    pub fn deadline(&self) -> Option<u64> {
        self.pending.as_ref()?;
        Some(self.last_emit.unwrap_or(0).saturating_add(self.window_ms))
    }

    pub fn reset(&mut self) {
        self.last_emit = None;
        self.pending = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollSample {
    pub target: NodeKey,
    pub left: f64,
    pub top: f64,
}

impl Recorder {
    /// A scroll happened on `target`. The position is read now; scrolling the
    /// document node is recorded against the document element.
    pub fn scroll(&mut self, doc: &Document, target: NodeKey, at: u64) -> Vec<Vec<Record>> {
        if !self.is_accepting() {
            return Vec::new();
        }
        let target = if target == doc.root() {
            match doc.document_element() {
                Some(element) => element,
                None => return Vec::new(),
            }
        } else {
            target
        };
        let Some((left, top)) = doc.scroll_position(target) else {
            return Vec::new();
        };
        match self.scroll_throttle.offer(at, ScrollSample { target, left, top }) {
            Some(sample) => {
                self.emit_scroll(sample, at);
                self.flush(false)
            }
            None => Vec::new(),
        }
    }

    pub fn pointer_move(&mut self, left: f64, top: f64, at: u64) -> Vec<Vec<Record>> {
        if !self.is_accepting() {
            return Vec::new();
        }
        match self.pointer_throttle.offer(at, (left, top)) {
            Some((left, top)) => {
                self.push(RecordKind::PointerMove { left, top }, at, None);
                self.flush(false)
            }
            None => Vec::new(),
        }
    }

    pub fn click(&mut self, left: f64, top: f64, at: u64) -> Vec<Vec<Record>> {
        if !self.is_accepting() {
            return Vec::new();
        }
        self.push(RecordKind::Click { left, top }, at, None);
        self.flush(false)
    }

    /// Append an application-level annotation. It is not flushed on its own.
    pub fn highlight(&mut self, semantic_tag: impl Into<String>, description: impl Into<String>, at: u64) {
        if !self.is_accepting() {
            return;
        }
        self.push(
            RecordKind::Highlight {
                semantic_tag: semantic_tag.into(),
                description: description.into(),
            },
            at,
            None,
        );
    }

    /// Emit trailing throttle samples whose window has closed.
    pub fn poll_capture(&mut self, at: u64) -> Vec<Vec<Record>> {
        if !self.is_accepting() {
            return Vec::new();
        }
        let mut emitted = false;
        if let Some(sample) = self.scroll_throttle.poll(at) {
            self.emit_scroll(sample, at);
            emitted = true;
        }
        if let Some((left, top)) = self.pointer_throttle.poll(at) {
            self.push(RecordKind::PointerMove { left, top }, at, None);
            emitted = true;
        }
        if emitted {
            self.flush(false)
        } else {
            Vec::new()
        }
    }

    /// Earliest time a trailing throttle sample becomes due.
    pub fn next_capture_deadline(&self) -> Option<u64> {
        match (self.scroll_throttle.deadline(), self.pointer_throttle.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn emit_scroll(&mut self, sample: ScrollSample, at: u64) {
        let Some(target_id) = self.registry.id_of(sample.target) else {
            tracing::debug!(node = ?sample.target, "scroll target is not tracked, ignoring");
            return;
        };
        self.push(
            RecordKind::Scroll {
                target_id,
                left: sample.left,
                top: sample.top,
            },
            at,
            None,
        );
    }

    /// Record a navigation highlight when the location changed since the last check.
    pub(super) fn check_navigation(&mut self, doc: &Document, at: u64) {
        if doc.location() == self.last_location {
            return;
        }
        self.last_location = doc.location().to_string();
        self.normalizer = crate::resource::ResourceNormalizer::new(&self.last_location);
        tracing::debug!(location = %self.last_location, "navigation detected");
        self.push(
            RecordKind::Highlight {
                semantic_tag: URL_SEMANTIC.to_string(),
                description: self.last_location.clone(),
            },
            at,
            None,
        );
    }
}
