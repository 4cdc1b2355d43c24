use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::model::{Record, RootEnvelope, SessionResult};

use super::{assemble, RecordSink, SessionSource, TransportError};

#[derive(Debug, Clone)]
struct StoredSession {
    root: RootEnvelope,
    chunks: Vec<Vec<Record>>,
    stopped: bool,
}

/// In-process sink and source.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<String, StoredSession>>,
    reject_root: bool,
    reject_records: bool,
    record_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses every root submission.
    pub fn rejecting_root() -> Self {
        Self {
            reject_root: true,
            ..Self::default()
        }
    }

    /// A store that accepts roots but refuses every record chunk.
    pub fn rejecting_records() -> Self {
        Self {
            reject_records: true,
            ..Self::default()
        }
    }

    /// How many times `submit_records` was called, rejected calls included.
    pub fn record_submissions(&self) -> usize {
        self.record_calls.load(Ordering::SeqCst)
    }

    pub fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn root(&self, session_id: &str) -> Option<RootEnvelope> {
        self.sessions.lock().get(session_id).map(|s| s.root.clone())
    }

    /// Chunks exactly as they were submitted.
    pub fn chunks(&self, session_id: &str) -> Vec<Vec<Record>> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.chunks.clone())
            .unwrap_or_default()
    }

    pub fn is_stopped(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| s.stopped)
    }

    /// Seed a complete session, e.g. one loaded from a file.
    pub fn insert(&self, session: SessionResult) {
        let SessionResult {
            session_id,
            location,
            meta_info,
            root,
            record_items,
            ..
        } = session;
        let envelope = RootEnvelope {
            session_id: session_id.clone(),
            location,
            meta_info,
            root,
        };
        self.sessions.lock().insert(
            session_id,
            StoredSession {
                root: envelope,
                chunks: vec![record_items],
                stopped: true,
            },
        );
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn submit_root(&self, root: &RootEnvelope) -> Result<(), TransportError> {
        if self.reject_root {
            return Err(TransportError::Rejected("root submissions are disabled".into()));
        }
        self.sessions.lock().insert(
            root.session_id.clone(),
            StoredSession {
                root: root.clone(),
                chunks: Vec::new(),
                stopped: false,
            },
        );
        Ok(())
    }

    async fn submit_records(&self, session_id: &str, records: Vec<Record>) -> Result<(), TransportError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_records {
            return Err(TransportError::Rejected("record submissions are disabled".into()));
        }
        if records.is_empty() {
            return Ok(());
        }
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| TransportError::NotFound(format!("session {session_id}")))?;
        session.chunks.push(records);
        Ok(())
    }

    fn notify_stopped(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().get_mut(session_id) {
            session.stopped = true;
        }
    }
}

#[async_trait]
impl SessionSource for MemoryStore {
    async fn fetch_session(&self, session_id: &str, lenient: bool) -> Result<SessionResult, TransportError> {
        let stored = self
            .sessions
            .lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(format!("session {session_id}")))?;
        assemble(stored.root, stored.chunks, lenient)
    }
}
