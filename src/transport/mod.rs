//! Collaborators that persist and serve recorded sessions.
//!
//! The recorder talks to a [`RecordSink`], the player to a [`SessionSource`].
//! Three implementations are provided: an in-process [`MemoryStore`], a
//! filesystem [`ChunkStore`] and an [`HttpTransport`] speaking to the chunk
//! [`server`].

mod chunks;
mod http;
mod memory;
pub mod server;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Record, RootEnvelope, SessionResult};

pub use chunks::ChunkStore;
pub use http::HttpTransport;
pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("lost {lost} records after record {after}")]
    Gap { after: u64, lost: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Where a recorder sends its output.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store the root snapshot. Recording halts if this fails.
    async fn submit_root(&self, root: &RootEnvelope) -> Result<(), TransportError>;

    /// Store one chunk of consecutive records. Called in record order.
    async fn submit_records(&self, session_id: &str, records: Vec<Record>) -> Result<(), TransportError>;

    /// The recording ended; no more chunks follow.
    fn notify_stopped(&self, session_id: &str);
}

/// Where a player fetches sessions from.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Fetch a complete session. With `lenient`, the record list is cut at the
    /// first id gap instead of failing.
    async fn fetch_session(&self, session_id: &str, lenient: bool) -> Result<SessionResult, TransportError>;
}

/// Response envelope of the chunk server protocol. `code` is 0 on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: Option<T>, msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            code: -1,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Body of `POST /ubm/records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsUpload {
    pub session_id: String,
    pub records: Vec<Record>,
}

/// Join stored chunks into one session.
///
/// Chunks are ordered by their first record id and must chain by exactly +1,
/// inside and across chunks. A gap fails with [`TransportError::Gap`] unless
/// `lenient`, in which case everything from the gap on is dropped and the
/// count reported in `lost_records`.
pub fn assemble(
    root: RootEnvelope,
    mut chunks: Vec<Vec<Record>>,
    lenient: bool,
) -> Result<SessionResult, TransportError> {
    chunks.retain(|chunk| !chunk.is_empty());
    chunks.sort_by_key(|chunk| chunk[0].record_id);
    let last_id = chunks
        .iter()
        .filter_map(|chunk| chunk.last())
        .map(|record| record.record_id)
        .max()
        .unwrap_or(0);

    let mut records: Vec<Record> = Vec::with_capacity(chunks.iter().map(Vec::len).sum());
    let mut lost_records = 0;
    'chunks: for chunk in chunks {
        for record in chunk {
            if let Some(previous) = records.last().map(|r| r.record_id) {
                if record.record_id != previous + 1 {
                    let lost = last_id.saturating_sub(previous);
                    if !lenient {
                        return Err(TransportError::Gap {
                            after: previous,
                            lost,
                        });
                    }
                    tracing::warn!(
                        session_id = %root.session_id,
                        after = previous,
                        lost,
                        "record gap, truncating session"
                    );
                    lost_records = lost;
                    break 'chunks;
                }
            }
            records.push(record);
        }
    }

    let mut result = SessionResult::from_root(root, records);
    result.lost_records = lost_records;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecordKind, RootMeta, SnapshotNode};

    fn root() -> RootEnvelope {
        RootEnvelope {
            session_id: "s1".into(),
            location: "https://example.com/".into(),
            meta_info: RootMeta { base_timestamp: 1 },
            root: SnapshotNode::document(1),
        }
    }

    fn chunk(ids: std::ops::Range<u64>) -> Vec<Record> {
        ids.map(|id| Record::new(id, id, RecordKind::Click { left: 0.0, top: 0.0 }))
            .collect()
    }

    #[test]
    fn orders_chunks_numerically() {
        let result = assemble(root(), vec![chunk(10..12), chunk(2..10), chunk(0..2)], false).unwrap();
        let ids: Vec<u64> = result.record_items.iter().map(|r| r.record_id).collect();
        assert_eq!(ids, (0..12).collect::<Vec<_>>());
        assert_eq!(result.lost_records, 0);
    }

    #[test]
    fn strict_mode_rejects_gaps() {
        let err = assemble(root(), vec![chunk(0..3), chunk(5..9)], false).unwrap_err();
        assert!(matches!(err, TransportError::Gap { after: 2, lost: 6 }));
        assert_eq!(err.to_string(), "lost 6 records after record 2");
    }

    #[test]
    fn lenient_mode_truncates_at_first_gap() {
        let result = assemble(root(), vec![chunk(0..3), chunk(5..9), chunk(9..10)], true).unwrap();
        assert_eq!(result.record_items.len(), 3);
        assert_eq!(result.lost_records, 7);
    }

    #[test]
    fn response_envelope_shape() {
        let ok: ApiResponse<u8> = ApiResponse::ok(None, "");
        assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!({"code": 0, "msg": ""}));
        let parsed: ApiResponse<u8> = serde_json::from_str(r#"{"code":-1,"msg":"nope"}"#).unwrap();
        assert_eq!(parsed.code, -1);
        assert!(parsed.data.is_none());
    }
}
