use serde::{Deserialize, Serialize};

use super::{Record, RecordKind, SnapshotNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootMeta {
    /// Wall-clock start of the session in Unix milliseconds. Record
    /// timestamps are relative to it.
    pub base_timestamp: i64,
}

/// The root snapshot submitted once at the start of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootEnvelope {
    pub session_id: String,
    pub location: String,
    pub meta_info: RootMeta,
    pub root: SnapshotNode,
}

/// A complete fetched session, immutable once handed to the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: String,
    pub location: String,
    pub meta_info: RootMeta,
    pub root: SnapshotNode,
    pub record_items: Vec<Record>,
    /// Records dropped by lenient assembly.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub lost_records: u64,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

/// A highlight annotation and the position in the record list it sits at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightEntry {
    pub index: usize,
    pub record_id: u64,
    pub timestamp: u64,
    pub semantic_tag: String,
    pub description: String,
}

impl SessionResult {
    pub fn from_root(root: RootEnvelope, record_items: Vec<Record>) -> Self {
        Self {
            session_id: root.session_id,
            location: root.location,
            meta_info: root.meta_info,
            root: root.root,
            record_items,
            lost_records: 0,
        }
    }

    /// A session is fully recorded when its last record is the end marker.
    pub fn is_fully_recorded(&self) -> bool {
        matches!(
            self.record_items.last().map(|r| &r.kind),
            Some(RecordKind::SessionEnd)
        )
    }

    pub fn highlights(&self) -> Vec<HighlightEntry> {
        self.record_items
            .iter()
            .enumerate()
            .filter_map(|(index, record)| match &record.kind {
                RecordKind::Highlight {
                    semantic_tag,
                    description,
                } => Some(HighlightEntry {
                    index,
                    record_id: record.record_id,
                    timestamp: record.timestamp,
                    semantic_tag: semantic_tag.clone(),
                    description: description.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Distinct highlight semantics in first-seen order.
    pub fn highlight_semantics(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for entry in self.highlights() {
            if !seen.contains(&entry.semantic_tag) {
                seen.push(entry.semantic_tag);
            }
        }
        seen
    }

    /// Milliseconds between the first and the last record.
    pub fn duration_ms(&self) -> u64 {
        match (self.record_items.first(), self.record_items.last()) {
            (Some(first), Some(last)) => last.timestamp.saturating_sub(first.timestamp),
            _ => 0,
        }
    }
}
