use serde::{Deserialize, Serialize};

use super::SnapshotNode;

/// Class-attribute token prefix carrying a node's id (`@12`).
pub const MARKER_PREFIX: &str = "@";

/// Highlight semantic reserved for navigation changes.
pub const URL_SEMANTIC: &str = "URL";

pub fn marker_token(id: u64) -> String {
    format!("{MARKER_PREFIX}{id}")
}

/// Parse a marker token back into its id.
pub fn parse_marker(token: &str) -> Option<u64> {
    let digits = token.strip_prefix(MARKER_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// One timestamped, ordered unit of a recorded session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "r")]
    pub record_id: u64,
    /// Milliseconds since the session started.
    #[serde(rename = "t")]
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: RecordKind,
}

impl Record {
    pub fn new(record_id: u64, timestamp: u64, kind: RecordKind) -> Self {
        Self {
            record_id,
            timestamp,
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "c")]
pub enum RecordKind {
    #[serde(rename = "d")]
    TextMutation {
        #[serde(rename = "i")]
        target_id: u64,
        #[serde(rename = "p")]
        parent_id: u64,
        #[serde(rename = "d")]
        data: String,
    },
    #[serde(rename = "a")]
    AttributeMutation {
        #[serde(rename = "i")]
        target_id: u64,
        #[serde(rename = "k")]
        key: String,
        #[serde(rename = "v")]
        value: String,
    },
    #[serde(rename = "n")]
    NodeInsertion {
        #[serde(rename = "i")]
        new_id: u64,
        #[serde(rename = "p")]
        parent_id: u64,
        #[serde(rename = "sn")]
        subtree: SnapshotNode,
        #[serde(rename = "pr", default, skip_serializing_if = "Option::is_none")]
        prev_sibling_id: Option<u64>,
        #[serde(rename = "ne", default, skip_serializing_if = "Option::is_none")]
        next_sibling_id: Option<u64>,
    },
    #[serde(rename = "r")]
    NodeDeletion {
        #[serde(rename = "i")]
        target_id: u64,
        #[serde(rename = "p")]
        parent_id: u64,
        #[serde(rename = "dd", default)]
        deleted_text: Option<String>,
    },
    #[serde(rename = "s")]
    Scroll {
        #[serde(rename = "i")]
        target_id: u64,
        #[serde(rename = "x")]
        left: f64,
        #[serde(rename = "y")]
        top: f64,
    },
    #[serde(rename = "m")]
    PointerMove {
        #[serde(rename = "x")]
        left: f64,
        #[serde(rename = "y")]
        top: f64,
    },
    #[serde(rename = "c")]
    Click {
        #[serde(rename = "x")]
        left: f64,
        #[serde(rename = "y")]
        top: f64,
    },
    #[serde(rename = "h")]
    Highlight {
        #[serde(rename = "cs")]
        semantic_tag: String,
        #[serde(rename = "cd")]
        description: String,
    },
    #[serde(rename = "e")]
    SessionEnd,
    /// Any variant tag this build does not know about.
    #[serde(other)]
    Unrecognized,
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecordKind::TextMutation { .. } => "TextMutation",
            RecordKind::AttributeMutation { .. } => "AttributeMutation",
            RecordKind::NodeInsertion { .. } => "NodeInsertion",
            RecordKind::NodeDeletion { .. } => "NodeDeletion",
            RecordKind::Scroll { .. } => "Scroll",
            RecordKind::PointerMove { .. } => "PointerMove",
            RecordKind::Click { .. } => "Click",
            RecordKind::Highlight { .. } => "Highlight",
            RecordKind::SessionEnd => "SessionEnd",
            RecordKind::Unrecognized => "Unrecognized",
        }
    }

    /// Records with no structural effect, skipped while seeking.
    pub fn is_cosmetic(&self) -> bool {
        matches!(
            self,
            RecordKind::Scroll { .. }
                | RecordKind::PointerMove { .. }
                | RecordKind::Click { .. }
                | RecordKind::Highlight { .. }
        )
    }

    pub fn is_scroll(&self) -> bool {
        matches!(self, RecordKind::Scroll { .. })
    }
}
