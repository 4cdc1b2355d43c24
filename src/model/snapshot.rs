use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire tag used for text nodes.
pub const TEXT_TAG: &str = "TEXT";
/// Wire tag used for the document node.
pub const DOCUMENT_TAG: &str = "DOCUMENT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Text,
    Element,
    Document,
}

/// Immutable, id-tagged copy of a live node and its descendants.
///
/// On the wire this uses the compact keys of the recording format:
/// `i` id, `t` tag, `d` text data, `v` namespaced, `a` attributes, `c` children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "WireNode", try_from = "WireNode")]
pub struct SnapshotNode {
    pub id: u64,
    pub kind: NodeKind,
    pub tag: String,
    pub namespaced: bool,
    /// Present for text nodes only.
    pub text: Option<String>,
    /// `None` for text nodes.
    pub attributes: Option<BTreeMap<String, String>>,
    pub children: Vec<SnapshotNode>,
}

impl SnapshotNode {
    pub fn text(id: u64, data: impl Into<String>) -> Self {
        Self {
            id,
            kind: NodeKind::Text,
            tag: TEXT_TAG.to_string(),
            namespaced: false,
            text: Some(data.into()),
            attributes: None,
            children: Vec::new(),
        }
    }

    pub fn element(id: u64, tag: impl Into<String>, namespaced: bool) -> Self {
        Self {
            id,
            kind: NodeKind::Element,
            tag: tag.into(),
            namespaced,
            text: None,
            attributes: Some(BTreeMap::new()),
            children: Vec::new(),
        }
    }

    pub fn document(id: u64) -> Self {
        Self {
            id,
            kind: NodeKind::Document,
            tag: DOCUMENT_TAG.to_string(),
            namespaced: false,
            text: None,
            attributes: None,
            children: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: SnapshotNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree, including itself.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SnapshotNode::node_count).sum::<usize>()
    }

    /// Ids of this subtree in pre-order.
    pub fn ids(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.node_count());
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node.id);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotShapeError {
    #[error("snapshot node {0} has an empty tag")]
    EmptyTag(u64),
    #[error("text snapshot node {0} has children")]
    TextWithChildren(u64),
    #[error("text snapshot node {0} has attributes")]
    TextWithAttributes(u64),
    #[error("snapshot node ids start at 1")]
    ZeroId,
}

#[derive(Serialize, Deserialize)]
struct WireNode {
    #[serde(rename = "i")]
    id: u64,
    #[serde(rename = "t")]
    tag: String,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "v", default)]
    namespaced: bool,
    #[serde(rename = "a", default)]
    attributes: Option<BTreeMap<String, String>>,
    #[serde(rename = "c", default)]
    children: Vec<SnapshotNode>,
}

impl From<SnapshotNode> for WireNode {
    fn from(node: SnapshotNode) -> Self {
        Self {
            id: node.id,
            tag: node.tag,
            text: node.text,
            namespaced: node.namespaced,
            attributes: node.attributes,
            children: node.children,
        }
    }
}

impl TryFrom<WireNode> for SnapshotNode {
    type Error = SnapshotShapeError;

    fn try_from(wire: WireNode) -> Result<Self, Self::Error> {
        if wire.id == 0 {
            return Err(SnapshotShapeError::ZeroId);
        }
        let kind = match wire.tag.as_str() {
            "" => return Err(SnapshotShapeError::EmptyTag(wire.id)),
            TEXT_TAG => NodeKind::Text,
            DOCUMENT_TAG => NodeKind::Document,
            _ => NodeKind::Element,
        };
        if kind == NodeKind::Text {
            if !wire.children.is_empty() {
                return Err(SnapshotShapeError::TextWithChildren(wire.id));
            }
            if wire.attributes.as_ref().is_some_and(|a| !a.is_empty()) {
                return Err(SnapshotShapeError::TextWithAttributes(wire.id));
            }
        }
        Ok(Self {
            id: wire.id,
            kind,
            tag: wire.tag,
            namespaced: wire.namespaced,
            text: match kind {
                NodeKind::Text => Some(wire.text.unwrap_or_default()),
                _ => None,
            },
            attributes: match kind {
                NodeKind::Text => None,
                _ => wire.attributes,
            },
            children: wire.children,
        })
    }
}
