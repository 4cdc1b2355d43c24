use std::collections::{HashMap, HashSet};

use crate::dom::{Document, NodeKey};
use crate::model::marker_token;

/// Parent of an instantiated node, as recorded in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Node(u64),
}

/// Replay-side id bookkeeping.
///
/// `parents` covers every node ever instantiated, including ones that were
/// later deleted, so a failed lookup can be diagnosed through its ancestors.
#[derive(Debug, Default)]
pub struct Stage {
    nodes: HashMap<u64, NodeKey>,
    parents: HashMap<u64, ParentRef>,
    deleted: HashSet<u64>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.parents.clear();
        self.deleted.clear();
    }

    pub fn register(&mut self, id: u64, key: NodeKey, parent: ParentRef) {
        self.nodes.insert(id, key);
        self.parents.insert(id, parent);
    }

    /// Live node for `id`. Falls back to the marker token carried in the
    /// node's class attribute when the mapping has no entry.
    pub fn resolve(&self, doc: &Document, id: u64) -> Option<NodeKey> {
        if let Some(key) = self.nodes.get(&id) {
            return Some(*key);
        }
        let key = doc.find_by_class_token(&marker_token(id))?;
        tracing::debug!(node_id = id, "resolved node through its marker token");
        Some(key)
    }

    pub fn parent_of(&self, id: u64) -> Option<ParentRef> {
        self.parents.get(&id).copied()
    }

    pub fn mark_deleted(&mut self, id: u64) {
        self.deleted.insert(id);
    }

    pub fn is_deleted(&self, id: u64) -> bool {
        self.deleted.contains(&id)
    }

    pub fn deleted_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.deleted.iter().copied()
    }

    /// Every node key the stage has handed out.
    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.nodes.values().copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// First ancestor of `id` known to be deleted, walking the recorded
    /// parent chain. `None` when the chain reaches the root or breaks.
    pub fn deleted_ancestor(&self, id: u64) -> Option<u64> {
        let mut current = id;
        // A chain longer than the table is a cycle.
        for _ in 0..=self.parents.len() {
            match self.parents.get(&current)? {
                ParentRef::Root => return None,
                ParentRef::Node(parent) => {
                    if self.deleted.contains(parent) {
                        return Some(*parent);
                    }
                    current = *parent;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_deleted_ancestor() {
        let mut doc = Document::new("https://example.com/");
        let mut stage = Stage::new();
        let root = doc.root();
        let a = doc.create_element("DIV").unwrap();
        let b = doc.create_element("P").unwrap();
        stage.register(1, root, ParentRef::Root);
        stage.register(2, a, ParentRef::Node(1));
        stage.register(3, b, ParentRef::Node(2));
        stage.register(4, b, ParentRef::Node(3));

        assert_eq!(stage.deleted_ancestor(4), None);
        stage.mark_deleted(2);
        assert_eq!(stage.deleted_ancestor(4), Some(2));
        assert_eq!(stage.deleted_ancestor(99), None);
    }

    #[test]
    fn falls_back_to_marker_token() {
        let mut doc = Document::new("https://example.com/");
        let div = doc.create_element("DIV").unwrap();
        doc.append_child(doc.root(), div).unwrap();
        doc.set_attribute(div, "class", "box @7").unwrap();

        let stage = Stage::new();
        assert_eq!(stage.resolve(&doc, 7), Some(div));
        assert_eq!(stage.resolve(&doc, 8), None);
    }
}
