//! Turns raw mutation notifications into records.

use crate::dom::{Document, Mutation, NodeKey};
use crate::model::{marker_token, RecordKind};
use crate::resource::is_url_attribute;

use super::buffer::TransientSiblings;
use super::walker::{is_ignored, Walked};
use super::Recorder;

impl Recorder {
    pub(super) fn handle_mutation(&mut self, doc: &mut Document, mutation: &Mutation, at: u64) {
        match mutation {
            Mutation::Attribute { target, name } => self.on_attribute(doc, *target, name, at),
            Mutation::CharacterData { target } => self.on_character_data(doc, *target, at),
            Mutation::ChildList {
                added, removed, ..
            } => {
                for node in removed {
                    self.on_removed(doc, *node, at);
                }
                for node in added {
                    self.on_added(doc, *node, at);
                }
            }
        }
    }

    fn on_attribute(&mut self, doc: &mut Document, target: NodeKey, name: &str, at: u64) {
        if is_ignored(doc, target) || doc.element(target).is_none() {
            return;
        }
        let Some(target_id) = self.registry.id_of(target) else {
            tracing::debug!(node = ?target, attribute = %name, "attribute target is not tracked");
            return;
        };
        let mut value = doc.attribute(target, name).unwrap_or_default().to_string();
        if name == "class" {
            let marker = marker_token(target_id);
            if !value.split_whitespace().any(|token| token == marker) {
                value = if value.trim().is_empty() {
                    marker.clone()
                } else {
                    format!("{value} {marker}")
                };
                let _ = doc.add_class_token_unobserved(target, &marker);
            }
        } else if is_url_attribute(name) {
            value = self.normalizer.capture_url(&value);
        }
        self.push(
            RecordKind::AttributeMutation {
                target_id,
                key: name.to_string(),
                value,
            },
            at,
            None,
        );
    }

    fn on_character_data(&mut self, doc: &Document, target: NodeKey, at: u64) {
        let Some(data) = doc.text(target) else {
            return;
        };
        let target_id = self.registry.id_of(target);
        let parent_id = doc.parent(target).and_then(|p| self.registry.id_of(p));
        let (Some(target_id), Some(parent_id)) = (target_id, parent_id) else {
            tracing::debug!(node = ?target, "text change on untracked node or parent");
            return;
        };
        let data = data.to_string();
        self.push(
            RecordKind::TextMutation {
                target_id,
                parent_id,
                data,
            },
            at,
            None,
        );
    }

    fn on_removed(&mut self, doc: &Document, node: NodeKey, at: u64) {
        if is_ignored(doc, node) {
            return;
        }
        let Some(target_id) = self.registry.id_of(node) else {
            tracing::warn!(node = ?node, "removed node was never recorded");
            return;
        };
        let marker = marker_token(target_id);
        let still_live = doc.is_connected(node)
            && doc
                .element(node)
                .is_some_and(|element| element.has_class_token(&marker));
        if still_live {
            tracing::warn!(node_id = target_id, "removed node is still in the tree, ignoring removal");
            return;
        }
        let Some(parent_id) = self
            .registry
            .recorded_parent(node)
            .and_then(|p| self.registry.id_of(p))
        else {
            tracing::warn!(node_id = target_id, "removed node has no recorded parent");
            return;
        };
        self.push(
            RecordKind::NodeDeletion {
                target_id,
                parent_id,
                deleted_text: doc.text(node).map(str::to_string),
            },
            at,
            None,
        );
        self.registry.mark_deleted(target_id);
    }

    fn on_added(&mut self, doc: &mut Document, node: NodeKey, at: u64) {
        if is_ignored(doc, node) {
            return;
        }
        let Some(parent_id) = doc.parent(node).and_then(|p| self.registry.id_of(p)) else {
            tracing::debug!(node = ?node, "added node has no tracked parent");
            return;
        };
        let subtree = match self.registry.walk(doc, node, &self.normalizer) {
            Some(Walked::New(subtree)) => subtree,
            Some(Walked::Known(id)) => {
                if self.registry.is_deleted(id) {
                    tracing::debug!(node_id = id, "previously removed node re-inserted, not recorded");
                }
                return;
            }
            None => return,
        };
        let prev = doc.previous_sibling(node).filter(|s| !is_ignored(doc, *s));
        let next = doc.next_sibling(node).filter(|s| !is_ignored(doc, *s));
        let siblings = TransientSiblings { prev, next };
        self.push(
            RecordKind::NodeInsertion {
                new_id: subtree.id,
                parent_id,
                subtree,
                prev_sibling_id: None,
                next_sibling_id: None,
            },
            at,
            (prev.is_some() || next.is_some()).then_some(siblings),
        );
    }
}
