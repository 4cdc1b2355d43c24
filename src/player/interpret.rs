use crate::dom::{Document, NodeKey};
use crate::model::{parse_marker, Record, RecordKind, SnapshotNode, URL_SEMANTIC};
use crate::resource::ResourceNormalizer;

use super::rehydrate::{instantiate, replay_attribute_value};
use super::stage::{ParentRef, Stage};
use super::ReplayError;

/// Side effect of one applied record that the player surfaces outside the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    Pointer { left: f64, top: f64 },
    Click { left: f64, top: f64 },
    Hint(String),
}

/// Applies records to a rehydrated tree.
pub struct Interpreter<'a> {
    pub doc: &'a mut Document,
    pub stage: &'a mut Stage,
    pub normalizer: &'a ResourceNormalizer,
    /// Cosmetic records are skipped while seeking.
    pub seeking: bool,
}

impl Interpreter<'_> {
    pub fn apply(&mut self, record: &Record) -> Result<Effect, ReplayError> {
        let record_id = record.record_id;
        match &record.kind {
            RecordKind::TextMutation { target_id, parent_id, data } => {
                self.text_mutation(record_id, *target_id, *parent_id, data);
            }
            RecordKind::AttributeMutation { target_id, key, value } => {
                self.attribute_mutation(record_id, *target_id, key, value);
            }
            RecordKind::NodeInsertion {
                new_id,
                parent_id,
                subtree,
                prev_sibling_id,
                next_sibling_id,
            } => {
                self.node_insertion(record_id, *new_id, *parent_id, subtree, *prev_sibling_id, *next_sibling_id)?;
            }
            RecordKind::NodeDeletion { target_id, parent_id, deleted_text } => {
                self.node_deletion(record_id, *target_id, *parent_id, deleted_text.as_deref());
            }
            RecordKind::Scroll { target_id, left, top } => {
                if !self.seeking {
                    match self.stage.resolve(self.doc, *target_id) {
                        Some(key) => {
                            if let Err(e) = self.doc.scroll_to(key, *left, *top) {
                                tracing::warn!(record_id, node_id = target_id, error = %e, "cannot scroll node");
                            }
                        }
                        None => tracing::warn!(record_id, node_id = target_id, "scroll target not found"),
                    }
                }
            }
            RecordKind::PointerMove { left, top } => {
                if !self.seeking {
                    return Ok(Effect::Pointer { left: *left, top: *top });
                }
            }
            RecordKind::Click { left, top } => {
                if !self.seeking {
                    return Ok(Effect::Click { left: *left, top: *top });
                }
            }
            RecordKind::Highlight { semantic_tag, description } => {
                if semantic_tag == URL_SEMANTIC {
                    return Ok(Effect::Hint(format!("Navigated to {description}")));
                }
                if !self.seeking {
                    tracing::debug!(record_id, semantic = %semantic_tag, %description, "highlight");
                }
            }
            RecordKind::SessionEnd => {
                tracing::debug!(record_id, "reached end of recording");
            }
            RecordKind::Unrecognized => {
                return Err(ReplayError::StructuralShape(format!(
                    "record {record_id} has an unrecognized variant"
                )));
            }
        }
        Ok(Effect::None)
    }

    fn text_mutation(&mut self, record_id: u64, target_id: u64, parent_id: u64, data: &str) {
        let Some(parent) = self.stage.resolve(self.doc, parent_id) else {
            tracing::warn!(record_id, node_id = target_id, parent_id, "parent of text node not found");
            return;
        };
        // Normally a parent has at most one text child when character data changes.
        if let Some(text) = self.doc.first_text_child(parent) {
            if let Err(e) = self.doc.set_text(text, data) {
                tracing::warn!(record_id, node_id = target_id, error = %e, "cannot update text");
            }
        } else if self.doc.element_child_count(parent) == 0 {
            match self.doc.set_inner_text(parent, data) {
                Ok(text) => self.stage.register(target_id, text, ParentRef::Node(parent_id)),
                Err(e) => tracing::warn!(record_id, node_id = target_id, error = %e, "cannot set text content"),
            }
        } else {
            tracing::warn!(record_id, node_id = target_id, parent_id, "text change in mixed content is not supported");
        }
    }

    fn attribute_mutation(&mut self, record_id: u64, target_id: u64, key: &str, value: &str) {
        let Some(target) = self.stage.resolve(self.doc, target_id) else {
            tracing::warn!(record_id, node_id = target_id, attribute = key, "attribute target not found");
            return;
        };
        let result = if value.is_empty() {
            self.doc.remove_attribute(target, key)
        } else {
            let mut value = replay_attribute_value(self.normalizer, key, value);
            if key == "class" {
                let marker = self
                    .doc
                    .element(target)
                    .and_then(|e| e.class_tokens().find(|t| parse_marker(t).is_some()).map(str::to_string));
                if let Some(marker) = marker {
                    if !value.split_whitespace().any(|t| t == marker) {
                        value = format!("{value} {marker}");
                    }
                }
            }
            self.doc.set_attribute(target, key, &value)
        };
        if let Err(e) = result {
            tracing::warn!(record_id, node_id = target_id, attribute = key, error = %e, "cannot apply attribute change");
        }
    }

    fn node_insertion(
        &mut self,
        record_id: u64,
        new_id: u64,
        parent_id: u64,
        subtree: &SnapshotNode,
        prev_sibling_id: Option<u64>,
        next_sibling_id: Option<u64>,
    ) -> Result<(), ReplayError> {
        let Some(parent) = self.stage.resolve(self.doc, parent_id) else {
            tracing::warn!(record_id, node_id = new_id, parent_id, "insertion parent not found");
            return Ok(());
        };
        let node = instantiate(self.doc, self.stage, subtree, ParentRef::Node(parent_id), self.normalizer)?;

        let sibling_under_parent = |id: Option<u64>, doc: &Document, stage: &Stage| -> Option<NodeKey> {
            id.and_then(|id| stage.resolve(doc, id))
                .filter(|key| doc.parent(*key) == Some(parent))
        };
        let result = if let Some(prev) = sibling_under_parent(prev_sibling_id, &*self.doc, &*self.stage) {
            self.doc.insert_after(prev, node)
        } else if let Some(next) = sibling_under_parent(next_sibling_id, &*self.doc, &*self.stage) {
            self.doc.insert_before(parent, node, Some(next))
        } else {
            if prev_sibling_id.is_some() || next_sibling_id.is_some() {
                tracing::warn!(
                    record_id,
                    node_id = new_id,
                    prev = ?prev_sibling_id,
                    next = ?next_sibling_id,
                    "siblings not found, appending as last child"
                );
            }
            self.doc.append_child(parent, node)
        };
        if let Err(e) = result {
            tracing::warn!(record_id, node_id = new_id, parent_id, error = %e, "cannot place inserted node");
        }
        Ok(())
    }

    fn node_deletion(&mut self, record_id: u64, target_id: u64, parent_id: u64, deleted_text: Option<&str>) {
        if let Some(text) = deleted_text {
            let removed = self.stage.resolve(self.doc, parent_id).and_then(|parent| {
                self.doc
                    .children(parent)
                    .iter()
                    .copied()
                    .find(|child| self.doc.text(*child) == Some(text))
            });
            match removed {
                Some(child) => {
                    self.doc.remove(child);
                }
                None => tracing::warn!(record_id, node_id = target_id, parent_id, "deleted text node not found"),
            }
        } else {
            match self.stage.resolve(self.doc, target_id) {
                Some(target) => {
                    self.doc.remove(target);
                }
                None => match self.stage.deleted_ancestor(target_id) {
                    Some(ancestor) => {
                        tracing::debug!(record_id, node_id = target_id, ancestor, "already removed with an ancestor");
                    }
                    None => {
                        tracing::error!(record_id, node_id = target_id, parent_id, "deleted node was never instantiated");
                    }
                },
            }
        }
        self.stage.mark_deleted(target_id);
    }
}
