use crate::dom::{DomError, Document, NodeKey};
use crate::model::{marker_token, NodeKind, SnapshotNode};
use crate::resource::{is_url_attribute, ResourceNormalizer};

use super::stage::{ParentRef, Stage};
use super::ReplayError;

/// Rebase an attribute value recorded elsewhere against the session location.
pub(super) fn replay_attribute_value(normalizer: &ResourceNormalizer, key: &str, value: &str) -> String {
    if is_url_attribute(key) {
        normalizer.rebase_url(value)
    } else {
        normalizer.rewrite_css_urls(value)
    }
}

fn shape_error(node: &SnapshotNode, err: DomError) -> ReplayError {
    ReplayError::StructuralShape(format!("snapshot node {}: {err}", node.id))
}

/// Build a detached live copy of `node` and its descendants.
///
/// Every created node is registered in `stage`; elements are tagged with their
/// marker token. The caller decides where the returned node goes.
pub fn instantiate(
    doc: &mut Document,
    stage: &mut Stage,
    node: &SnapshotNode,
    parent: ParentRef,
    normalizer: &ResourceNormalizer,
) -> Result<NodeKey, ReplayError> {
    let key = match node.kind {
        NodeKind::Text => doc.create_text(node.text.clone().unwrap_or_default()),
        NodeKind::Element => {
            let key = if node.namespaced {
                doc.create_element_ns(&node.tag)
            } else {
                doc.create_element(&node.tag)
            }
            .map_err(|e| shape_error(node, e))?;
            for (name, value) in node.attributes.iter().flatten() {
                let value = replay_attribute_value(normalizer, name, value);
                doc.set_attribute(key, name, &value)
                    .map_err(|e| shape_error(node, e))?;
            }
            doc.add_class_token_unobserved(key, &marker_token(node.id))
                .map_err(|e| shape_error(node, e))?;
            key
        }
        NodeKind::Document => {
            return Err(ReplayError::StructuralShape(format!(
                "snapshot node {} is a document below the root",
                node.id
            )));
        }
    };
    stage.register(node.id, key, parent);

    for child in &node.children {
        let child_key = instantiate(doc, stage, child, ParentRef::Node(node.id), normalizer)?;
        doc.append_child(key, child_key)
            .map_err(|e| shape_error(child, e))?;
    }
    Ok(key)
}

/// Rehydrate a root snapshot into `doc`, replacing the content of its
/// document node. Returns the previous content so it can be put back.
///
/// Nothing is swapped in unless the whole tree was built.
pub fn mount(
    doc: &mut Document,
    stage: &mut Stage,
    root: &SnapshotNode,
    normalizer: &ResourceNormalizer,
) -> Result<Vec<NodeKey>, ReplayError> {
    if root.kind != NodeKind::Document {
        return Err(ReplayError::StructuralShape(format!(
            "root snapshot node {} is a {} node, expected a document",
            root.id, root.tag
        )));
    }
    let doc_root = doc.root();
    stage.register(root.id, doc_root, ParentRef::Root);

    let mut children = Vec::with_capacity(root.children.len());
    for child in &root.children {
        children.push(instantiate(doc, stage, child, ParentRef::Node(root.id), normalizer)?);
    }
    let original = doc
        .swap_children(doc_root, children)
        .map_err(|e| shape_error(root, e))?;
    tracing::debug!(nodes = stage.len(), "rehydrated root snapshot");
    Ok(original)
}

/// Put back content saved by [`mount`] and free every node playback created.
pub fn unmount(doc: &mut Document, stage: &Stage, original: Vec<NodeKey>) {
    let root = doc.root();
    let mounted = match doc.swap_children(root, original) {
        Ok(mounted) => mounted,
        Err(e) => {
            tracing::error!(error = %e, "failed to restore original content");
            return;
        }
    };
    // Deleted nodes are reachable only through the stage.
    let freed: usize = mounted
        .into_iter()
        .chain(stage.keys())
        .map(|key| doc.drop_subtree(key))
        .sum();
    tracing::debug!(freed, "released replayed content");
}
