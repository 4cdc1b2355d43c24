use std::collections::{HashMap, HashSet};

use crate::dom::{Document, NodeData, NodeKey};
use crate::model::{marker_token, SnapshotNode};
use crate::resource::{is_url_attribute, ResourceNormalizer};

/// What the recorder remembers about a live node it has walked.
#[derive(Debug, Clone, Copy)]
struct Tracked {
    /// Parent at walk time. Kept after detachment so a later removal can still
    /// name the parent the node was recorded under.
    parent: Option<NodeKey>,
    id: u64,
}

/// Outcome of walking one live node.
#[derive(Debug, Clone, PartialEq)]
pub enum Walked {
    /// Freshly captured subtree; ids were allocated.
    New(SnapshotNode),
    /// Already tracked under this id; nothing was allocated.
    Known(u64),
}

/// Live node to id mapping for one recording session.
#[derive(Debug)]
pub struct NodeRegistry {
    mapping: HashMap<NodeKey, Tracked>,
    next_id: u64,
    deleted: HashSet<u64>,
    debug: bool,
}

impl NodeRegistry {
    pub fn new(debug: bool) -> Self {
        Self {
            mapping: HashMap::new(),
            next_id: 1,
            deleted: HashSet::new(),
            debug,
        }
    }

    pub fn clear(&mut self) {
        self.mapping.clear();
        self.deleted.clear();
        self.next_id = 1;
    }

    pub fn id_of(&self, key: NodeKey) -> Option<u64> {
        self.mapping.get(&key).map(|tracked| tracked.id)
    }

    /// Parent recorded when `key` was walked, even if it has since been detached.
    pub fn recorded_parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.mapping.get(&key).and_then(|tracked| tracked.parent)
    }

    pub fn mark_deleted(&mut self, id: u64) {
        self.deleted.insert(id);
    }

    pub fn is_deleted(&self, id: u64) -> bool {
        self.deleted.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }

    /// Capture `key` and its untracked descendants in pre-order.
    ///
    /// Ignored kinds yield `None` and are never tracked. Every new element is
    /// tagged with its marker token without notifying the observer.
    pub fn walk(
        &mut self,
        doc: &mut Document,
        key: NodeKey,
        normalizer: &ResourceNormalizer,
    ) -> Option<Walked> {
        tracing::trace!(node = ?key, "walking node");
        if is_ignored(doc, key) {
            return None;
        }
        if let Some(tracked) = self.mapping.get(&key) {
            tracing::trace!(node_id = tracked.id, "node already walked");
            return Some(Walked::Known(tracked.id));
        }

        let id = self.next_id;
        let mut snapshot = match doc.data(key)? {
            NodeData::Text(data) => SnapshotNode::text(id, data.clone()),
            NodeData::Document => SnapshotNode::document(id),
            NodeData::Element(element) => {
                let mut node = SnapshotNode::element(id, element.tag.clone(), element.namespaced);
                let attributes = element
                    .attributes
                    .iter()
                    .map(|(name, value)| {
                        let value = if is_url_attribute(name) {
                            let normalized = normalizer.capture_url(value);
                            if self.debug && normalized != *value {
                                tracing::debug!(node_id = id, attribute = %name, from = %value, to = %normalized, "normalized resource");
                            }
                            normalized
                        } else {
                            value.clone()
                        };
                        (name.clone(), value)
                    })
                    .collect();
                node.attributes = Some(attributes);
                node
            }
            NodeData::Doctype(_) | NodeData::Comment(_) => return None,
        };
        self.next_id += 1;
        if self.debug {
            tracing::debug!(node_id = id, tag = %snapshot.tag, "allocated node id");
        }

        if doc.element(key).is_some() {
            // best effort, the snapshot is authoritative
            let _ = doc.add_class_token_unobserved(key, &marker_token(id));
        }
        self.mapping.insert(
            key,
            Tracked {
                parent: doc.parent(key),
                id,
            },
        );

        if doc.text(key).is_none() {
            let children = doc.children(key).to_vec();
            for child in children {
                if let Some(Walked::New(child_snapshot)) = self.walk(doc, child, normalizer) {
                    snapshot.children.push(child_snapshot);
                }
            }
        }
        tracing::trace!(node_id = id, "node walked");
        Some(Walked::New(snapshot))
    }
}

/// Doctypes, comments, scripts and meta declarations are never recorded.
pub fn is_ignored(doc: &Document, key: NodeKey) -> bool {
    match doc.data(key) {
        Some(NodeData::Doctype(_) | NodeData::Comment(_)) => true,
        Some(NodeData::Element(element)) => {
            element.tag.eq_ignore_ascii_case("script") || element.tag.eq_ignore_ascii_case("meta")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeKind;

    fn sample() -> (Document, NodeKey, NodeKey) {
        let mut doc = Document::new("https://example.com/app/");
        let doctype = doc.create_doctype("html");
        let html = doc.create_element("html").unwrap();
        let head = doc.create_element("head").unwrap();
        let meta = doc.create_element("meta").unwrap();
        let body = doc.create_element("body").unwrap();
        let comment = doc.create_comment("note");
        let img = doc.create_element("img").unwrap();
        let text = doc.create_text("hello");
        doc.append_child(doc.root(), doctype).unwrap();
        doc.append_child(doc.root(), html).unwrap();
        doc.append_child(html, head).unwrap();
        doc.append_child(head, meta).unwrap();
        doc.append_child(html, body).unwrap();
        doc.append_child(body, comment).unwrap();
        doc.append_child(body, img).unwrap();
        doc.append_child(body, text).unwrap();
        doc.set_attribute(img, "src", "logo.png").unwrap();
        (doc, body, img)
    }

    #[test]
    fn walks_in_pre_order_skipping_ignored_kinds() {
        let (mut doc, _, _) = sample();
        let normalizer = ResourceNormalizer::new(doc.location());
        let mut registry = NodeRegistry::new(false);
        let root = doc.root();

        let Some(Walked::New(snapshot)) = registry.walk(&mut doc, root, &normalizer) else {
            panic!("root should be new");
        };
        assert_eq!(snapshot.kind, NodeKind::Document);
        assert_eq!(snapshot.ids(), vec![1, 2, 3, 4, 5, 6]);
        let body = &snapshot.children[0].children[1];
        assert_eq!(body.tag, "body");
        assert_eq!(body.children[1].text.as_deref(), Some("hello"));
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn normalizes_and_tags_elements() {
        let (mut doc, _, img) = sample();
        let normalizer = ResourceNormalizer::new(doc.location());
        let mut registry = NodeRegistry::new(true);
        let root = doc.root();
        let _rx = doc.observe();

        let Some(Walked::New(snapshot)) = registry.walk(&mut doc, root, &normalizer) else {
            panic!("root should be new");
        };
        let img_snapshot = &snapshot.children[0].children[1].children[0];
        assert_eq!(
            img_snapshot.attributes.as_ref().unwrap()["src"],
            "https://example.com/logo.png"
        );
        // the live node keeps its value and only gains the marker
        assert_eq!(doc.attribute(img, "src"), Some("logo.png"));
        assert_eq!(doc.attribute(img, "class"), Some("@5"));
        assert!(doc.take_records().is_empty());
    }

    #[test]
    fn rewalking_never_allocates_twice() {
        let (mut doc, body, _) = sample();
        let normalizer = ResourceNormalizer::new(doc.location());
        let mut registry = NodeRegistry::new(false);
        let root = doc.root();
        registry.walk(&mut doc, root, &normalizer);

        let id = registry.id_of(body).unwrap();
        assert_eq!(registry.walk(&mut doc, body, &normalizer), Some(Walked::Known(id)));

        let span = doc.create_element("span").unwrap();
        doc.append_child(body, span).unwrap();
        assert_eq!(registry.walk(&mut doc, body, &normalizer), Some(Walked::Known(id)));
        let Some(Walked::New(snapshot)) = registry.walk(&mut doc, span, &normalizer) else {
            panic!("span should be new");
        };
        assert_eq!(snapshot.id, 7);
        assert_eq!(registry.recorded_parent(span), Some(body));
    }

    proptest::proptest! {
        #[test]
        fn ids_are_dense_in_walk_order(parents in proptest::collection::vec(0usize..64, 0..40)) {
            let mut doc = Document::new("https://example.com/");
            let mut nodes = vec![doc.root()];
            for choice in parents {
                let parent = nodes[choice % nodes.len()];
                let child = doc.create_element("div").unwrap();
                doc.append_child(parent, child).unwrap();
                nodes.push(child);
            }
            let normalizer = ResourceNormalizer::new(doc.location());
            let mut registry = NodeRegistry::new(false);
            let root = doc.root();

            let Some(Walked::New(snapshot)) = registry.walk(&mut doc, root, &normalizer) else {
                panic!("root should be new");
            };
            let expected: Vec<u64> = (1..=nodes.len() as u64).collect();
            proptest::prop_assert_eq!(snapshot.ids(), expected);
            proptest::prop_assert_eq!(registry.walk(&mut doc, root, &normalizer), Some(Walked::Known(1)));
        }
    }
}
