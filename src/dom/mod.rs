//! Arena-backed live document tree.
//!
//! Nodes are addressed by [`NodeKey`] handles. A detached node keeps its data,
//! so an observer can still inspect it after its removal was reported; its slot
//! is only reclaimed by an explicit [`Document::drop_subtree`]. While a document is observed, every structural,
//! attribute and text write queues a [`Mutation`]; queued mutations are handed
//! to the observer as one batch at each [`Document::deliver_mutations`]
//! checkpoint.

mod mutation;

use std::fmt::Write as _;

use thiserror::Error;
use tokio::sync::mpsc;

pub use mutation::{Mutation, MutationBatch};

/// Handle to a node inside one [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomError {
    #[error("invalid element name: {0:?}")]
    InvalidName(String),
    #[error("unknown node {0:?}")]
    UnknownNode(NodeKey),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeKey),
    #[error("node {0:?} is not a text node")]
    NotText(NodeKey),
    #[error("node {0:?} cannot contain children")]
    NotAContainer(NodeKey),
    #[error("node {child:?} is not a child of {parent:?}")]
    NotAChild { parent: NodeKey, child: NodeKey },
    #[error("node {0:?} is detached")]
    Detached(NodeKey),
    #[error("inserting {0:?} here would create a cycle")]
    Cycle(NodeKey),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    /// Created in a foreign namespace (e.g. SVG) and must be re-created the same way.
    pub namespaced: bool,
    pub attributes: Vec<(String, String)>,
    pub scroll: (f64, f64),
}

impl Element {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn class_tokens(&self) -> impl Iterator<Item = &str> {
        self.attribute("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class_token(&self, token: &str) -> bool {
        self.class_tokens().any(|t| t == token)
    }

    fn put_attribute(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self
                .attributes
                .push((name.to_string(), value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Document,
    Doctype(String),
    Comment(String),
    Text(String),
    Element(Element),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    free: Vec<usize>,
    location: String,
    observer: Option<mpsc::UnboundedSender<MutationBatch>>,
    observing: bool,
    pending: Vec<Mutation>,
}

impl Document {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            nodes: vec![Some(Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
            location: location.into(),
            observer: None,
            observing: false,
            pending: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeKey {
        NodeKey(0)
    }

    /// First element child of the document node (the `<html>` element).
    pub fn document_element(&self) -> Option<NodeKey> {
        self.children(self.root())
            .iter()
            .copied()
            .find(|key| self.element(*key).is_some())
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    /// Change the current location. Navigation is not a tree mutation.
    pub fn navigate(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    // -- creation ---------------------------------------------------------

    pub fn create_element(&mut self, tag: &str) -> Result<NodeKey, DomError> {
        self.create_element_inner(tag, false)
    }

    /// Create an element in a foreign namespace (SVG and friends).
    pub fn create_element_ns(&mut self, tag: &str) -> Result<NodeKey, DomError> {
        self.create_element_inner(tag, true)
    }

    fn create_element_inner(&mut self, tag: &str, namespaced: bool) -> Result<NodeKey, DomError> {
        if !is_valid_name(tag) {
            return Err(DomError::InvalidName(tag.to_string()));
        }
        Ok(self.push(NodeData::Element(Element {
            tag: tag.to_string(),
            namespaced,
            attributes: Vec::new(),
            scroll: (0.0, 0.0),
        })))
    }

    pub fn create_text(&mut self, data: impl Into<String>) -> NodeKey {
        self.push(NodeData::Text(data.into()))
    }

    pub fn create_comment(&mut self, data: impl Into<String>) -> NodeKey {
        self.push(NodeData::Comment(data.into()))
    }

    pub fn create_doctype(&mut self, name: impl Into<String>) -> NodeKey {
        self.push(NodeData::Doctype(name.into()))
    }

    fn push(&mut self, data: NodeData) -> NodeKey {
        let node = Node {
            data,
            parent: None,
            children: Vec::new(),
        };
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = Some(node);
                NodeKey(index)
            }
            None => {
                self.nodes.push(Some(node));
                NodeKey(self.nodes.len() - 1)
            }
        }
    }

    /// Free a detached subtree so its slots can be reused. Keys into the
    /// subtree become unknown. Returns how many nodes were freed; the root
    /// and attached nodes are left alone.
    pub fn drop_subtree(&mut self, key: NodeKey) -> usize {
        let detached = matches!(self.slot(key), Some(node) if node.parent.is_none());
        if key == self.root() || !detached {
            return 0;
        }
        let doomed = self.descendants(key);
        for dead in &doomed {
            self.nodes[dead.0] = None;
            self.free.push(dead.0);
        }
        doomed.len()
    }

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    // -- inspection -------------------------------------------------------

    fn slot(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key.0).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key.0).and_then(Option::as_mut)
    }

    fn node(&self, key: NodeKey) -> Result<&Node, DomError> {
        self.slot(key).ok_or(DomError::UnknownNode(key))
    }

    fn node_mut(&mut self, key: NodeKey) -> Result<&mut Node, DomError> {
        self.slot_mut(key).ok_or(DomError::UnknownNode(key))
    }

    pub fn data(&self, key: NodeKey) -> Option<&NodeData> {
        self.slot(key).map(|node| &node.data)
    }

    pub fn element(&self, key: NodeKey) -> Option<&Element> {
        match self.data(key) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn text(&self, key: NodeKey) -> Option<&str> {
        match self.data(key) {
            Some(NodeData::Text(data)) => Some(data),
            _ => None,
        }
    }

    pub fn attribute(&self, key: NodeKey, name: &str) -> Option<&str> {
        self.element(key).and_then(|element| element.attribute(name))
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.slot(key).and_then(|node| node.parent)
    }

    pub fn children(&self, key: NodeKey) -> &[NodeKey] {
        self.slot(key)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn previous_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let siblings = self.children(self.parent(key)?);
        let index = siblings.iter().position(|k| *k == key)?;
        index.checked_sub(1).map(|i| siblings[i])
    }

    pub fn next_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let siblings = self.children(self.parent(key)?);
        let index = siblings.iter().position(|k| *k == key)?;
        siblings.get(index + 1).copied()
    }

    /// Whether the node is reachable from the document root.
    pub fn is_connected(&self, key: NodeKey) -> bool {
        let mut current = key;
        loop {
            if current == self.root() {
                return true;
            }
            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    fn is_inclusive_ancestor(&self, ancestor: NodeKey, of: NodeKey) -> bool {
        let mut current = Some(of);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.parent(key);
        }
        false
    }

    pub fn first_text_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.children(key)
            .iter()
            .copied()
            .find(|child| self.text(*child).is_some())
    }

    pub fn element_child_count(&self, key: NodeKey) -> usize {
        self.children(key)
            .iter()
            .filter(|child| self.element(**child).is_some())
            .count()
    }

    /// Pre-order traversal of `key` and everything below it.
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    /// Find a connected element carrying `token` in its class list.
    pub fn find_by_class_token(&self, token: &str) -> Option<NodeKey> {
        self.descendants(self.root())
            .into_iter()
            .find(|key| self.element(*key).is_some_and(|e| e.has_class_token(token)))
    }

    pub fn scroll_position(&self, key: NodeKey) -> Option<(f64, f64)> {
        self.element(key).map(|element| element.scroll)
    }

    // -- mutation ---------------------------------------------------------

    pub fn append_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` under `parent` before `reference`, or last when `reference` is `None`.
    pub fn insert_before(
        &mut self,
        parent: NodeKey,
        child: NodeKey,
        reference: Option<NodeKey>,
    ) -> Result<(), DomError> {
        self.ensure_container(parent)?;
        self.node(child)?;
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DomError::Cycle(child));
        }
        if let Some(reference) = reference {
            if self.parent(reference) != Some(parent) {
                return Err(DomError::NotAChild {
                    parent,
                    child: reference,
                });
            }
            if reference == child {
                return Ok(());
            }
        }

        self.detach(child);

        let siblings = &mut self.node_mut(parent)?.children;
        let index = reference
            .and_then(|r| siblings.iter().position(|k| *k == r))
            .unwrap_or(siblings.len());
        siblings.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        self.record(Mutation::ChildList {
            target: parent,
            added: vec![child],
            removed: Vec::new(),
        });
        Ok(())
    }

    /// Insert `child` directly after `reference` in the reference's parent.
    pub fn insert_after(&mut self, reference: NodeKey, child: NodeKey) -> Result<(), DomError> {
        let parent = self.parent(reference).ok_or(DomError::Detached(reference))?;
        let next = self.next_sibling(reference);
        self.insert_before(parent, child, next)
    }

    pub fn remove_child(&mut self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotAChild { parent, child });
        }
        self.detach(child);
        Ok(())
    }

    /// Detach `key` from its parent, if it has one.
    pub fn remove(&mut self, key: NodeKey) -> bool {
        self.detach(key)
    }

    fn detach(&mut self, child: NodeKey) -> bool {
        let Some(parent) = self.slot_mut(child).and_then(|n| n.parent.take()) else {
            return false;
        };
        if let Some(node) = self.slot_mut(parent) {
            node.children.retain(|k| *k != child);
        }
        self.record(Mutation::ChildList {
            target: parent,
            added: Vec::new(),
            removed: vec![child],
        });
        true
    }

    pub fn set_attribute(&mut self, key: NodeKey, name: &str, value: &str) -> Result<(), DomError> {
        if !is_valid_name(name) {
            return Err(DomError::InvalidName(name.to_string()));
        }
        self.element_mut(key)?.put_attribute(name, value);
        self.record(Mutation::Attribute {
            target: key,
            name: name.to_string(),
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, key: NodeKey, name: &str) -> Result<(), DomError> {
        let element = self.element_mut(key)?;
        let before = element.attributes.len();
        element.attributes.retain(|(k, _)| k != name);
        if element.attributes.len() != before {
            self.record(Mutation::Attribute {
                target: key,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Append a class token without notifying the observer.
    ///
    /// Returns `false` when the token was already present.
    pub fn add_class_token_unobserved(&mut self, key: NodeKey, token: &str) -> Result<bool, DomError> {
        let element = self.element_mut(key)?;
        if element.has_class_token(token) {
            return Ok(false);
        }
        let current = element.attribute("class").unwrap_or_default().trim();
        let value = if current.is_empty() {
            token.to_string()
        } else {
            format!("{current} {token}")
        };
        element.put_attribute("class", &value);
        Ok(true)
    }

    pub fn set_text(&mut self, key: NodeKey, data: impl Into<String>) -> Result<(), DomError> {
        match &mut self.node_mut(key)?.data {
            NodeData::Text(existing) | NodeData::Comment(existing) => *existing = data.into(),
            _ => return Err(DomError::NotText(key)),
        }
        self.record(Mutation::CharacterData { target: key });
        Ok(())
    }

    /// Replace every child of `key` with a single text node.
    pub fn set_inner_text(&mut self, key: NodeKey, data: impl Into<String>) -> Result<NodeKey, DomError> {
        self.ensure_container(key)?;
        let text = self.create_text(data);
        let removed = std::mem::take(&mut self.node_mut(key)?.children);
        for child in &removed {
            if let Some(node) = self.slot_mut(*child) {
                node.parent = None;
            }
        }
        self.node_mut(key)?.children.push(text);
        self.node_mut(text)?.parent = Some(key);
        self.record(Mutation::ChildList {
            target: key,
            added: vec![text],
            removed,
        });
        Ok(text)
    }

    pub fn scroll_to(&mut self, key: NodeKey, left: f64, top: f64) -> Result<(), DomError> {
        self.element_mut(key)?.scroll = (left, top);
        Ok(())
    }

    /// Replace the children of `parent` without notifying the observer and
    /// return the previous children, still intact, so they can be restored.
    pub fn swap_children(&mut self, parent: NodeKey, children: Vec<NodeKey>) -> Result<Vec<NodeKey>, DomError> {
        self.ensure_container(parent)?;
        for child in &children {
            if self.is_inclusive_ancestor(*child, parent) {
                return Err(DomError::Cycle(*child));
            }
        }
        let previous = std::mem::take(&mut self.node_mut(parent)?.children);
        for child in &previous {
            if let Some(node) = self.slot_mut(*child) {
                node.parent = None;
            }
        }
        for child in &children {
            if let Some(old_parent) = self.node_mut(*child)?.parent.take() {
                if let Some(node) = self.slot_mut(old_parent) {
                    node.children.retain(|k| k != child);
                }
            }
            self.node_mut(*child)?.parent = Some(parent);
        }
        self.node_mut(parent)?.children = children;
        Ok(previous)
    }

    fn element_mut(&mut self, key: NodeKey) -> Result<&mut Element, DomError> {
        match &mut self.node_mut(key)?.data {
            NodeData::Element(element) => Ok(element),
            _ => Err(DomError::NotAnElement(key)),
        }
    }

    fn ensure_container(&self, key: NodeKey) -> Result<(), DomError> {
        match self.node(key)?.data {
            NodeData::Document | NodeData::Element(_) => Ok(()),
            _ => Err(DomError::NotAContainer(key)),
        }
    }

    // -- observation ------------------------------------------------------

    /// Start observing mutations. Batches arrive on the returned receiver
    /// each time [`deliver_mutations`](Self::deliver_mutations) is called.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<MutationBatch> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        self.observing = true;
        self.pending.clear();
        rx
    }

    pub fn is_observed(&self) -> bool {
        self.observing
    }

    fn record(&mut self, mutation: Mutation) {
        if self.observing {
            self.pending.push(mutation);
        }
    }

    /// Hand every queued mutation to the observer as one batch.
    pub fn deliver_mutations(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let batch = std::mem::take(&mut self.pending);
        match &self.observer {
            Some(tx) if tx.send(batch).is_ok() => true,
            Some(_) => {
                tracing::debug!("mutation observer went away, dropping batch");
                self.observer = None;
                false
            }
            None => false,
        }
    }

    /// Drain queued mutations without delivering them.
    pub fn take_records(&mut self) -> Vec<Mutation> {
        std::mem::take(&mut self.pending)
    }

    /// Stop observing and return whatever was still queued.
    pub fn disconnect(&mut self) -> Vec<Mutation> {
        self.observing = false;
        self.observer = None;
        self.take_records()
    }

    // -- serialisation ----------------------------------------------------

    /// Deterministic markup for `key` and its subtree. Attributes are sorted
    /// by name so two structurally equal trees always render identically.
    pub fn to_markup(&self, key: NodeKey) -> String {
        let mut out = String::new();
        self.write_markup(key, &mut out);
        out
    }

    fn write_markup(&self, key: NodeKey, out: &mut String) {
        match self.data(key) {
            Some(NodeData::Document) | None => {}
            Some(NodeData::Doctype(name)) => {
                let _ = write!(out, "<!DOCTYPE {name}>");
                return;
            }
            Some(NodeData::Comment(data)) => {
                let _ = write!(out, "<!--{data}-->");
                return;
            }
            Some(NodeData::Text(data)) => {
                out.push_str(&escape(data, false));
                return;
            }
            Some(NodeData::Element(element)) => {
                let mut attributes: Vec<_> = element.attributes.iter().collect();
                attributes.sort();
                let _ = write!(out, "<{}", element.tag);
                for (name, value) in attributes {
                    let _ = write!(out, " {}=\"{}\"", name, escape(value, true));
                }
                out.push('>');
            }
        }
        for child in self.children(key) {
            self.write_markup(*child, out);
        }
        if let Some(element) = self.element(key) {
            let _ = write!(out, "</{}>", element.tag);
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, ':' | '_' | '.' | '-'))
        }
        _ => false,
    }
}

fn escape(raw: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
