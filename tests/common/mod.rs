//! Shared test utilities for domtape
//!
//! - A small live page to record
//! - Hand-built sessions for the player
//! - A virtual-clock driver that plays a session to the end

#![allow(dead_code)]

use domtape::dom::{Document, NodeKey};
use domtape::model::{Record, RecordKind, RootEnvelope, RootMeta, SessionResult, SnapshotNode};
use domtape::player::{MemorySurface, PlaybackState, Player};

pub const PAGE_LOCATION: &str = "https://shop.example.com/cart/";

/// Live nodes of the page built by [`page`].
pub struct Page {
    pub doc: Document,
    pub body: NodeKey,
    pub list: NodeKey,
    pub first_item: NodeKey,
    pub first_text: NodeKey,
    pub banner: NodeKey,
}

/// `<html><body><ul><li>one</li></ul><p class="intro">Welcome</p></body></html>`
pub fn page() -> Page {
    let mut doc = Document::new(PAGE_LOCATION);
    let html = doc.create_element("html").unwrap();
    let body = doc.create_element("body").unwrap();
    let list = doc.create_element("ul").unwrap();
    let first_item = doc.create_element("li").unwrap();
    let first_text = doc.create_text("one");
    let banner = doc.create_element("p").unwrap();
    let banner_text = doc.create_text("Welcome");

    let root = doc.root();
    doc.append_child(root, html).unwrap();
    doc.append_child(html, body).unwrap();
    doc.append_child(body, list).unwrap();
    doc.append_child(list, first_item).unwrap();
    doc.append_child(first_item, first_text).unwrap();
    doc.append_child(body, banner).unwrap();
    doc.set_attribute(banner, "class", "intro").unwrap();
    doc.append_child(banner, banner_text).unwrap();

    Page {
        doc,
        body,
        list,
        first_item,
        first_text,
        banner,
    }
}

/// Root snapshot `#document(1) > HTML(2) > BODY(3)`.
pub fn empty_root() -> SnapshotNode {
    SnapshotNode::document(1).with_child(
        SnapshotNode::element(2, "HTML", false).with_child(SnapshotNode::element(3, "BODY", false)),
    )
}

/// Session over [`empty_root`] with the given `(timestamp, kind)` records,
/// numbered from zero.
pub fn session(records: Vec<(u64, RecordKind)>) -> SessionResult {
    let record_items = records
        .into_iter()
        .enumerate()
        .map(|(id, (timestamp, kind))| Record::new(id as u64, timestamp, kind))
        .collect();
    SessionResult::from_root(
        RootEnvelope {
            session_id: "fixture".into(),
            location: PAGE_LOCATION.into(),
            meta_info: RootMeta {
                base_timestamp: 1_700_000_000_000,
            },
            root: empty_root(),
        },
        record_items,
    )
}

pub fn insert(new_id: u64, parent_id: u64, subtree: SnapshotNode) -> RecordKind {
    RecordKind::NodeInsertion {
        new_id,
        parent_id,
        subtree,
        prev_sibling_id: None,
        next_sibling_id: None,
    }
}

/// Play `session` from the start, jumping the clock straight to every
/// deadline, and return the player once it has finished.
pub async fn play_to_end(session: SessionResult) -> Player<MemorySurface> {
    let (mut player, _events) = Player::new(MemorySurface::default(), Default::default());
    player.load(session);
    player.play(0).await.unwrap();

    let mut now = 0;
    while player.state() != PlaybackState::Finished {
        let deadline = player
            .next_deadline()
            .expect("a playing player always has a deadline");
        now = now.max(deadline);
        player.poll(now).unwrap();
    }
    player
}

pub fn markup(doc: &Document) -> String {
    doc.to_markup(doc.root())
}

/// Yield to background tasks until `done` holds. Panics after a second.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while !done() {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}

/// Whether a live element carries a recorder marker, i.e. has been walked.
pub fn is_walked(doc: &Document, key: NodeKey) -> bool {
    doc.element(key)
        .is_some_and(|element| element.class_tokens().any(|t| t.starts_with('@')))
}
