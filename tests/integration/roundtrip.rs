//! Integration tests for the record -> store -> replay flow
//!
//! A live page is recorded through a RecordingSession into a MemoryStore, the
//! stored session is fetched back and replayed on a virtual clock. The
//! replayed document must match the live one.

use std::sync::Arc;

use parking_lot::Mutex;

use domtape::model::{marker_token, RecordKind};
use domtape::recorder::{RecorderOptions, RecordingSession};
use domtape::RecordError;
use domtape::transport::{MemoryStore, SessionSource};

use super::common::{is_walked, markup, page, play_to_end, wait_until};

/// Test that a recorded page replays to identical markup
#[tokio::test]
async fn test_replay_reproduces_the_recorded_page() {
    let page = page();
    let (list, first_text, banner) = (page.list, page.first_text, page.banner);
    let doc = Arc::new(Mutex::new(page.doc));
    let store = Arc::new(MemoryStore::new());

    let handle = RecordingSession::start(Arc::clone(&doc), store.clone(), RecorderOptions::default())
        .expect("recording should start");
    let session_id = handle.session_id().to_string();

    {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        let text = doc.create_text("two");
        doc.append_child(item, text).unwrap();
        doc.append_child(list, item).unwrap();
        doc.set_text(first_text, "one (edited)").unwrap();
        doc.set_attribute(banner, "class", "intro dismissed").unwrap();
        doc.set_attribute(banner, "title", "Dismissed").unwrap();
        doc.deliver_mutations();
    }
    handle.click(12.0, 34.0);
    handle.highlight("checkout", "reached the cart");
    handle.stop().await.expect("recording should stop cleanly");

    let expected = markup(&doc.lock());
    assert!(expected.contains("one (edited)"));
    assert!(expected.contains("<li class=\"@"));

    let session = store
        .fetch_session(&session_id, false)
        .await
        .expect("stored session should assemble");
    assert!(session.is_fully_recorded());
    assert!(store.is_stopped(&session_id));
    assert_eq!(session.highlight_semantics(), vec!["checkout".to_string()]);

    let ids: Vec<u64> = session.record_items.iter().map(|r| r.record_id).collect();
    assert_eq!(ids, (0..ids.len() as u64).collect::<Vec<_>>());

    let player = play_to_end(session).await;
    assert_eq!(markup(player.document()), expected);
}

/// Test the add, reclass, remove scenario end to end
#[tokio::test]
async fn test_removed_node_is_gone_after_replay() {
    let page = page();
    let list = page.list;
    let doc = Arc::new(Mutex::new(page.doc));
    let store = Arc::new(MemoryStore::new());

    let handle = RecordingSession::start(Arc::clone(&doc), store.clone(), RecorderOptions::default())
        .expect("recording should start");
    let session_id = handle.session_id().to_string();

    let item = {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        doc.append_child(list, item).unwrap();
        doc.deliver_mutations();
        item
    };
    wait_until(|| is_walked(&doc.lock(), item)).await;
    {
        let mut doc = doc.lock();
        let text = doc.create_text("hi");
        doc.append_child(item, text).unwrap();
        doc.set_attribute(item, "class", "foo").unwrap();
        doc.remove_child(list, item).unwrap();
        doc.deliver_mutations();
    }
    handle.stop().await.expect("recording should stop cleanly");

    let session = store.fetch_session(&session_id, false).await.unwrap();
    let kinds: Vec<&str> = session.record_items.iter().map(|r| r.kind.name()).collect();
    assert_eq!(
        kinds,
        vec!["NodeInsertion", "NodeInsertion", "AttributeMutation", "NodeDeletion", "SessionEnd"]
    );

    let item_id = match &session.record_items[0].kind {
        RecordKind::NodeInsertion { new_id, .. } => *new_id,
        other => panic!("Expected NodeInsertion, got {:?}", other),
    };
    match &session.record_items[2].kind {
        RecordKind::AttributeMutation { target_id, key, value } => {
            assert_eq!(*target_id, item_id);
            assert_eq!(key, "class");
            assert_eq!(value, &format!("foo {}", marker_token(item_id)));
        }
        other => panic!("Expected AttributeMutation, got {:?}", other),
    }

    let player = play_to_end(session).await;
    let replayed = markup(player.document());
    assert!(!replayed.contains(&marker_token(item_id)));
    assert!(!replayed.contains("hi"));
    assert!(player.stage().is_deleted(item_id));
    assert!(player.stage().resolve(player.document(), item_id).is_none());
}

/// Test that a rejected root halts the recording and stores nothing
#[tokio::test]
async fn test_rejected_root_halts_recording() {
    let page = page();
    let list = page.list;
    let doc = Arc::new(Mutex::new(page.doc));
    let store = Arc::new(MemoryStore::rejecting_root());

    let handle = RecordingSession::start(Arc::clone(&doc), store.clone(), RecorderOptions::default())
        .expect("capture itself should succeed");
    {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        doc.append_child(list, item).unwrap();
        doc.deliver_mutations();
    }

    let result = handle.stop().await;
    assert!(matches!(result, Err(RecordError::RootRejected(_))));
    assert!(store.session_ids().is_empty());
    assert!(!doc.lock().is_observed());
}

/// Test that a rejected chunk ends the recording on its own and nothing more is sent
#[tokio::test]
async fn test_rejected_chunks_halt_recording() {
    let page = page();
    let (list, banner) = (page.list, page.banner);
    let doc = Arc::new(Mutex::new(page.doc));
    let store = Arc::new(MemoryStore::rejecting_records());
    let options = RecorderOptions {
        buffer_size: 1,
        ..RecorderOptions::default()
    };

    let handle = RecordingSession::start(Arc::clone(&doc), store.clone(), options)
        .expect("recording should start");
    let session_id = handle.session_id().to_string();
    {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        doc.append_child(list, item).unwrap();
        doc.deliver_mutations();
    }

    wait_until(|| handle.is_finished()).await;
    assert_eq!(store.record_submissions(), 1);
    assert!(!doc.lock().is_observed());

    {
        let mut doc = doc.lock();
        doc.set_attribute(banner, "class", "gone").unwrap();
        assert!(!doc.deliver_mutations());
    }
    handle.click(1.0, 2.0);

    let result = handle.stop().await;
    assert!(matches!(result, Err(RecordError::Transport(_))));
    assert_eq!(store.record_submissions(), 1);
    assert!(store.chunks(&session_id).is_empty());
    assert!(!store.is_stopped(&session_id));
}
