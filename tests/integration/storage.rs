//! Integration tests for session storage
//!
//! Recordings go into a filesystem ChunkStore, either directly or through the
//! chunk server over HTTP, and are read back for replay.

use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::tempdir;

use domtape::model::{Record, RecordKind, RootEnvelope, RootMeta};
use domtape::recorder::{RecorderOptions, RecordingSession};
use domtape::transport::server::build_router;
use domtape::transport::{ChunkStore, HttpTransport, RecordSink, SessionSource, TransportError};

use super::common::{empty_root, markup, page, play_to_end};

/// Small chunks so a short recording spans several files.
fn chunky() -> RecorderOptions {
    RecorderOptions {
        buffer_size: 1,
        max_emit_size: 2,
        ..Default::default()
    }
}

fn root(session_id: &str) -> RootEnvelope {
    RootEnvelope {
        session_id: session_id.into(),
        location: "https://example.com/".into(),
        meta_info: RootMeta { base_timestamp: 0 },
        root: empty_root(),
    }
}

fn clicks(ids: std::ops::Range<u64>) -> Vec<Record> {
    ids.map(|id| Record::new(id, id * 10, RecordKind::Click { left: 1.0, top: 1.0 }))
        .collect()
}

/// Test recording into a chunk store and replaying from it
#[tokio::test]
async fn test_chunk_store_recording_replays() {
    let dir = tempdir().unwrap();
    let store = Arc::new(ChunkStore::new(dir.path()));

    let page = page();
    let list = page.list;
    let doc = Arc::new(Mutex::new(page.doc));
    let handle = RecordingSession::start(Arc::clone(&doc), store.clone(), chunky()).unwrap();
    let session_id = handle.session_id().to_string();

    for label in ["two", "three", "four"] {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        let text = doc.create_text(label);
        doc.append_child(item, text).unwrap();
        doc.append_child(list, item).unwrap();
        doc.deliver_mutations();
    }
    handle.click(5.0, 5.0);
    handle.stop().await.unwrap();

    assert_eq!(store.sessions().await.unwrap(), vec![session_id.clone()]);
    let chunk_files = std::fs::read_dir(dir.path().join(&session_id))
        .unwrap()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() != "root.json")
        .count();
    assert!(chunk_files > 1, "expected several chunk files, got {chunk_files}");

    let session = store.fetch_session(&session_id, false).await.unwrap();
    assert!(session.is_fully_recorded());

    let expected = markup(&doc.lock());
    let player = play_to_end(session).await;
    assert_eq!(markup(player.document()), expected);
}

/// Test strict and lenient reads of a session with a missing chunk
#[tokio::test]
async fn test_missing_chunk_is_a_gap() {
    let dir = tempdir().unwrap();
    let store = ChunkStore::new(dir.path());
    store.submit_root(&root("gappy")).await.unwrap();
    store.submit_records("gappy", clicks(0..3)).await.unwrap();
    store.submit_records("gappy", clicks(6..8)).await.unwrap();

    let err = store.fetch_session("gappy", false).await.unwrap_err();
    assert!(matches!(err, TransportError::Gap { after: 2, lost: 5 }));

    let session = store.fetch_session("gappy", true).await.unwrap();
    assert_eq!(session.record_items.len(), 3);
    assert_eq!(session.lost_records, 5);
    assert!(!session.is_fully_recorded());
}

/// Test recording to the chunk server over HTTP and fetching it back
#[tokio::test]
async fn test_http_transport_against_chunk_server() {
    let dir = tempdir().unwrap();
    let router = build_router(Arc::new(ChunkStore::new(dir.path())), true);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await });

    let transport = Arc::new(HttpTransport::new(format!("http://{addr}/")));
    assert_eq!(transport.base_url(), format!("http://{addr}"));

    let page = page();
    let list = page.list;
    let doc = Arc::new(Mutex::new(page.doc));
    let handle = RecordingSession::start(Arc::clone(&doc), transport.clone(), chunky()).unwrap();
    let session_id = handle.session_id().to_string();
    {
        let mut doc = doc.lock();
        let item = doc.create_element("li").unwrap();
        doc.append_child(list, item).unwrap();
        doc.deliver_mutations();
    }
    handle.highlight("signup", "opened the form");
    handle.stop().await.unwrap();

    let session = transport.fetch_session(&session_id, false).await.unwrap();
    assert_eq!(session.session_id, session_id);
    assert!(session.is_fully_recorded());
    assert_eq!(session.highlight_semantics(), vec!["signup".to_string()]);

    let expected = markup(&doc.lock());
    let player = play_to_end(session).await;
    assert_eq!(markup(player.document()), expected);

    let missing = transport.fetch_session("no-such-session", false).await.unwrap_err();
    assert!(matches!(missing, TransportError::NotFound(_)));
}
