//! Integration tests for timed playback
//!
//! The player runs behind a PlayerHandle on a paused tokio clock, so every
//! wake-up happens at exactly the scheduled millisecond.

use std::time::Duration;

use domtape::model::{RecordKind, SessionResult, SnapshotNode};
use domtape::player::{
    MemorySurface, PlaybackState, Player, PlayerEvent, PlayerHandle, PlayerOptions, SeekEnd,
};

use super::common::{insert, session};

/// `P(4)` with text `a` at 0 ms, text becomes `b` at 500 ms, then a long
/// idle gap until the last two records at 5000 ms.
fn idle_session() -> SessionResult {
    session(vec![
        (
            0,
            insert(4, 3, SnapshotNode::element(4, "P", false).with_child(SnapshotNode::text(5, "a"))),
        ),
        (
            500,
            RecordKind::TextMutation {
                target_id: 5,
                parent_id: 4,
                data: "b".into(),
            },
        ),
        (
            5000,
            RecordKind::AttributeMutation {
                target_id: 4,
                key: "title".into(),
                value: "late".into(),
            },
        ),
        (5000, RecordKind::SessionEnd),
    ])
}

fn spawn() -> (PlayerHandle, tokio::sync::mpsc::UnboundedReceiver<PlayerEvent>) {
    let (player, events) = Player::new(MemorySurface::default(), PlayerOptions::default());
    (PlayerHandle::spawn(player), events)
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Test that records are applied on their timestamps and long gaps are skipped
#[tokio::test(start_paused = true)]
async fn test_handle_paces_records_and_fast_forwards() {
    let (handle, mut events) = spawn();
    handle.load(idle_session());
    handle.play();

    let status = handle.status().await.expect("player task should be running");
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.position, 0);
    assert_eq!(status.records, 4);

    sleep_ms(100).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.position, 1);
    assert_eq!(
        status.markup,
        "<HTML class=\"@2\"><BODY class=\"@3\"><P class=\"@4\">a</P></BODY></HTML>"
    );

    sleep_ms(500).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.position, 2);
    assert!(status.markup.contains(">b</P>"));
    assert_eq!(status.hint.as_deref(), Some("Fast-forwarding 4.5s of inactivity"));

    // 500 ms + the 2000 ms threshold, not the recorded 5000 ms.
    sleep_ms(1_950).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Finished);
    assert_eq!(status.position, 4);
    assert_eq!(status.progress, 100.0);
    assert!(status.markup.contains("title=\"late\""));

    let mut finished = false;
    while let Ok(event) = events.try_recv() {
        finished |= event == PlayerEvent::Finished;
    }
    assert!(finished);
    handle.shutdown();
}

/// Test that a paused player schedules nothing until resumed
#[tokio::test(start_paused = true)]
async fn test_pause_holds_position_until_resume() {
    let (handle, _events) = spawn();
    handle.load(idle_session());
    handle.play();
    sleep_ms(100).await;

    handle.pause();
    sleep_ms(10_000).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Paused);
    assert_eq!(status.position, 1);

    handle.resume();
    sleep_ms(1).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Playing);
    assert_eq!(status.position, 2);
}

/// Test seeking by percentage from an idle player
#[tokio::test(start_paused = true)]
async fn test_seek_by_percentage_lands_on_the_index() {
    let (handle, mut events) = spawn();
    handle.load(idle_session());
    handle.rewind_percent(0.5);
    sleep_ms(1).await;

    let status = handle.status().await.unwrap();
    assert_eq!(status.position, 2);
    assert_eq!(status.state, PlaybackState::Playing);
    assert!(status.markup.contains(">b</P>"));

    let mut reached = false;
    while let Ok(event) = events.try_recv() {
        reached |= event == PlayerEvent::SeekFinished { reason: SeekEnd::Reached };
    }
    assert!(reached);
}

/// Test that stop restores the surface and shutdown ends the task
#[tokio::test(start_paused = true)]
async fn test_stop_and_shutdown() {
    let (handle, _events) = spawn();
    handle.load(idle_session());
    handle.play();
    sleep_ms(100).await;

    handle.stop();
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.markup, "");

    handle.shutdown();
    assert!(handle.status().await.is_none());
}

/// Test that a broken record sequence surfaces as an error event
#[tokio::test(start_paused = true)]
async fn test_sequence_gap_reports_an_error() {
    let mut broken = idle_session();
    broken.record_items[1].record_id = 7;

    let (handle, mut events) = spawn();
    handle.load(broken);
    handle.play();
    sleep_ms(1_000).await;

    // A fatal error stops playback and restores the surface.
    let status = handle.status().await.unwrap();
    assert_eq!(status.state, PlaybackState::Idle);
    assert_eq!(status.markup, "");
    let mut error = None;
    while let Ok(event) = events.try_recv() {
        if let PlayerEvent::Error(message) = event {
            error = Some(message);
        }
    }
    assert_eq!(
        error.as_deref(),
        Some("record sequence broken: expected record 1, found 7")
    );
}
