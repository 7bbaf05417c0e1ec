// Conversation reconciliation tests
// These tests verify message merging, pagination, unread bookkeeping, and
// read-state handling against an in-memory REST collaborator, feeding raw
// frames through the same path the socket reader uses.

mod common;
use common::{
    message, message_frame, newest_first, read_receipt_frame, room, setup_test_client,
    typing_frame, FakeApi, LOCAL_USER,
};

use std::time::{Duration, Instant};

use colloquy::sync::TypingTracker;

const PEER: u64 = 2;

/// Live envelopes merge idempotently and the list stays ascending by id,
/// regardless of delivery order and replays.
#[tokio::test]
async fn test_live_merge_is_ordered_and_deduplicated() {
    let api = FakeApi::new();
    let (client, _notices) = setup_test_client(api);

    client.activate_room(7).await.expect("initial load");

    for id in [3u64, 1, 2, 2, 3] {
        client.ingest_frame(&message_frame(&message(id, 7, PEER))).await;
    }

    let ids: Vec<u64> = client.messages().await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![1, 2, 3], "expected ascending, duplicate-free ids");
}

/// A replayed history page after a reconnect cannot duplicate messages
/// already live-appended.
#[tokio::test]
async fn test_reconnect_replay_does_not_duplicate() {
    let api = FakeApi::new();
    api.set_page(7, 1, newest_first(&[12, 11, 10], 7, PEER)).await;
    let (client, _notices) = setup_test_client(api);

    client.activate_room(7).await.expect("initial load");
    // The same messages arrive again as live frames
    for id in [10u64, 11, 12] {
        client.ingest_frame(&message_frame(&message(id, 7, PEER))).await;
    }

    let ids: Vec<u64> = client.messages().await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![10, 11, 12]);
}

/// An envelope for an inactive room leaves the active timeline alone and
/// bumps the inactive room's unread count; the active room stays at zero.
#[tokio::test]
async fn test_unread_counts_follow_active_room() {
    let api = FakeApi::new();
    api.set_rooms(vec![room(1, "general", &[LOCAL_USER, PEER]), room(2, "random", &[LOCAL_USER, PEER])])
        .await;
    let (client, _notices) = setup_test_client(api);

    client.load_rooms().await.expect("room list");
    client.activate_room(1).await.expect("open room 1");

    client.ingest_frame(&message_frame(&message(50, 2, PEER))).await;

    assert!(client.messages().await.is_empty(), "room 1's list must be unchanged");
    assert_eq!(client.unread_count(2).await, 1);
    assert_eq!(client.unread_count(1).await, 0);

    // A message for the active room never counts as unread
    client.ingest_frame(&message_frame(&message(51, 1, PEER))).await;
    assert_eq!(client.unread_count(1).await, 0);
    assert_eq!(client.messages().await.len(), 1);

    // Our own echo into an inactive room does not count either
    client
        .ingest_frame(&message_frame(&message(52, 2, LOCAL_USER)))
        .await;
    assert_eq!(client.unread_count(2).await, 1);
}

/// Applying the same read receipt twice yields the same state as applying
/// it once.
#[tokio::test]
async fn test_read_receipt_is_idempotent() {
    let api = FakeApi::new();
    api.set_page(7, 1, newest_first(&[3, 2, 1], 7, PEER)).await;
    let (client, _notices) = setup_test_client(api);
    client.activate_room(7).await.expect("initial load");

    let receipt = read_receipt_frame(7, 2, 9);
    client.ingest_frame(&receipt).await;
    let after_once: Vec<Vec<u64>> = client.messages().await.iter().map(|m| m.read_by.clone()).collect();

    client.ingest_frame(&receipt).await;
    let after_twice: Vec<Vec<u64>> = client.messages().await.iter().map(|m| m.read_by.clone()).collect();

    assert_eq!(after_once, after_twice);
    let messages = client.messages().await;
    assert!(messages[0].read_by_user(9), "message 1 is at or below the marker");
    assert!(messages[1].read_by_user(9), "message 2 is the marker");
    assert!(!messages[2].read_by_user(9), "message 3 is above the marker");
}

/// 20 messages loaded with more available; the next page returns 15, so
/// the final list holds 35 and history is exhausted.
#[tokio::test]
async fn test_backward_pagination_prepends_and_exhausts() {
    let api = FakeApi::new();
    let page1: Vec<u64> = (21..=40).rev().collect();
    let page2: Vec<u64> = (6..=20).rev().collect();
    api.set_page(7, 1, newest_first(&page1, 7, PEER)).await;
    api.set_page(7, 2, newest_first(&page2, 7, PEER)).await;
    let (client, _notices) = setup_test_client(api);

    client.activate_room(7).await.expect("initial load");
    assert_eq!(client.messages().await.len(), 20);
    assert!(client.has_more_history().await);

    let prepended = client
        .load_older()
        .await
        .expect("pagination fetch")
        .expect("a page should be prepended");
    assert_eq!(prepended.added, 15);
    assert_eq!(prepended.anchor, Some(21), "anchor is the previously-first id");

    let ids: Vec<u64> = client.messages().await.iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 35);
    assert_eq!(ids, (6..=40).collect::<Vec<u64>>());
    assert!(!client.has_more_history().await, "a short page exhausts history");
}

/// A failed pagination fetch leaves the list and has_more untouched, and
/// scrolling again retries.
#[tokio::test]
async fn test_pagination_failure_leaves_state_and_allows_retry() {
    let api = FakeApi::new();
    api.set_page(7, 1, newest_first(&(21..=40).rev().collect::<Vec<u64>>(), 7, PEER))
        .await;
    api.set_page(7, 2, newest_first(&(1..=20).rev().collect::<Vec<u64>>(), 7, PEER))
        .await;
    let (client, mut notices) = setup_test_client(api.clone());

    client.activate_room(7).await.expect("initial load");

    api.set_failing(true).await;
    assert!(client.load_older().await.is_err());
    assert_eq!(client.messages().await.len(), 20, "list must be untouched");
    assert!(client.has_more_history().await, "has_more must be untouched");
    let notice = notices.recv().await.expect("a fetch-failed notice");
    assert!(matches!(notice, colloquy::Notice::FetchFailed { room_id: 7 }));

    // Manual retry succeeds once the network recovers
    api.set_failing(false).await;
    let prepended = client
        .load_older()
        .await
        .expect("retry fetch")
        .expect("page prepended");
    assert_eq!(prepended.added, 20);
    assert_eq!(client.messages().await.len(), 40);
}

/// Only one backward fetch may be in flight per room.
#[tokio::test]
async fn test_concurrent_pagination_is_guarded() {
    let api = FakeApi::new();
    api.set_page(7, 1, newest_first(&(21..=40).rev().collect::<Vec<u64>>(), 7, PEER))
        .await;
    api.set_page(7, 2, newest_first(&(1..=20).rev().collect::<Vec<u64>>(), 7, PEER))
        .await;
    let (client, _notices) = setup_test_client(api.clone());
    client.activate_room(7).await.expect("initial load");

    api.set_delay(7, Duration::from_millis(100)).await;
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.load_older().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second trigger while the first is outstanding: nothing to do
    let second = client.load_older().await.expect("guarded call succeeds");
    assert!(second.is_none(), "second fetch must be suppressed");

    let first = slow.await.expect("join").expect("fetch");
    assert_eq!(first.map(|p| p.added), Some(20));
}

/// Switching rooms while a slow fetch is outstanding: the late response
/// for the previous room must be discarded, not applied.
#[tokio::test]
async fn test_late_response_for_previous_room_is_discarded() {
    let api = FakeApi::new();
    api.set_page(1, 1, newest_first(&[103, 102, 101], 1, PEER)).await;
    api.set_page(2, 1, newest_first(&[203, 202, 201], 2, PEER)).await;
    api.set_delay(1, Duration::from_millis(120)).await;
    let (client, _notices) = setup_test_client(api);

    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.activate_room(1).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.activate_room(2).await.expect("open room 2");
    let _ = slow.await.expect("join");

    assert_eq!(client.active_room().await, Some(2));
    let ids: Vec<u64> = client.messages().await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![201, 202, 203], "room 2's list must not be corrupted");

    // Going back to room 1 runs a fresh load and works normally
    client.activate_room(1).await.expect("reopen room 1");
    let ids: Vec<u64> = client.messages().await.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![101, 102, 103]);
}

/// Re-activating the already-active room (compared by id) does not reload.
#[tokio::test]
async fn test_reactivating_same_room_is_noop() {
    let api = FakeApi::new();
    api.set_page(7, 1, newest_first(&[2, 1], 7, PEER)).await;
    let (client, _notices) = setup_test_client(api.clone());

    client.activate_room(7).await.expect("initial load");
    client.ingest_frame(&message_frame(&message(3, 7, PEER))).await;
    assert_eq!(client.messages().await.len(), 3);

    // Same id again: the live-appended message must survive
    client.activate_room(7).await.expect("no-op activation");
    assert_eq!(client.messages().await.len(), 3);
}

/// Peer messages that become visible are batched to the mark-as-read
/// endpoint; our own messages are not.
#[tokio::test]
async fn test_visible_peer_messages_are_marked_read() {
    let api = FakeApi::new();
    let mut page = vec![message(3, 7, PEER), message(2, 7, LOCAL_USER), message(1, 7, PEER)];
    // message 1 was already read by us on another device
    page[2].read_by.push(LOCAL_USER);
    api.set_page(7, 1, page).await;
    let (client, _notices) = setup_test_client(api.clone());

    client.activate_room(7).await.expect("initial load");

    let batches = api.read_batches().await;
    assert_eq!(batches, vec![vec![3u64]], "only the unread peer message is batched");

    // A live peer message triggers another batch
    client.ingest_frame(&message_frame(&message(4, 7, PEER))).await;
    let batches = api.read_batches().await;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1], vec![4]);

    // Everything is now locally read; no further batch is due
    client.ingest_frame(&message_frame(&message(4, 7, PEER))).await;
    assert_eq!(api.read_batches().await.len(), 2, "duplicate frame must not re-batch");
}

/// Appends while scrolled up land on the new-messages badge instead of
/// auto-scrolling; jumping to the bottom clears it.
#[tokio::test]
async fn test_new_message_badge_when_scrolled_up() {
    let api = FakeApi::new();
    let (client, _notices) = setup_test_client(api);
    client.activate_room(7).await.expect("initial load");

    client.set_viewport(false).await;
    client.ingest_frame(&message_frame(&message(1, 7, PEER))).await;
    client.ingest_frame(&message_frame(&message(2, 7, PEER))).await;
    assert_eq!(client.unseen_count().await, 2);

    client.jump_to_bottom().await;
    assert_eq!(client.unseen_count().await, 0);

    // At the bottom, appends auto-scroll and the badge stays clear
    client.ingest_frame(&message_frame(&message(3, 7, PEER))).await;
    assert_eq!(client.unseen_count().await, 0);
}

/// Typing frames toggle per-room typing state, and entries expire on
/// their own when a peer goes silent.
#[tokio::test]
async fn test_typing_indicators_toggle_and_expire() {
    let api = FakeApi::new();
    let (client, _notices) = setup_test_client(api);
    client.activate_room(7).await.expect("initial load");

    client.ingest_frame(&typing_frame(7, PEER, true)).await;
    assert_eq!(client.typing_in(7).await, vec![PEER]);

    client.ingest_frame(&typing_frame(7, PEER, false)).await;
    assert!(client.typing_in(7).await.is_empty());

    // Expiry without an explicit stop frame, on a compressed clock
    let mut tracker = TypingTracker::with_ttl(Duration::from_millis(10));
    let start = Instant::now();
    tracker.observe(7, PEER, true, start);
    assert_eq!(tracker.typing_in(7, start), vec![PEER]);
    assert!(tracker
        .typing_in(7, start + Duration::from_millis(11))
        .is_empty());
}

/// Status frames keep the presence map current.
#[tokio::test]
async fn test_user_status_updates_presence() {
    let api = FakeApi::new();
    let (client, _notices) = setup_test_client(api);

    assert_eq!(client.presence(PEER).await, None);
    client
        .ingest_frame(r#"{"type":"user_status_change","data":{"user_id":2,"status":"online"}}"#)
        .await;
    assert_eq!(client.presence(PEER).await, Some(colloquy::UserStatus::Online));
    client
        .ingest_frame(r#"{"type":"user_status_change","data":{"user_id":2,"status":"offline"}}"#)
        .await;
    assert_eq!(client.presence(PEER).await, Some(colloquy::UserStatus::Offline));
}

/// A server-pushed room shows up in the room list.
#[tokio::test]
async fn test_room_created_push_upserts() {
    let api = FakeApi::new();
    let (client, _notices) = setup_test_client(api);

    let pushed = room(9, "new room", &[LOCAL_USER, PEER]);
    let frame = serde_json::json!({
        "type": "room_created",
        "data": { "room": pushed },
    })
    .to_string();
    client.ingest_frame(&frame).await;
    client.ingest_frame(&frame).await; // re-announce must not duplicate

    let rooms = client.rooms().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, 9);
}
