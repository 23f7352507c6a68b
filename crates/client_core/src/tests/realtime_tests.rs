use std::time::Duration;

use serde_json::json;
use shared::protocol::SenderRole;
use tokio::time::Instant;

use super::*;
use crate::test_support::{doc, drain, engine, history, server_ids, Call, FakeBackend};

fn open_c1() -> ThreadContext {
    ThreadContext::new("C1", "+91-9876543210")
}

fn new_message(content: &str) -> PushEvent {
    PushEvent {
        kind: PushEventKind::NewMessage,
        content: Some(content.into()),
        thread_id: None,
    }
}

#[test]
fn formatted_and_bare_numbers_match() {
    assert!(phones_match("+91-9876543210", "9876543210"));
    assert!(!phones_match("9876543210", "1234567890"));
    assert!(phones_match("(987) 654-3210", "919876543210"));
    assert!(!phones_match("", "9876543210"));
    assert!(!phones_match("+91", "9876543210"));
}

#[test]
fn normalize_strips_formatting_and_country_prefix() {
    assert_eq!(normalize_phone("+91 (987) 654-3210"), "9876543210");
    assert_eq!(normalize_phone("9876543210"), "9876543210");
    assert_eq!(normalize_phone(" - "), "");
}

#[test]
fn phone_token_is_the_first_long_digit_run() {
    assert_eq!(
        extract_phone_token("New message from 919876543210 at 10:45"),
        Some("919876543210")
    );
    assert_eq!(
        extract_phone_token("order 12345 from 9876543210 and 1112223334"),
        Some("9876543210")
    );
    assert_eq!(extract_phone_token("call 98765 43210"), None);
}

#[test]
fn classification_covers_each_event_shape() {
    let open = open_c1();

    assert_eq!(
        classify_event(&new_message("New message from 919876543210"), Some(&open)),
        MatchDecision::Resync(ThreadId::new("C1"))
    );
    assert_eq!(
        classify_event(&new_message("New message from 9123456789"), Some(&open)),
        MatchDecision::Drop(DropReason::PhoneMismatch)
    );
    assert_eq!(
        classify_event(&new_message("You have a new message"), Some(&open)),
        MatchDecision::Drop(DropReason::NoPhoneToken)
    );
    assert_eq!(
        classify_event(&new_message("New message from 919876543210"), None),
        MatchDecision::Drop(DropReason::NoOpenThread)
    );

    let explicit = PushEvent {
        kind: PushEventKind::MessageStatus,
        content: None,
        thread_id: Some(ThreadId::new("C1")),
    };
    assert_eq!(
        classify_event(&explicit, Some(&open)),
        MatchDecision::Resync(ThreadId::new("C1"))
    );
    let other = PushEvent {
        thread_id: Some(ThreadId::new("C2")),
        ..explicit
    };
    assert_eq!(
        classify_event(&other, Some(&open)),
        MatchDecision::Drop(DropReason::OtherThread)
    );

    let broadcast = PushEvent {
        kind: PushEventKind::Broadcast,
        content: Some("919876543210".into()),
        thread_id: Some(ThreadId::new("C1")),
    };
    assert_eq!(
        classify_event(&broadcast, Some(&open)),
        MatchDecision::Drop(DropReason::Unrelated)
    );
    let status_without_id = PushEvent {
        kind: PushEventKind::MessageStatus,
        content: Some("919876543210".into()),
        thread_id: None,
    };
    assert_eq!(
        classify_event(&status_without_id, Some(&open)),
        MatchDecision::Drop(DropReason::Unrelated)
    );
}

#[tokio::test(start_paused = true)]
async fn burst_of_matching_events_triggers_one_resync() {
    let backend = FakeBackend::with_history("C1", history(5));
    let engine = engine(backend.clone());
    engine.select_thread(open_c1()).await.expect("initial load");
    let start = Instant::now();

    for _ in 0..3 {
        let decision = engine
            .on_raw_event(&json!({ "type": "new_message", "content": "Message from 919876543210" }))
            .await
            .expect("matches");
        assert_eq!(decision, MatchDecision::Resync(ThreadId::new("C1")));
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    let fetches = backend.fetches();
    assert_eq!(fetches.len(), 2, "initial load plus exactly one resync");
    let (fired_at, page) = fetches[1];
    assert_eq!(page, 1);
    let elapsed = fired_at - start;
    assert!(
        elapsed >= Duration::from_millis(690) && elapsed <= Duration::from_millis(710),
        "resync fired after {elapsed:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn resync_refetches_instead_of_reading_the_payload() {
    let backend = FakeBackend::with_history("C1", history(3));
    let engine = engine(backend.clone());
    engine.select_thread(open_c1()).await.expect("initial load");

    backend.push_message("C1", doc("m4", SenderRole::Customer, "are you there?", 4));
    engine
        .on_raw_event(&json!({ "type": "new_message", "customerId": "C1", "content": "garbled" }))
        .await
        .expect("matches");
    assert_eq!(engine.transcript().await.len(), 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(server_ids(&engine.transcript().await), vec!["m1", "m2", "m3", "m4"]);
}

#[tokio::test(start_paused = true)]
async fn thread_switch_cancels_the_pending_resync() {
    let backend = FakeBackend::with_history("C1", history(3));
    backend.set_history("C2", history(2));
    let engine = engine(backend.clone());
    engine.select_thread(open_c1()).await.expect("initial load");

    engine
        .on_event(new_message("New message from 919876543210"))
        .await;
    engine
        .select_thread(ThreadContext::new("C2", "9123456789"))
        .await
        .expect("switch");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let fetched: Vec<ThreadId> = backend
        .calls()
        .into_iter()
        .filter_map(|(_, call)| match call {
            Call::Fetch { thread_id, .. } => Some(thread_id),
            _ => None,
        })
        .collect();
    assert_eq!(fetched, vec![ThreadId::new("C1"), ThreadId::new("C2")]);
}

#[tokio::test]
async fn unusable_events_are_silent_errors() {
    let engine = engine(FakeBackend::with_history("C1", history(1)));
    engine.select_thread(open_c1()).await.expect("initial load");

    let err = engine.on_raw_event(&json!(["not", "an", "object"])).await.unwrap_err();
    assert!(matches!(err, SyncError::AmbiguousEvent(DropReason::Malformed)));
    assert!(err.is_silent());

    let err = engine
        .on_raw_event(&json!({ "type": "new_message", "content": "hello" }))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AmbiguousEvent(DropReason::NoPhoneToken)));
    assert!(err.is_silent());
}

#[tokio::test(start_paused = true)]
async fn reconnect_resyncs_the_open_thread() {
    let backend = FakeBackend::with_history("C1", history(3));
    let engine = engine(backend.clone());
    engine.select_thread(open_c1()).await.expect("initial load");
    let mut events = engine.subscribe_events();

    engine.set_connected(true).await;
    engine.set_connected(true).await;
    assert!(engine.is_connected().await);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(backend.fetches().len(), 2);
    let connectivity: Vec<bool> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::Connectivity(connected) => Some(connected),
            _ => None,
        })
        .collect();
    assert_eq!(connectivity, vec![true]);

    engine.set_connected(false).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(backend.fetches().len(), 2);
}

#[tokio::test]
async fn schedule_resync_without_open_thread_is_a_no_op() {
    let engine = engine(FakeBackend::new());
    assert!(!engine.schedule_resync().await);
}
