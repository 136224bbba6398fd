//! Tests for inbound routing through the connection
//!
//! These tests verify:
//! - Inbound messages reach type subscribers and global subscribers
//! - Authentication messages are consumed by the connection, never forwarded
//! - Malformed frames are dropped without disturbing the connection
//! - A panicking handler is reported and does not starve the others

use crate::common::*;
use circle_link::{CircleLinkError, ConnectionState, EventHandlers, Message};
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Typed and global subscribers both see a pushed message
#[tokio::test]
async fn test_inbound_messages_reach_subscribers() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let manager = fast_builder(&server.base_url()).token("tok").build().unwrap();

    let meetings = Arc::new(Mutex::new(Vec::<JsonValue>::new()));
    let meetings_clone = meetings.clone();
    let _typed = manager.subscribe("meeting_updated", move |msg: &Message| {
        meetings_clone.lock().push(msg.payload().clone());
    });
    let all = Arc::new(AtomicUsize::new(0));
    let all_clone = all.clone();
    let _global = manager.subscribe_to_all(move |_: &Message| {
        all_clone.fetch_add(1, Ordering::SeqCst);
    });

    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    server.push("meeting_updated", json!({ "id": "m-1" }));
    server.push("presence_changed", json!({ "user": "u-9" }));
    wait_until(Duration::from_secs(5), || all.load(Ordering::SeqCst) == 2).await;

    assert_eq!(*meetings.lock(), vec![json!({ "id": "m-1" })]);
    manager.shutdown().await;
}

/// Handshake messages never reach subscribers
#[tokio::test]
async fn test_auth_messages_are_not_forwarded() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let manager = fast_builder(&server.base_url()).token("tok").build().unwrap();

    let (_handle, mut rx) = manager.dispatcher().subscribe_all_channel();
    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    server.push("authentication_success", JsonValue::Null);
    server.push("chat_message", json!({ "text": "hi" }));

    let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind(), "chat_message");
    settle(100).await;
    assert!(rx.try_recv().is_err());
    manager.shutdown().await;
}

/// Garbage frames are logged and dropped; the socket stays up
#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let manager = fast_builder(&server.base_url()).token("tok").build().unwrap();

    let (_handle, mut rx) = manager.dispatcher().subscribe_all_channel();
    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    server.push_raw("not json");
    server.push_raw(r#"{"payload": 1}"#);
    server.push_raw(r#"{"type": "", "payload": 1}"#);
    server.push("valid", json!(1));

    let msg = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.kind(), "valid");
    assert_eq!(manager.state(), ConnectionState::Authenticated);
    assert_eq!(server.handshakes(), 1);
    manager.shutdown().await;
}

/// Unsubscribed handlers see nothing further
#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let manager = fast_builder(&server.base_url()).token("tok").build().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let handle = manager.subscribe("tick", move |_: &Message| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
    });
    let (_tick, mut tick_rx) = manager.dispatcher().subscribe_channel("tick");

    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    server.push("tick", json!(1));
    tokio::time::timeout(Duration::from_secs(5), tick_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    handle.unsubscribe();
    server.push("tick", json!(2));
    tokio::time::timeout(Duration::from_secs(5), tick_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(manager.dispatcher().subscriber_count("tick"), 1);
    manager.shutdown().await;
}

/// A panicking handler surfaces as a handler error; the rest still run
#[tokio::test]
async fn test_panicking_handler_is_isolated() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = errors.clone();
    let manager = fast_builder(&server.base_url())
        .event_handlers(EventHandlers::new().on_error(move |e| errors_clone.lock().push(e.error)))
        .token("tok")
        .build()
        .unwrap();

    let _bad = manager.subscribe("alert", |_: &Message| panic!("handler bug"));
    let (_good, mut rx) = manager.dispatcher().subscribe_channel("alert");

    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;
    server.push("alert", json!({ "level": "high" }));

    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    wait_until(Duration::from_secs(5), || {
        errors
            .lock()
            .iter()
            .any(|e| matches!(e, CircleLinkError::HandlerError { kind, .. } if kind == "alert"))
    })
    .await;
    assert!(manager.is_connected());
    manager.shutdown().await;
}
