//! Tests for hard-failure accounting
//!
//! These tests verify:
//! - Connect and auth timeouts count as hard failures
//! - An unanswered keepalive ping counts as a hard failure
//! - Three consecutive failures end in `PermanentlyFailed` with one notice
//! - `retry_connection()` is the only way out and wipes the history
//! - An authentication rejection is never retried
//! - Without a token, persisted failures stay silent
//! - Counters in a `FileFailureStore` outlive the manager that wrote them

use crate::common::*;
use circle_link::{
    CircleLinkError, CircleLinkTimeouts, ConnectionOptions, ConnectionState, ConnectivityNotice,
    EventHandlers, FailureCounters, FailureStore, FileFailureStore, MemoryFailureStore,
    ReconnectPolicy, StaticSession,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

/// A transport that never opens trips the connect deadline once
#[tokio::test]
async fn test_connect_timeout_counts_failure_and_schedules_retry() {
    init_logging();
    let (base_url, _stall) = stalled_server().await;
    let store = Arc::new(MemoryFailureStore::new());
    let manager = fast_builder(&base_url)
        .connection_options(ConnectionOptions::default().with_reconnect_policy(
            ReconnectPolicy::Exponential {
                base_delay_ms: 5_000,
                max_delay_ms: 30_000,
                max_attempts: 5,
            },
        ))
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    wait_for_state(&manager, ConnectionState::Connecting).await;

    assert_eq!(
        next_notice(&mut notices).await,
        ConnectivityNotice::Reconnecting {
            attempt: 0,
            delay: Duration::from_millis(5_000),
        }
    );
    assert_eq!(
        store.load().unwrap(),
        FailureCounters {
            consecutive_failures: 1,
            reconnect_attempts: 1,
        }
    );
    assert_eq!(manager.state(), ConnectionState::Idle);

    manager.shutdown().await;
}

/// No authentication reply within the deadline is a hard failure
#[tokio::test]
async fn test_auth_timeout_is_a_hard_failure() {
    init_logging();
    let server = MockServer::start(AuthReply::Silent).await;
    let store = Arc::new(MemoryFailureStore::new());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = errors.clone();
    let manager = fast_builder(&server.base_url())
        .connection_options(ConnectionOptions::default().with_auto_reconnect(false))
        .event_handlers(EventHandlers::new().on_error(move |e| errors_clone.lock().push(e.error)))
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();

    manager.connect();
    wait_for_state(&manager, ConnectionState::AwaitingAuth).await;
    wait_until(Duration::from_secs(5), || {
        store.load().map(|c| c.consecutive_failures == 1).unwrap_or(false)
    })
    .await;
    wait_for_state(&manager, ConnectionState::Idle).await;
    wait_until(Duration::from_secs(5), || server.open_connections() == 0).await;
    settle(200).await;

    assert_eq!(server.handshakes(), 1);
    assert!(errors
        .lock()
        .iter()
        .any(|e| matches!(e, CircleLinkError::ConnectTimeout(_))));
    manager.shutdown().await;
}

/// A server that stops answering pings is dropped and reconnected
#[tokio::test]
async fn test_pong_timeout_is_a_hard_failure() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    server.set_deaf(true);
    let store = Arc::new(MemoryFailureStore::new());
    let errors = Arc::new(Mutex::new(Vec::new()));
    let errors_clone = errors.clone();
    let manager = fast_builder(&server.base_url())
        .timeouts(
            CircleLinkTimeouts::builder()
                .connection_timeout(Duration::from_millis(300))
                .auth_timeout(Duration::from_millis(300))
                .send_timeout(Duration::from_secs(1))
                .keepalive_interval(Duration::from_millis(100))
                .pong_timeout(Duration::from_millis(150))
                .build(),
        )
        .connection_options(ConnectionOptions::default().with_reconnect_policy(
            ReconnectPolicy::Fixed {
                delay_ms: 5_000,
                max_attempts: 3,
            },
        ))
        .event_handlers(EventHandlers::new().on_error(move |e| errors_clone.lock().push(e.error)))
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    assert_eq!(
        next_notice(&mut notices).await,
        ConnectivityNotice::Reconnecting {
            attempt: 0,
            delay: Duration::from_millis(5_000),
        }
    );
    assert_eq!(
        store.load().unwrap(),
        FailureCounters {
            consecutive_failures: 1,
            reconnect_attempts: 1,
        }
    );
    assert_eq!(manager.state(), ConnectionState::Idle);
    assert!(errors
        .lock()
        .iter()
        .any(|e| matches!(e, CircleLinkError::AbnormalClose { code: 1006, .. })));
    assert_eq!(server.handshakes(), 1);

    manager.shutdown().await;
}

/// Third consecutive failure gives up and says so exactly once
#[tokio::test]
async fn test_refused_connections_reach_permanent_failure() {
    init_logging();
    let base_url = refused_base_url().await;
    let store = Arc::new(MemoryFailureStore::new());
    let manager = fast_builder(&base_url)
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    wait_for_state(&manager, ConnectionState::PermanentlyFailed).await;

    assert!(matches!(
        next_notice(&mut notices).await,
        ConnectivityNotice::Reconnecting { attempt: 0, .. }
    ));
    assert!(matches!(
        next_notice(&mut notices).await,
        ConnectivityNotice::Unavailable { .. }
    ));
    assert_eq!(
        store.load().unwrap(),
        FailureCounters {
            consecutive_failures: 3,
            reconnect_attempts: 2,
        }
    );

    // Further connect() calls are refused silently.
    manager.connect();
    manager.connect();
    settle(200).await;
    assert_eq!(manager.state(), ConnectionState::PermanentlyFailed);
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));

    manager.shutdown().await;
}

/// Persisted failures block connect until a manual retry
#[tokio::test]
async fn test_retry_connection_lifts_permanent_failure() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let store = Arc::new(MemoryFailureStore::with_counters(FailureCounters {
        consecutive_failures: 3,
        reconnect_attempts: 2,
    }));
    let manager = fast_builder(&server.base_url())
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    wait_for_state(&manager, ConnectionState::PermanentlyFailed).await;
    assert!(matches!(
        next_notice(&mut notices).await,
        ConnectivityNotice::Unavailable { .. }
    ));
    assert_eq!(server.handshakes(), 0);

    manager.retry_connection();
    wait_for_state(&manager, ConnectionState::Authenticated).await;

    assert_eq!(server.handshakes(), 1);
    assert!(store.load().unwrap().is_clear());
    manager.shutdown().await;
}

/// Without a token there is nothing to fail, whatever the stored history says
#[tokio::test]
async fn test_anonymous_connect_ignores_persisted_failures() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let store = Arc::new(MemoryFailureStore::with_counters(FailureCounters {
        consecutive_failures: 3,
        reconnect_attempts: 2,
    }));
    let manager = fast_builder(&server.base_url())
        .session(StaticSession::anonymous())
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    settle(150).await;

    assert_eq!(manager.state(), ConnectionState::Idle);
    assert!(matches!(notices.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(server.handshakes(), 0);
    assert_eq!(store.load().unwrap().consecutive_failures, 3);
    manager.shutdown().await;
}

/// A rejected token stays rejected until the caller retries
#[tokio::test]
async fn test_auth_error_is_not_retried() {
    init_logging();
    let server = MockServer::start(AuthReply::Error("token expired".into())).await;
    let store = Arc::new(MemoryFailureStore::new());
    let manager = fast_builder(&server.base_url())
        .token("tok")
        .failure_store_arc(store.clone())
        .build()
        .unwrap();
    let mut notices = manager.notices();

    manager.connect();
    assert_eq!(
        next_notice(&mut notices).await,
        ConnectivityNotice::AuthRejected {
            reason: "token expired".into()
        }
    );
    wait_for_state(&manager, ConnectionState::Idle).await;
    settle(300).await;

    assert_eq!(server.handshakes(), 1);
    assert!(store.load().unwrap().is_clear());

    server.set_auth(AuthReply::Success);
    manager.retry_connection();
    wait_for_state(&manager, ConnectionState::Authenticated).await;
    assert_eq!(server.handshakes(), 2);

    manager.shutdown().await;
}

/// With auto-reconnect off a failure leaves the manager idle
#[tokio::test]
async fn test_auto_reconnect_disabled_stays_idle() {
    init_logging();
    let server = MockServer::start(AuthReply::Success).await;
    let manager = fast_builder(&server.base_url())
        .connection_options(ConnectionOptions::default().with_auto_reconnect(false))
        .token("tok")
        .build()
        .unwrap();

    manager.connect();
    wait_for_state(&manager, ConnectionState::Authenticated).await;
    server.close_all(1011);
    wait_for_state(&manager, ConnectionState::Idle).await;
    settle(300).await;

    assert_eq!(server.handshakes(), 1);
    assert_eq!(manager.failure_counters().unwrap().consecutive_failures, 1);
    manager.shutdown().await;
}

/// Counters written by one manager gate the next one
#[ntest::timeout(20000)]
#[test]
fn test_failure_counters_persist_across_managers() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        init_logging();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("failures.toml");

        let refused = refused_base_url().await;
        let first = fast_builder(&refused)
            .token("tok")
            .failure_store(FileFailureStore::with_path(&path).unwrap())
            .build()
            .unwrap();
        first.connect();
        wait_for_state(&first, ConnectionState::PermanentlyFailed).await;
        first.shutdown().await;
        drop(first);

        let reopened = FileFailureStore::with_path(&path).unwrap();
        assert_eq!(reopened.load().unwrap().consecutive_failures, 3);

        let server = MockServer::start(AuthReply::Success).await;
        let second = fast_builder(&server.base_url())
            .token("tok")
            .failure_store(FileFailureStore::with_path(&path).unwrap())
            .build()
            .unwrap();
        second.connect();
        wait_for_state(&second, ConnectionState::PermanentlyFailed).await;
        assert_eq!(server.handshakes(), 0);

        second.retry_connection();
        wait_for_state(&second, ConnectionState::Authenticated).await;
        let after_retry = FileFailureStore::with_path(&path).unwrap();
        assert!(after_retry.load().unwrap().is_clear());

        second.shutdown().await;
    });
}
