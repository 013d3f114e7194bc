// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Connection lifecycle tests: keepalive, server-initiated disconnects,
//! automatic reconnection with re-authentication, and attempt exhaustion.
//!
//! A server-initiated close must lead to a fresh connection that runs the
//! full authentication handshake again before any further send is
//! trusted -- verified end-to-end by delivering a message after the
//! reconnect.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use huddle::channel::loopback::{LoopbackConnector, loopback_pair};
use huddle::channel::ws::WsConnector;
use huddle::link::{Credentials, LinkState};
use huddle::session::{EndReason, SessionCommand, SessionConfig, SessionEvent, spawn_session};
use huddle::thread::Delivery;
use huddle_proto::frame::ClientFrame;
use huddle_proto::ident::UserId;
use huddle_router::router::{RouterState, start_server_with_state};

async fn start_router() -> (String, Arc<RouterState>) {
    let state = Arc::new(RouterState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start router");
    (format!("ws://{addr}/ws"), state)
}

fn fast_reconnect_config(user: &str) -> SessionConfig {
    let mut config = SessionConfig::new(Credentials {
        user_id: UserId::new(user),
        token: "test-token".into(),
    });
    config.link.connect_timeout = Duration::from_secs(5);
    config.link.auth_timeout = Duration::from_secs(5);
    config.link.reconnect.initial_delay = Duration::from_millis(100);
    config.link.reconnect.max_delay = Duration::from_secs(2);
    config.link.reconnect.max_attempts = 5;
    config
}

async fn wait_for<F>(rx: &mut mpsc::Receiver<SessionEvent>, description: &str, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(evt)) if pred(&evt) => return evt,
            Ok(Some(_other)) => {}
            Ok(None) => panic!("event channel closed while waiting for {description}"),
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

#[tokio::test]
async fn server_close_triggers_reconnect_and_reauth() {
    let (url, state) = start_router().await;

    let connector = WsConnector::new(url.clone(), Duration::from_secs(5));
    let (alice_cmd, mut alice_evt) = spawn_session(connector, fast_reconnect_config("alice"))
        .await
        .unwrap();

    wait_for(&mut alice_evt, "Ready", |e| {
        matches!(
            e,
            SessionEvent::LinkChanged {
                state: LinkState::Ready,
            }
        )
    })
    .await;
    assert_eq!(state.sessions.connection_count("alice").await, 1);

    // Server-initiated disconnect.
    state.sessions.close_all_connections().await;

    wait_for(&mut alice_evt, "Reconnecting", |e| {
        matches!(e, SessionEvent::Reconnecting { attempt: 1, .. })
    })
    .await;
    wait_for(&mut alice_evt, "Ready after reconnect", |e| {
        matches!(
            e,
            SessionEvent::LinkChanged {
                state: LinkState::Ready,
            }
        )
    })
    .await;

    // The fresh connection re-ran the handshake: it is registered again,
    // and a send is accepted end-to-end.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.sessions.connection_count("alice").await == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "reconnected session never re-registered"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "back online".into(),
        })
        .await
        .unwrap();
    wait_for(&mut alice_evt, "DeliveryUpdated(Confirmed)", |e| {
        matches!(
            e,
            SessionEvent::DeliveryUpdated {
                delivery: Delivery::Confirmed,
                ..
            }
        )
    })
    .await;

    let conv = state.store.conversation("alice", "bob", 10).await;
    assert_eq!(conv.len(), 1);
    assert_eq!(conv[0].text, "back online");
}

#[tokio::test]
async fn exhausted_reconnects_end_the_session() {
    // A connector that only ever yields one channel: once the router end
    // drops, every reconnect attempt is refused.
    let connector = LoopbackConnector::new();
    let (chan, router) = loopback_pair(32);
    connector.push_channel(chan);

    let auth = tokio::spawn(async move {
        let _ = router.accept_auth().await;
        router
    });

    let mut config = fast_reconnect_config("alice");
    config.link.reconnect.initial_delay = Duration::from_millis(20);
    config.link.reconnect.max_attempts = 3;

    let (_cmd_tx, mut evt_rx) = spawn_session(connector, config).await.unwrap();
    let router = auth.await.unwrap();

    // Kill the transport.
    drop(router);

    // All three attempts are announced, then the session ends.
    for attempt in 1..=3 {
        wait_for(&mut evt_rx, "Reconnecting", |e| {
            matches!(e, SessionEvent::Reconnecting { attempt: a, .. } if *a == attempt)
        })
        .await;
    }
    let ended = wait_for(&mut evt_rx, "SessionEnded", |e| {
        matches!(e, SessionEvent::SessionEnded { .. })
    })
    .await;
    assert_eq!(
        ended,
        SessionEvent::SessionEnded {
            reason: EndReason::ReconnectsExhausted,
        }
    );
}

#[tokio::test]
async fn keepalive_pings_flow_while_ready() {
    let connector = LoopbackConnector::new();
    let (chan, router) = loopback_pair(32);
    connector.push_channel(chan);

    let auth = tokio::spawn(async move {
        let _ = router.accept_auth().await;
        router
    });

    let mut config = fast_reconnect_config("alice");
    config.link.keepalive_interval = Duration::from_millis(50);

    let (_cmd_tx, _evt_rx) = spawn_session(connector, config).await.unwrap();
    let router = auth.await.unwrap();

    // At least two pings arrive on the interval.
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(2), router.next_client())
            .await
            .expect("ping timed out");
        assert_eq!(frame, Some(ClientFrame::Ping));
    }
}

#[tokio::test]
async fn logout_during_normal_operation_is_clean() {
    let (url, state) = start_router().await;

    let connector = WsConnector::new(url, Duration::from_secs(5));
    let (cmd_tx, mut evt_rx) = spawn_session(connector, fast_reconnect_config("alice"))
        .await
        .unwrap();

    wait_for(&mut evt_rx, "Ready", |e| {
        matches!(
            e,
            SessionEvent::LinkChanged {
                state: LinkState::Ready,
            }
        )
    })
    .await;

    cmd_tx.send(SessionCommand::Logout).await.unwrap();

    let ended = wait_for(&mut evt_rx, "SessionEnded", |e| {
        matches!(e, SessionEvent::SessionEnded { .. })
    })
    .await;
    assert_eq!(
        ended,
        SessionEvent::SessionEnded {
            reason: EndReason::Logout,
        }
    );

    // The router eventually notices the closed connection.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.sessions.connection_count("alice").await > 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "router never unregistered the logged-out session"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
