// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Full-stack send/receive tests: two client sessions talking through a
//! real in-process router over WebSocket.
//!
//! Covers the happy path of the delivery protocol: optimistic insert,
//! acknowledgment within the deadline, confirmation of the optimistic
//! copy, and push delivery to the recipient.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use huddle::channel::ws::WsConnector;
use huddle::link::Credentials;
use huddle::session::{SessionCommand, SessionEvent, spawn_session};
use huddle::thread::Delivery;
use huddle_proto::ident::UserId;
use huddle_router::router::{RouterState, start_server_with_state};

async fn start_router() -> (String, Arc<RouterState>) {
    let state = Arc::new(RouterState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start router");
    (format!("ws://{addr}/ws"), state)
}

fn fast_config(user: &str) -> huddle::session::SessionConfig {
    let mut config = huddle::session::SessionConfig::new(Credentials {
        user_id: UserId::new(user),
        token: "test-token".into(),
    });
    config.link.connect_timeout = Duration::from_secs(5);
    config.link.auth_timeout = Duration::from_secs(5);
    config.delivery_timeout = Duration::from_secs(5);
    config
}

async fn connect_user(
    url: &str,
    user: &str,
) -> (
    mpsc::Sender<SessionCommand>,
    mpsc::Receiver<SessionEvent>,
) {
    let connector = WsConnector::new(url.to_string(), Duration::from_secs(5));
    spawn_session(connector, fast_config(user))
        .await
        .unwrap_or_else(|e| panic!("session for {user} failed to connect: {e}"))
}

/// Wait for an event matching the predicate, skipping others.
async fn wait_for<F>(rx: &mut mpsc::Receiver<SessionEvent>, description: &str, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
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
async fn send_is_confirmed_and_delivered() {
    let (url, _state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (_bob_cmd, mut bob_evt) = connect_user(&url, "bob").await;

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "hi".into(),
        })
        .await
        .unwrap();

    // Alice sees the optimistic copy immediately.
    let sent = wait_for(&mut alice_evt, "MessageSent", |e| {
        matches!(e, SessionEvent::MessageSent { .. })
    })
    .await;
    let SessionEvent::MessageSent { ref_id, peer, .. } = sent else {
        unreachable!()
    };
    assert_eq!(peer, UserId::new("bob"));

    // The send converges to confirmed (via ack or echo, whichever wins).
    let updated = wait_for(&mut alice_evt, "DeliveryUpdated", |e| {
        matches!(e, SessionEvent::DeliveryUpdated { .. })
    })
    .await;
    assert_eq!(
        updated,
        SessionEvent::DeliveryUpdated {
            ref_id,
            peer: UserId::new("bob"),
            delivery: Delivery::Confirmed,
        }
    );

    // Bob receives the push.
    let received = wait_for(&mut bob_evt, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    let SessionEvent::MessageReceived { peer, text, .. } = received else {
        unreachable!()
    };
    assert_eq!(peer, UserId::new("alice"));
    assert_eq!(text, "hi");
}

#[tokio::test]
async fn router_persists_what_it_acked() {
    let (url, state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (_bob_cmd, _bob_evt) = connect_user(&url, "bob").await;

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "durable".into(),
        })
        .await
        .unwrap();

    wait_for(&mut alice_evt, "DeliveryUpdated", |e| {
        matches!(
            e,
            SessionEvent::DeliveryUpdated {
                delivery: Delivery::Confirmed,
                ..
            }
        )
    })
    .await;

    // Confirmation implies the message is already persisted.
    let conv = state.store.conversation("alice", "bob", 10).await;
    assert_eq!(conv.len(), 1);
    assert_eq!(conv[0].text, "durable");
}

#[tokio::test]
async fn several_messages_each_converge() {
    let (url, _state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (_bob_cmd, mut bob_evt) = connect_user(&url, "bob").await;

    for i in 0..3 {
        alice_cmd
            .send(SessionCommand::SendMessage {
                to: UserId::new("bob"),
                text: format!("msg {i}"),
            })
            .await
            .unwrap();
    }

    // Every send reaches a confirmed state.
    for _ in 0..3 {
        wait_for(&mut alice_evt, "DeliveryUpdated", |e| {
            matches!(
                e,
                SessionEvent::DeliveryUpdated {
                    delivery: Delivery::Confirmed,
                    ..
                }
            )
        })
        .await;
    }

    // Bob receives all three.
    let mut texts = Vec::new();
    for _ in 0..3 {
        let received = wait_for(&mut bob_evt, "MessageReceived", |e| {
            matches!(e, SessionEvent::MessageReceived { .. })
        })
        .await;
        let SessionEvent::MessageReceived { text, .. } = received else {
            unreachable!()
        };
        texts.push(text);
    }
    texts.sort();
    assert_eq!(texts, vec!["msg 0", "msg 1", "msg 2"]);
}

#[tokio::test]
async fn bidirectional_conversation() {
    let (url, _state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (bob_cmd, mut bob_evt) = connect_user(&url, "bob").await;

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "from alice".into(),
        })
        .await
        .unwrap();
    let received = wait_for(&mut bob_evt, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    let SessionEvent::MessageReceived { text, .. } = received else {
        unreachable!()
    };
    assert_eq!(text, "from alice");

    bob_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("alice"),
            text: "from bob".into(),
        })
        .await
        .unwrap();
    let received = wait_for(&mut alice_evt, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    let SessionEvent::MessageReceived { text, peer, .. } = received else {
        unreachable!()
    };
    assert_eq!(text, "from bob");
    assert_eq!(peer, UserId::new("bob"));
}
