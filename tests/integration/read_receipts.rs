// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Read-receipt flow: opening a thread marks its messages read, the
//! router relays the read state to the original sender, and messages
//! arriving while the thread is open are marked read on arrival.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use huddle::channel::loopback::{LoopbackConnector, loopback_pair};
use huddle::channel::ws::WsConnector;
use huddle::link::Credentials;
use huddle::session::{SessionCommand, SessionConfig, SessionEvent, spawn_session};
use huddle::thread::{Delivery, ThreadMessage};
use huddle_proto::frame::ClientFrame;
use huddle_proto::ident::{MessageId, Timestamp, UserId};
use huddle_router::router::{RouterState, start_server_with_state};

async fn start_router() -> (String, Arc<RouterState>) {
    let state = Arc::new(RouterState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start router");
    (format!("ws://{addr}/ws"), state)
}

fn session_config(user: &str) -> SessionConfig {
    let mut config = SessionConfig::new(Credentials {
        user_id: UserId::new(user),
        token: "test-token".into(),
    });
    config.link.connect_timeout = Duration::from_secs(5);
    config.link.auth_timeout = Duration::from_secs(5);
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
    spawn_session(connector, session_config(user))
        .await
        .unwrap_or_else(|e| panic!("session for {user} failed to connect: {e}"))
}

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
async fn opening_a_thread_relays_read_state_to_the_sender() {
    let (url, state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (bob_cmd, mut bob_evt) = connect_user(&url, "bob").await;

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "read me".into(),
        })
        .await
        .unwrap();

    wait_for(&mut bob_evt, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;

    // Bob opens the conversation with alice.
    bob_cmd
        .send(SessionCommand::OpenThread {
            peer: Some(UserId::new("alice")),
        })
        .await
        .unwrap();

    // Alice learns her messages were read.
    let read = wait_for(&mut alice_evt, "PeerReadMessages", |e| {
        matches!(e, SessionEvent::PeerReadMessages { .. })
    })
    .await;
    assert_eq!(
        read,
        SessionEvent::PeerReadMessages {
            by: UserId::new("bob"),
        }
    );

    // The store records the flag.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let conv = state.store.conversation("alice", "bob", 10).await;
        if conv.first().is_some_and(|m| m.read) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "store never recorded the read flag"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn message_arriving_in_the_open_thread_is_read_on_arrival() {
    let (url, _state) = start_router().await;

    let (alice_cmd, mut alice_evt) = connect_user(&url, "alice").await;
    let (bob_cmd, mut bob_evt) = connect_user(&url, "bob").await;

    // Bob is already viewing the (still empty) conversation with alice.
    bob_cmd
        .send(SessionCommand::OpenThread {
            peer: Some(UserId::new("alice")),
        })
        .await
        .unwrap();

    alice_cmd
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: "seen instantly".into(),
        })
        .await
        .unwrap();

    // Bob's view follows the new message.
    wait_for(&mut bob_evt, "ScrollToLatest", |e| {
        matches!(e, SessionEvent::ScrollToLatest { .. })
    })
    .await;

    // Alice gets the read notification without bob re-opening anything.
    let read = wait_for(&mut alice_evt, "PeerReadMessages", |e| {
        matches!(e, SessionEvent::PeerReadMessages { .. })
    })
    .await;
    assert_eq!(
        read,
        SessionEvent::PeerReadMessages {
            by: UserId::new("bob"),
        }
    );
}

#[tokio::test]
async fn reopening_a_fully_read_thread_sends_no_signal() {
    // Loopback so the mark-read frames can be counted exactly.
    let connector = LoopbackConnector::new();
    let (chan, router) = loopback_pair(32);
    connector.push_channel(chan);

    let auth = tokio::spawn(async move {
        let _ = router.accept_auth().await;
        router
    });

    let (cmd_tx, _evt_rx) = spawn_session(connector, session_config("alice")).await.unwrap();
    let router = auth.await.unwrap();

    // Seed the thread with one unread message from bob (the external
    // history read path).
    cmd_tx
        .send(SessionCommand::SeedThread {
            peer: UserId::new("bob"),
            messages: vec![ThreadMessage {
                id: Some(MessageId::new()),
                ref_id: None,
                sender: UserId::new("bob"),
                receiver: UserId::new("alice"),
                text: "old unread".into(),
                timestamp: Timestamp::from_millis(1_000),
                read: false,
                delivery: Delivery::Confirmed,
            }],
        })
        .await
        .unwrap();

    // First open: exactly one read signal.
    cmd_tx
        .send(SessionCommand::OpenThread {
            peer: Some(UserId::new("bob")),
        })
        .await
        .unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), router.next_client())
        .await
        .expect("mark-read frame timed out");
    assert_eq!(
        frame,
        Some(ClientFrame::MarkMessagesRead {
            sender: UserId::new("bob"),
        })
    );

    // Re-opening with nothing unread: silence on the wire.
    cmd_tx
        .send(SessionCommand::OpenThread { peer: None })
        .await
        .unwrap();
    cmd_tx
        .send(SessionCommand::OpenThread {
            peer: Some(UserId::new("bob")),
        })
        .await
        .unwrap();

    let silent = tokio::time::timeout(Duration::from_millis(300), router.next_client()).await;
    assert!(silent.is_err(), "no frame should be sent: {silent:?}");
}
