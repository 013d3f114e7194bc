// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! Reconciliation races over a hand-scripted router: the authoritative
//! echo beating the acknowledgment, late acknowledgments, and duplicate
//! push redelivery.
//!
//! The loopback channel gives frame-by-frame control of the router side,
//! so orderings that are timing-dependent through a real server are
//! forced deterministically here.

use std::time::Duration;

use tokio::sync::mpsc;

use huddle::channel::loopback::{LoopbackConnector, RouterEnd, loopback_pair};
use huddle::link::Credentials;
use huddle::session::{SessionCommand, SessionConfig, SessionEvent, spawn_session};
use huddle::thread::Delivery;
use huddle_proto::frame::{ClientFrame, ServerFrame};
use huddle_proto::ident::{MessageId, RefId, Timestamp, UserId};

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::new(Credentials {
        user_id: UserId::new("alice"),
        token: "tok".into(),
    });
    config.delivery_timeout = Duration::from_secs(5);
    config.link.auth_timeout = Duration::from_secs(2);
    config
}

async fn spawn_with_router() -> (
    mpsc::Sender<SessionCommand>,
    mpsc::Receiver<SessionEvent>,
    RouterEnd,
) {
    let connector = LoopbackConnector::new();
    let (chan, router) = loopback_pair(32);
    connector.push_channel(chan);

    let auth = tokio::spawn(async move {
        let _ = router.accept_auth().await;
        router
    });

    let (cmd_tx, evt_rx) = spawn_session(connector, test_config()).await.unwrap();
    (cmd_tx, evt_rx, auth.await.unwrap())
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

/// Assert that no event matching the predicate arrives within `window`.
async fn assert_silent<F>(rx: &mut mpsc::Receiver<SessionEvent>, window: Duration, pred: F)
where
    F: Fn(&SessionEvent) -> bool,
{
    let result = tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Some(evt) if pred(&evt) => break Some(evt),
                Some(_) => {}
                None => break None,
            }
        }
    })
    .await;
    if let Ok(Some(evt)) = result {
        panic!("unexpected event: {evt:?}");
    }
}

/// Submit a send and return its refId once the router has the frame.
async fn submit_send(
    cmd_tx: &mpsc::Sender<SessionCommand>,
    router: &RouterEnd,
    text: &str,
) -> RefId {
    cmd_tx
        .send(SessionCommand::SendMessage {
            to: UserId::new("bob"),
            text: text.into(),
        })
        .await
        .unwrap();
    match router.next_client().await {
        Some(ClientFrame::SendDirectMessage { ref_id, .. }) => ref_id,
        other => panic!("expected SendDirectMessage, got {other:?}"),
    }
}

#[tokio::test]
async fn echo_before_ack_confirms_and_the_ack_is_a_no_op() {
    let (cmd_tx, mut evt_rx, router) = spawn_with_router().await;

    let ref_id = submit_send(&cmd_tx, &router, "hi").await;
    let id = MessageId::new();
    let server_ts = Timestamp::now();

    // The authoritative echo arrives before the ack.
    router
        .push(ServerFrame::DirectMessage {
            id: Some(id),
            sender: UserId::new("alice"),
            sender_name: "Alice".into(),
            text: "hi".into(),
            timestamp: server_ts,
            ref_id: Some(ref_id),
        })
        .await;

    let updated = wait_for(&mut evt_rx, "DeliveryUpdated", |e| {
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

    // The echo must not surface as an incoming message.
    assert_silent(&mut evt_rx, Duration::from_millis(200), |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;

    // The ack lands afterwards: a pure no-op.
    router
        .push(ServerFrame::SendAccepted {
            ref_id,
            id,
            timestamp: server_ts,
        })
        .await;
    assert_silent(&mut evt_rx, Duration::from_millis(300), |e| {
        matches!(e, SessionEvent::DeliveryUpdated { .. })
    })
    .await;
}

#[tokio::test]
async fn redelivered_push_is_admitted_exactly_once() {
    let (_cmd_tx, mut evt_rx, router) = spawn_with_router().await;

    let push = ServerFrame::DirectMessage {
        id: Some(MessageId::new()),
        sender: UserId::new("carol"),
        sender_name: "Carol".into(),
        text: "hello again".into(),
        timestamp: Timestamp::now(),
        ref_id: None,
    };

    // The same push is redelivered shortly after (reconnect replay).
    router.push(push.clone()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    router.push(push).await;

    let received = wait_for(&mut evt_rx, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    let SessionEvent::MessageReceived { peer, .. } = received else {
        unreachable!()
    };
    assert_eq!(peer, UserId::new("carol"));

    assert_silent(&mut evt_rx, Duration::from_millis(300), |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
}

#[tokio::test]
async fn rejection_fails_the_send_and_shows_the_reason_verbatim() {
    let (cmd_tx, mut evt_rx, router) = spawn_with_router().await;

    let ref_id = submit_send(&cmd_tx, &router, "nope").await;
    router
        .push(ServerFrame::SendRejected {
            ref_id,
            reason: "recipient has blocked you".into(),
        })
        .await;

    let updated = wait_for(&mut evt_rx, "DeliveryUpdated", |e| {
        matches!(e, SessionEvent::DeliveryUpdated { .. })
    })
    .await;
    assert_eq!(
        updated,
        SessionEvent::DeliveryUpdated {
            ref_id,
            peer: UserId::new("bob"),
            delivery: Delivery::Failed,
        }
    );

    let notice = wait_for(&mut evt_rx, "Notice", |e| {
        matches!(e, SessionEvent::Notice(_))
    })
    .await;
    let SessionEvent::Notice(notice) = notice else {
        unreachable!()
    };
    assert_eq!(notice.text, "recipient has blocked you");
}

#[tokio::test]
async fn malformed_push_is_dropped_without_ending_the_session() {
    let (_cmd_tx, mut evt_rx, router) = spawn_with_router().await;

    // Push with an empty sender: dropped with a warning.
    router
        .push(ServerFrame::DirectMessage {
            id: None,
            sender: UserId::new(""),
            sender_name: String::new(),
            text: "ghost".into(),
            timestamp: Timestamp::now(),
            ref_id: None,
        })
        .await;

    assert_silent(&mut evt_rx, Duration::from_millis(200), |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;

    // The session is still alive: a well-formed push goes through.
    router
        .push(ServerFrame::DirectMessage {
            id: Some(MessageId::new()),
            sender: UserId::new("carol"),
            sender_name: "Carol".into(),
            text: "still here".into(),
            timestamp: Timestamp::now(),
            ref_id: None,
        })
        .await;
    let received = wait_for(&mut evt_rx, "MessageReceived", |e| {
        matches!(e, SessionEvent::MessageReceived { .. })
    })
    .await;
    let SessionEvent::MessageReceived { text, .. } = received else {
        unreachable!()
    };
    assert_eq!(text, "still here");
}

#[tokio::test]
async fn server_error_frame_surfaces_as_a_notice() {
    let (_cmd_tx, mut evt_rx, router) = spawn_with_router().await;

    router
        .push(ServerFrame::Error {
            message: "maintenance in 5 minutes".into(),
        })
        .await;

    let notice = wait_for(&mut evt_rx, "Notice", |e| {
        matches!(e, SessionEvent::Notice(_))
    })
    .await;
    let SessionEvent::Notice(notice) = notice else {
        unreachable!()
    };
    assert_eq!(notice.text, "maintenance in 5 minutes");
}
