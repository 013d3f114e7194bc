//! Router core: shared state, WebSocket handler, and message routing.
//!
//! Connection lifecycle:
//! 1. Wait for an `Authenticate` frame and verify it -- nothing else is
//!    trusted on a fresh connection, including after client reconnects.
//! 2. Register the connection and confirm with `Authenticated`.
//! 3. Enter the frame loop: persist-then-ack sends, fan pushes out to
//!    the receiver's connections, echo to the sender's own tabs, relay
//!    read receipts.
//! 4. On disconnect, unregister the connection.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use huddle_proto::codec;
use huddle_proto::frame::{ClientFrame, ServerFrame, validate_text};
use huddle_proto::ident::{RefId, UserId};

use crate::auth::{OpaqueVerifier, TokenVerifier};
use crate::sessions::SessionRegistry;
use crate::store::{MessageStore, StoredMessage};

/// Default number of messages returned by the history read path.
const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Shared router state: connection registry, message store, verifier.
pub struct RouterState {
    /// Active connections per user.
    pub sessions: SessionRegistry,
    /// Message persistence; written before any success ack.
    pub store: MessageStore,
    /// Credential check for the authentication handshake.
    verifier: Box<dyn TokenVerifier>,
}

impl Default for RouterState {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterState {
    /// Creates router state with an empty registry, default store, and
    /// the opaque credential check.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Box::new(OpaqueVerifier), MessageStore::new())
    }

    /// Creates router state with a custom verifier and store.
    #[must_use]
    pub fn with_config(verifier: Box<dyn TokenVerifier>, store: MessageStore) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            store,
            verifier,
        }
    }
}

/// Result of the authentication gate on a fresh connection.
enum AuthOutcome {
    /// Credentials verified; the connection is bound to this user.
    Accepted(String),
    /// Credentials or protocol order rejected, with a reason to send.
    Rejected(String),
    /// The connection went away before authenticating.
    Disconnected,
}

/// Handles an upgraded WebSocket connection.
pub async fn handle_socket(socket: WebSocket, state: Arc<RouterState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Gate: nothing is trusted before a verified Authenticate frame.
    let user_id = match wait_for_authenticate(&mut ws_receiver, &state).await {
        AuthOutcome::Accepted(user_id) => user_id,
        AuthOutcome::Rejected(reason) => {
            tracing::warn!(reason = %reason, "connection rejected during authentication");
            let _ = send_frame(&mut ws_sender, &ServerFrame::Error { message: reason }).await;
            return;
        }
        AuthOutcome::Disconnected => {
            tracing::debug!("connection closed before authentication");
            return;
        }
    };

    // Create the writer channel and register this connection.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn_id = state.sessions.register(&user_id, tx).await;

    // Confirm the identity binding before anything else is delivered.
    let confirm = ServerFrame::Authenticated {
        user_id: UserId::new(&user_id),
    };
    if let Err(e) = send_frame(&mut ws_sender, &confirm).await {
        tracing::error!(user = %user_id, error = %e, "failed to send Authenticated");
        state.sessions.unregister(&user_id, conn_id).await;
        return;
    }

    tracing::info!(user = %user_id, conn_id, "connection authenticated");

    // Writer task: forwards frames from the channel to the WebSocket.
    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader loop: process frames from this connection.
    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&reader_user, conn_id, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, conn_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.sessions.unregister(&user_id, conn_id).await;
    tracing::info!(user = %user_id, conn_id, "connection closed and unregistered");
}

/// Waits for the first frame, expecting `Authenticate`, and verifies it.
async fn wait_for_authenticate(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    state: &RouterState,
) -> AuthOutcome {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match codec::decode_client(&data) {
                Ok(ClientFrame::Authenticate { token, user_id }) => {
                    if user_id.is_empty() {
                        return AuthOutcome::Rejected("user id must not be empty".into());
                    }
                    if !state.verifier.verify(&token, user_id.as_str()) {
                        return AuthOutcome::Rejected("invalid credentials".into());
                    }
                    return AuthOutcome::Accepted(user_id.as_str().to_string());
                }
                Ok(other) => {
                    tracing::warn!(frame = ?other, "frame before authentication");
                    return AuthOutcome::Rejected("authentication required".into());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode authentication frame");
                    return AuthOutcome::Rejected("malformed authentication frame".into());
                }
            },
            Message::Close(_) => return AuthOutcome::Disconnected,
            _ => {
                // Skip transport-level frames during authentication.
            }
        }
    }
    AuthOutcome::Disconnected
}

/// Handles a binary frame from an authenticated connection.
async fn handle_binary_message(user_id: &str, conn_id: u64, data: &[u8], state: &Arc<RouterState>) {
    let frame = match codec::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(user = %user_id, error = %e, "failed to decode frame");
            return;
        }
    };

    match frame {
        ClientFrame::SendDirectMessage {
            ref_id,
            receiver,
            text,
        } => {
            handle_send(state, user_id, conn_id, ref_id, &receiver, text).await;
        }
        ClientFrame::MarkMessagesRead { sender } => {
            let changed = state.store.mark_read(sender.as_str(), user_id).await;
            tracing::debug!(
                reader = %user_id,
                sender = %sender,
                changed,
                "messages marked read"
            );
            // Fire-and-forget toward the caller; the original sender
            // learns their messages were read.
            let notify = ServerFrame::MessagesRead {
                by: UserId::new(user_id),
            };
            send_to_user(state, sender.as_str(), &notify).await;
        }
        ClientFrame::Ping => {
            tracing::trace!(user = %user_id, "keepalive ping");
        }
        ClientFrame::Authenticate { .. } => {
            tracing::warn!(user = %user_id, "duplicate Authenticate on live connection");
        }
    }
}

/// Persist a direct message, acknowledge it, and fan out the pushes.
///
/// Order of operations: validate, persist, push to the receiver's
/// connections (no `refId`), echo to all of the sender's connections
/// (with `refId`, so other tabs and the optimistic copy reconcile), then
/// ack the originating connection. Persistence always precedes the
/// success ack.
async fn handle_send(
    state: &Arc<RouterState>,
    user_id: &str,
    conn_id: u64,
    ref_id: RefId,
    receiver: &UserId,
    text: String,
) {
    if let Err(e) = validate_text(&text) {
        tracing::warn!(user = %user_id, error = %e, "send rejected");
        let reject = ServerFrame::SendRejected {
            ref_id,
            reason: e.to_string(),
        };
        send_to_connection(state, user_id, conn_id, &reject).await;
        return;
    }
    if receiver.is_empty() {
        let reject = ServerFrame::SendRejected {
            ref_id,
            reason: "receiver must not be empty".into(),
        };
        send_to_connection(state, user_id, conn_id, &reject).await;
        return;
    }

    let stored = state.store.append(user_id, receiver.as_str(), &text).await;

    tracing::debug!(
        from = %user_id,
        to = %receiver,
        id = %stored.id,
        "message persisted, routing"
    );

    // Push to the receiver. Skipped for self-addressed sends -- the echo
    // below already covers every connection of the (single) user.
    if receiver.as_str() != user_id {
        let push = ServerFrame::DirectMessage {
            id: Some(stored.id),
            sender: UserId::new(user_id),
            sender_name: user_id.to_string(),
            text: text.clone(),
            timestamp: stored.timestamp,
            ref_id: None,
        };
        send_to_user(state, receiver.as_str(), &push).await;
    }

    // Echo to the sender's connections, carrying the correlation id.
    let echo = ServerFrame::DirectMessage {
        id: Some(stored.id),
        sender: UserId::new(user_id),
        sender_name: user_id.to_string(),
        text,
        timestamp: stored.timestamp,
        ref_id: Some(ref_id),
    };
    send_to_user(state, user_id, &echo).await;

    // Acknowledge the originating connection.
    let ack = ServerFrame::SendAccepted {
        ref_id,
        id: stored.id,
        timestamp: stored.timestamp,
    };
    send_to_connection(state, user_id, conn_id, &ack).await;
}

/// Encode a frame once and send it to every connection of a user.
async fn send_to_user(state: &Arc<RouterState>, user_id: &str, frame: &ServerFrame) {
    let Ok(bytes) = codec::encode_server(frame) else {
        tracing::error!("failed to encode server frame");
        return;
    };
    for sender in state.sessions.senders_for(user_id).await {
        let _ = sender.send(Message::Binary(bytes.clone().into()));
    }
}

/// Send a frame to one specific connection of a user.
async fn send_to_connection(
    state: &Arc<RouterState>,
    user_id: &str,
    conn_id: u64,
    frame: &ServerFrame,
) {
    let Some(sender) = state.sessions.sender_for(user_id, conn_id).await else {
        tracing::debug!(user = %user_id, conn_id, "connection gone, frame dropped");
        return;
    };
    let Ok(bytes) = codec::encode_server(frame) else {
        tracing::error!("failed to encode server frame");
        return;
    };
    let _ = sender.send(Message::Binary(bytes.into()));
}

/// Encodes and sends a frame directly on a WebSocket sender.
async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = codec::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Query parameters for the history read path.
#[derive(Debug, serde::Deserialize)]
pub struct HistoryParams {
    /// Maximum number of messages to return (most recent).
    pub limit: Option<usize>,
}

/// `GET /history/{user}/{peer}` -- the external read path that seeds a
/// client thread on conversation open.
pub async fn history_handler(
    axum::extract::State(state): axum::extract::State<Arc<RouterState>>,
    axum::extract::Path((user, peer)): axum::extract::Path<(String, String)>,
    axum::extract::Query(params): axum::extract::Query<HistoryParams>,
) -> axum::Json<Vec<StoredMessage>> {
    let limit = params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    axum::Json(state.store.conversation(&user, &peer, limit).await)
}

/// Starts the router on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RouterState::new())).await
}

/// Starts the router with a pre-configured [`RouterState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RouterState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/history/{user}/{peer}", axum::routing::get(history_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "router server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RouterState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
