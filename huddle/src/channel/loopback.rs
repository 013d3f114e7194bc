//! Loopback channel for testing.
//!
//! [`loopback_pair`] returns a client-side [`LoopbackChannel`] and a
//! [`RouterEnd`] test double connected by in-process mpsc channels, so
//! tests can script the router's side of the protocol frame by frame --
//! including frame orderings (echo before ack) that are hard to force
//! through a real server.

use std::collections::VecDeque;

use tokio::sync::{Mutex, mpsc};

use huddle_proto::frame::{ClientFrame, ServerFrame};
use huddle_proto::ident::UserId;

use super::{Channel, ChannelError, Connector};

/// Create a connected loopback channel pair.
///
/// Frames sent on the [`LoopbackChannel`] arrive at the [`RouterEnd`] and
/// vice versa. `buffer` controls the channel capacity in each direction.
#[must_use]
pub fn loopback_pair(buffer: usize) -> (LoopbackChannel, RouterEnd) {
    let (client_tx, client_rx) = mpsc::channel(buffer);
    let (server_tx, server_rx) = mpsc::channel(buffer);

    let channel = LoopbackChannel {
        tx: client_tx,
        rx: Mutex::new(server_rx),
    };
    let router = RouterEnd {
        tx: server_tx,
        rx: Mutex::new(client_rx),
    };
    (channel, router)
}

/// Client side of a loopback pair, implementing [`Channel`].
#[derive(Debug)]
pub struct LoopbackChannel {
    tx: mpsc::Sender<ClientFrame>,
    rx: Mutex<mpsc::Receiver<ServerFrame>>,
}

impl Channel for LoopbackChannel {
    async fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        self.tx
            .send(frame.clone())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> Result<ServerFrame, ChannelError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Router side of a loopback pair -- a hand-driven test double.
///
/// Dropping it closes both directions, which the client observes as a
/// transport loss.
pub struct RouterEnd {
    tx: mpsc::Sender<ServerFrame>,
    rx: Mutex<mpsc::Receiver<ClientFrame>>,
}

impl RouterEnd {
    /// Push a frame to the client. Returns `false` if the client is gone.
    pub async fn push(&self, frame: ServerFrame) -> bool {
        self.tx.send(frame).await.is_ok()
    }

    /// Receive the next frame from the client, or `None` once it is gone.
    pub async fn next_client(&self) -> Option<ClientFrame> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }

    /// Wait for the client's `Authenticate` frame and reply `Authenticated`.
    ///
    /// Skips `Ping` frames. Returns the authenticated identity, or `None`
    /// if the client disconnects or sends something else first.
    pub async fn accept_auth(&self) -> Option<UserId> {
        loop {
            match self.next_client().await? {
                ClientFrame::Authenticate { user_id, .. } => {
                    let accepted = self
                        .push(ServerFrame::Authenticated {
                            user_id: user_id.clone(),
                        })
                        .await;
                    return accepted.then_some(user_id);
                }
                ClientFrame::Ping => {}
                other => {
                    tracing::warn!(?other, "expected Authenticate, got different frame");
                    return None;
                }
            }
        }
    }
}

/// Connector that hands out a scripted sequence of loopback channels.
///
/// Each [`Connector::open`] call pops the next queued channel; an empty
/// queue behaves like a refused connection. Tests use this to control
/// exactly how many times the session may (re)connect.
pub struct LoopbackConnector {
    queue: parking_lot::Mutex<VecDeque<LoopbackChannel>>,
}

impl LoopbackConnector {
    /// Create a connector with no channels queued.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: parking_lot::Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a channel to be returned by the next `open` call.
    pub fn push_channel(&self, chan: LoopbackChannel) {
        self.queue.lock().push_back(chan);
    }
}

impl Default for LoopbackConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for LoopbackConnector {
    type Chan = LoopbackChannel;

    async fn open(&self) -> Result<LoopbackChannel, ChannelError> {
        self.queue.lock().pop_front().ok_or_else(|| {
            ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no loopback channel queued",
            ))
        })
    }
}
