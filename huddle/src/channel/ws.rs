//! WebSocket channel to the Huddle router.
//!
//! Implements [`Channel`] over a tokio-tungstenite WebSocket connection.
//! Frames are postcard-encoded and carried as binary WebSocket messages.
//! A background reader task decodes incoming frames into an internal
//! queue; malformed frames are logged and skipped, never fatal.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use huddle_proto::codec;
use huddle_proto::frame::{ClientFrame, ServerFrame};

use super::{Channel, ChannelError, Connector};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the inbound frame queue fed by the reader task.
const INBOUND_BUFFER: usize = 256;

/// Opens [`WsChannel`]s to a fixed router URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// The router URL (ws:// or wss://).
    url: String,
    /// Timeout for establishing the TCP+WebSocket connection.
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the given router URL.
    #[must_use]
    pub const fn new(url: String, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    /// Return the router URL this connector targets.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Chan = WsChannel;

    async fn open(&self) -> Result<WsChannel, ChannelError> {
        WsChannel::connect(&self.url, self.connect_timeout).await
    }
}

/// WebSocket implementation of the [`Channel`] trait.
///
/// Created via [`WsChannel::connect`], which establishes the connection
/// and spawns a background reader task for the connection's lifetime.
pub struct WsChannel {
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Channel for frames received by the background reader task.
    incoming: Mutex<mpsc::Receiver<ServerFrame>>,
    /// Whether the WebSocket connection is still active.
    open: Arc<AtomicBool>,
    /// Handle to the background reader task; aborted on drop so the
    /// read half (and with it the TCP connection) is released.
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl WsChannel {
    /// Connect to the router at `url` within `connect_timeout`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Timeout`] if the connection does not establish in time.
    /// - [`ChannelError::Io`] for URL, DNS, TCP, or TLS failures.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, ChannelError> {
        // Reject malformed URLs before hitting the network.
        url::Url::parse(url)
            .map_err(|e| ChannelError::Io(std::io::Error::other(format!("invalid URL: {e}"))))?;

        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "router WebSocket connect timed out");
                ChannelError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "router WebSocket connect failed");
                ChannelError::Io(std::io::Error::other(format!("connect failed: {e}")))
            })?;

        let (ws_sender, ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let open = Arc::new(AtomicBool::new(true));
        let reader_open = Arc::clone(&open);

        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, reader_open));

        Ok(Self {
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            open,
            reader_handle,
        })
    }
}

impl Channel for WsChannel {
    async fn send(&self, frame: &ClientFrame) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(ChannelError::Closed);
        }

        let bytes = codec::encode_client(frame)?;

        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "WebSocket send failed");
                self.open.store(false, Ordering::Relaxed);
                ChannelError::Closed
            })?;

        Ok(())
    }

    async fn recv(&self) -> Result<ServerFrame, ChannelError> {
        let mut rx = self.incoming.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

/// Background task that reads WebSocket messages and decodes frames.
///
/// Malformed frames are logged and skipped -- the task does not tear the
/// connection down on bad data. Sets `open` to `false` when the WebSocket
/// closes or errors out.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<ServerFrame>,
    open: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match codec::decode_server(&data) {
                Ok(frame) => {
                    if tx.send(frame).await.is_err() {
                        // Receiver dropped -- the channel was dropped, exit.
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by router");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {
                // Transport-level frames; nothing to decode.
            }
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }
    open.store(false, Ordering::Relaxed);
    tracing::debug!("WebSocket reader task exiting");
}
