//! Typed channel abstraction between the client and the router.
//!
//! Defines the [`Channel`] trait (frame-level send/recv over one live
//! connection) and the [`Connector`] trait (opens fresh channels, so the
//! session can replace the transport across reconnects while keeping its
//! logical identity). Concrete implementations:
//! - [`ws::WsChannel`] -- WebSocket connection carrying postcard frames
//! - [`loopback::LoopbackChannel`] -- in-process pair for testing

pub mod loopback;
pub mod ws;

use huddle_proto::codec::CodecError;
use huddle_proto::frame::{ClientFrame, ServerFrame};

/// Errors that can occur on a client/router channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The connection has been closed.
    #[error("channel closed")]
    Closed,

    /// The operation timed out before completing.
    #[error("channel operation timed out")]
    Timeout,

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One live, typed connection to the router.
///
/// Implementations carry [`ClientFrame`]s up and [`ServerFrame`]s down.
/// A `Channel` is bound to a single transport connection: when it closes
/// it is discarded and the [`Connector`] opens a replacement.
pub trait Channel: Send + Sync {
    /// Send a frame to the router.
    ///
    /// Returns `Ok(())` when the frame has been handed off to the
    /// transport. This does NOT guarantee delivery -- the caller must
    /// wait for an application-level acknowledgment.
    fn send(
        &self,
        frame: &ClientFrame,
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next frame pushed by the router.
    ///
    /// Blocks asynchronously until a frame arrives.
    fn recv(&self) -> impl std::future::Future<Output = Result<ServerFrame, ChannelError>> + Send;

    /// Check whether the underlying connection is still open.
    fn is_open(&self) -> bool;
}

/// Opens fresh channels to the router.
///
/// The session holds one `Connector` for its whole lifetime and asks it
/// for a new [`Channel`] on initial connect and after every transport
/// loss.
pub trait Connector: Send + Sync {
    /// The channel type this connector produces.
    type Chan: Channel + Send + Sync + 'static;

    /// Open a new connection to the router.
    fn open(&self) -> impl std::future::Future<Output = Result<Self::Chan, ChannelError>> + Send;
}
