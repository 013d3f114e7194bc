//! Wire frames exchanged between a Huddle client and the router.
//!
//! Frames are postcard-serialized and carried in WebSocket binary frames.
//! [`ClientFrame`] travels client-to-server, [`ServerFrame`] the other way.
//! The router never trusts a connection before a successful
//! `Authenticate` / `Authenticated` exchange, and the exchange is repeated
//! on every reconnect.

use serde::{Deserialize, Serialize};

use crate::ident::{MessageId, RefId, Timestamp, UserId};

/// Maximum allowed message text size in bytes (16 KB).
pub const MAX_TEXT_SIZE: usize = 16 * 1024;

/// Error returned when outbound message text fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Message text is empty.
    #[error("message text is empty")]
    Empty,
    /// Message text exceeds the maximum allowed size.
    #[error("message too large ({size} bytes, max {max} bytes)")]
    TooLarge {
        /// Actual size of the text in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Validates message text for sending.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for empty text, or
/// [`ValidationError::TooLarge`] if it exceeds [`MAX_TEXT_SIZE`].
pub const fn validate_text(text: &str) -> Result<(), ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::Empty);
    }
    let size = text.len();
    if size > MAX_TEXT_SIZE {
        return Err(ValidationError::TooLarge {
            size,
            max: MAX_TEXT_SIZE,
        });
    }
    Ok(())
}

/// Frames sent from a client to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Binds this transport connection to a user identity.
    ///
    /// Must be the first frame on every connection, including every
    /// reconnect. The router replies with [`ServerFrame::Authenticated`]
    /// before delivering or accepting anything else.
    Authenticate {
        /// Opaque session token issued by the external auth service.
        token: String,
        /// The identity the token is claimed to belong to.
        user_id: UserId,
    },

    /// A direct message addressed to one user.
    ///
    /// The router persists the message before acknowledging it with
    /// [`ServerFrame::SendAccepted`] (or rejects it with
    /// [`ServerFrame::SendRejected`] without persisting).
    SendDirectMessage {
        /// Client-generated correlation id for the acknowledgment/echo.
        ref_id: RefId,
        /// The addressed recipient.
        receiver: UserId,
        /// Message text.
        text: String,
    },

    /// Marks all messages from `sender` to the caller as read.
    ///
    /// Fire-and-forget: the router relays a [`ServerFrame::MessagesRead`]
    /// to `sender` but never replies to the caller.
    MarkMessagesRead {
        /// The peer whose messages were read.
        sender: UserId,
    },

    /// Liveness ping. No reply frame is expected.
    Ping,
}

/// Frames pushed from the router to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Confirms the identity binding for this transport connection.
    Authenticated {
        /// The identity that was bound (echoed back for confirmation).
        user_id: UserId,
    },

    /// The message identified by `ref_id` was durably accepted.
    ///
    /// Carries the authoritative id and timestamp assigned at persist
    /// time; the client adopts them onto its optimistic copy.
    SendAccepted {
        /// Correlation id of the send being acknowledged.
        ref_id: RefId,
        /// Server-assigned message id.
        id: MessageId,
        /// Server-assigned timestamp.
        timestamp: Timestamp,
    },

    /// The message identified by `ref_id` was rejected and not persisted.
    SendRejected {
        /// Correlation id of the send being rejected.
        ref_id: RefId,
        /// Human-readable rejection reason, shown to the user verbatim.
        reason: String,
    },

    /// A direct message push.
    ///
    /// Delivered at-least-once to every active connection of the
    /// receiver, and echoed to the sender's connections with `ref_id`
    /// set so other tabs can fold it into their pending state.
    DirectMessage {
        /// Server-assigned message id. Absent only when the router
        /// relays before persistence has assigned one.
        id: Option<MessageId>,
        /// Who sent the message.
        sender: UserId,
        /// Display name of the sender, resolved by the router.
        sender_name: String,
        /// Message text.
        text: String,
        /// Server-assigned timestamp.
        timestamp: Timestamp,
        /// Correlation id, carried only on echoes of the receiving
        /// user's own sends.
        ref_id: Option<RefId>,
    },

    /// A peer has read the receiving user's messages.
    MessagesRead {
        /// The peer that read them.
        by: UserId,
    },

    /// Non-fatal server error, surfaced to the user.
    Error {
        /// Human-readable error description.
        message: String,
    },
}
