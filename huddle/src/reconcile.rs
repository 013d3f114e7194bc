//! Inbound push reconciliation.
//!
//! Every `DirectMessage` push runs through [`reconcile_push`] before it
//! may touch a thread. Correlation-id matching is the primary path: if
//! the push is the authoritative echo of a send that is still pending,
//! the pending entry is folded into a confirmed one and nothing new is
//! inserted. The content+time duplicate heuristic is the fallback for
//! pushes the router could not attach a correlation id to (relays from a
//! different sender session), and for redeliveries after a reconnect.

use huddle_proto::ident::{MessageId, RefId, Timestamp, UserId};

use crate::outbox::Outbox;
use crate::thread::{Delivery, ThreadMessage, ThreadStore};

/// An inbound `DirectMessage` push, as handed to reconciliation.
#[derive(Debug, Clone)]
pub struct Push {
    /// Server-assigned message id, if the router attached one.
    pub id: Option<MessageId>,
    /// Who sent the message.
    pub sender: UserId,
    /// Display name of the sender.
    pub sender_name: String,
    /// Message text.
    pub text: String,
    /// Server-assigned timestamp.
    pub timestamp: Timestamp,
    /// Correlation id, present only on echoes of the local user's sends.
    pub ref_id: Option<RefId>,
}

/// What reconciliation decided to do with a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admitted {
    /// The push was the authoritative echo of a pending send; the
    /// pending entry was confirmed in place. No new message inserted.
    Superseded {
        /// The correlation id that was resolved.
        ref_id: RefId,
        /// The thread holding the now-confirmed message.
        peer: UserId,
    },
    /// The push duplicated a message already in the thread; discarded.
    Duplicate,
    /// The push was admitted as a new message.
    Inserted {
        /// The thread it was inserted into.
        peer: UserId,
        /// Whether it was immediately marked read because the user is
        /// viewing that thread right now.
        marked_read: bool,
    },
    /// The push was missing required identity fields; dropped.
    Malformed,
}

/// Run one inbound push through the reconciliation algorithm.
///
/// `active_peer` is the thread the user currently has open, if any; a
/// push from that peer is marked read on arrival and the caller should
/// relay the read signal upstream and scroll the view.
pub fn reconcile_push(
    outbox: &mut Outbox,
    threads: &mut ThreadStore,
    local_user: &UserId,
    active_peer: Option<&UserId>,
    push: Push,
) -> Admitted {
    // A push without a sender or without text cannot be attributed or
    // displayed; drop it rather than poison the thread state.
    if push.sender.is_empty() || push.text.is_empty() {
        tracing::warn!(?push, "malformed push dropped");
        return Admitted::Malformed;
    }

    // Primary path: correlation id matches a pending send.
    if let Some(ref_id) = push.ref_id {
        if let Some(peer) = outbox.supersede(ref_id) {
            match push.id {
                Some(id) => {
                    threads.adopt(&peer, ref_id, id, push.timestamp);
                }
                None => {
                    // Echo without authoritative fields: confirm in place.
                    threads.update_delivery(&peer, ref_id, Delivery::Confirmed);
                }
            }
            tracing::debug!(%ref_id, peer = %peer, "pending send superseded by echo");
            return Admitted::Superseded { ref_id, peer };
        }
        if outbox.contains(ref_id) {
            // The ack already resolved this send; the echo is a pure
            // redelivery and must not re-insert the message.
            tracing::debug!(%ref_id, "echo for already-resolved send discarded");
            return Admitted::Duplicate;
        }
        // Unknown refId: a send from another tab of this user. Falls
        // through to the heuristic like any other push.
    }

    // Fallback: content+time duplicate suppression.
    if threads.is_duplicate(&push.sender, &push.sender, &push.text, push.timestamp) {
        tracing::debug!(sender = %push.sender, "duplicate push discarded");
        return Admitted::Duplicate;
    }

    let peer = push.sender.clone();
    let viewing = active_peer == Some(&peer);
    threads.insert(
        &peer,
        ThreadMessage {
            id: push.id,
            ref_id: None,
            sender: push.sender,
            receiver: local_user.clone(),
            text: push.text,
            timestamp: push.timestamp,
            read: false,
            delivery: Delivery::Confirmed,
        },
    );

    let marked_read = viewing && threads.mark_from_peer_read(&peer) > 0;

    Admitted::Inserted { peer, marked_read }
}
