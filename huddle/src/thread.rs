//! Per-peer message threads.
//!
//! A thread is the ordered history between the local user and one peer.
//! Display order is by timestamp, not arrival order: confirmations and
//! pushes may arrive out of submission order, and insertion keeps the
//! thread sorted so a late arrival never reorders existing bubbles.

use std::collections::HashMap;

use huddle_proto::ident::{MessageId, RefId, Timestamp, UserId};

/// Delivery lifecycle of a message.
///
/// Only meaningful for messages authored locally; inbound messages are
/// admitted as `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistically displayed, not yet acknowledged.
    Pending,
    /// Durably accepted by the router.
    Confirmed,
    /// Rejected or timed out; retry is a distinct user action.
    Failed,
}

/// One message in a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadMessage {
    /// Server-assigned id; `None` until the send is confirmed.
    pub id: Option<MessageId>,
    /// Correlation id; set only on locally-authored messages.
    pub ref_id: Option<RefId>,
    /// Who sent the message.
    pub sender: UserId,
    /// Who it was addressed to.
    pub receiver: UserId,
    /// Message text.
    pub text: String,
    /// Timestamp the thread is ordered by.
    pub timestamp: Timestamp,
    /// Whether the message has been read (by the local user for inbound
    /// messages, by the peer for outbound ones).
    pub read: bool,
    /// Delivery state.
    pub delivery: Delivery,
}

/// Ordered per-peer message threads with duplicate suppression.
pub struct ThreadStore {
    threads: HashMap<UserId, Vec<ThreadMessage>>,
    /// Window for the content+time duplicate heuristic, in milliseconds.
    duplicate_window_ms: u64,
}

impl ThreadStore {
    /// Creates an empty store with the given duplicate window.
    #[must_use]
    pub fn new(duplicate_window_ms: u64) -> Self {
        Self {
            threads: HashMap::new(),
            duplicate_window_ms,
        }
    }

    /// The messages in `peer`'s thread, in ascending timestamp order.
    #[must_use]
    pub fn thread(&self, peer: &UserId) -> &[ThreadMessage] {
        self.threads.get(peer).map_or(&[], Vec::as_slice)
    }

    /// Insert a message into `peer`'s thread, preserving timestamp order.
    ///
    /// Equal timestamps keep arrival order (the new message lands after
    /// existing ones).
    pub fn insert(&mut self, peer: &UserId, msg: ThreadMessage) {
        let thread = self.threads.entry(peer.clone()).or_default();
        let pos = thread.partition_point(|m| m.timestamp <= msg.timestamp);
        thread.insert(pos, msg);
    }

    /// Content+time duplicate check for an inbound push.
    ///
    /// True if `peer`'s thread already holds a non-pending message with
    /// the same sender and text within the configured window. The window
    /// exists because some transports redeliver a push after a reconnect.
    #[must_use]
    pub fn is_duplicate(
        &self,
        peer: &UserId,
        sender: &UserId,
        text: &str,
        timestamp: Timestamp,
    ) -> bool {
        self.thread(peer).iter().any(|m| {
            m.sender == *sender
                && m.text == text
                && m.timestamp.abs_diff(timestamp) < self.duplicate_window_ms
                && m.delivery != Delivery::Pending
        })
    }

    /// Update the delivery state of the message with `ref_id` in `peer`'s
    /// thread. Returns `false` if no such message exists.
    pub fn update_delivery(&mut self, peer: &UserId, ref_id: RefId, delivery: Delivery) -> bool {
        let Some(thread) = self.threads.get_mut(peer) else {
            return false;
        };
        match thread.iter_mut().find(|m| m.ref_id == Some(ref_id)) {
            Some(msg) => {
                msg.delivery = delivery;
                true
            }
            None => false,
        }
    }

    /// Adopt authoritative fields onto the optimistic message with
    /// `ref_id`: server id, server timestamp, delivery confirmed.
    ///
    /// Re-sorts the message if the authoritative timestamp moves it.
    /// Returns `false` if no such message exists.
    pub fn adopt(
        &mut self,
        peer: &UserId,
        ref_id: RefId,
        id: MessageId,
        timestamp: Timestamp,
    ) -> bool {
        let Some(thread) = self.threads.get_mut(peer) else {
            return false;
        };
        let Some(pos) = thread.iter().position(|m| m.ref_id == Some(ref_id)) else {
            return false;
        };

        let mut msg = thread.remove(pos);
        msg.id = Some(id);
        msg.timestamp = timestamp;
        msg.delivery = Delivery::Confirmed;
        let new_pos = thread.partition_point(|m| m.timestamp <= msg.timestamp);
        thread.insert(new_pos, msg);
        true
    }

    /// Mark all unread messages *from* `peer` as read. Returns how many
    /// messages changed.
    pub fn mark_from_peer_read(&mut self, peer: &UserId) -> usize {
        let Some(thread) = self.threads.get_mut(peer) else {
            return 0;
        };
        let mut changed = 0;
        for msg in thread.iter_mut().filter(|m| m.sender == *peer && !m.read) {
            msg.read = true;
            changed += 1;
        }
        changed
    }

    /// Mark the local user's messages in `by`'s thread as read by the
    /// peer. Returns how many messages changed.
    pub fn mark_read_by(&mut self, by: &UserId) -> usize {
        let Some(thread) = self.threads.get_mut(by) else {
            return 0;
        };
        let mut changed = 0;
        for msg in thread.iter_mut().filter(|m| m.receiver == *by && !m.read) {
            msg.read = true;
            changed += 1;
        }
        changed
    }

    /// Number of unread messages from `peer`.
    #[must_use]
    pub fn unread_from(&self, peer: &UserId) -> usize {
        self.thread(peer)
            .iter()
            .filter(|m| m.sender == *peer && !m.read)
            .count()
    }

    /// Seed `peer`'s thread from an external history read.
    ///
    /// Messages whose id is already present are skipped, so seeding after
    /// live traffic has arrived only fills the gaps.
    pub fn seed(&mut self, peer: &UserId, messages: Vec<ThreadMessage>) {
        for msg in messages {
            let already_present = msg.id.is_some()
                && self
                    .thread(peer)
                    .iter()
                    .any(|existing| existing.id == msg.id);
            if !already_present {
                self.insert(peer, msg);
            }
        }
    }
}
