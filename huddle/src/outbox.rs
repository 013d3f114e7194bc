//! Correlation registry for outbound messages.
//!
//! Every send gets a fresh [`RefId`] and a `Pending` entry here, plus a
//! single-shot delivery timer. Two independent paths race to resolve the
//! entry: the router's acknowledgment frame and the authoritative echo
//! push. Both funnel into [`Outbox::resolve`] / [`Outbox::supersede`],
//! which are idempotent -- the second arrival of any resolution is a
//! no-op, so the ordering between ack and echo is irrelevant.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use huddle_proto::ident::{MessageId, RefId, Timestamp, UserId};

use crate::thread::Delivery;

/// How a pending send was resolved.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// The router durably accepted the message.
    Accepted {
        /// Server-assigned message id.
        id: MessageId,
        /// Server-assigned timestamp.
        timestamp: Timestamp,
    },
    /// The router rejected the message without persisting it.
    Rejected {
        /// Rejection reason, shown to the user verbatim.
        reason: String,
    },
    /// No acknowledgment or echo arrived within the delivery deadline.
    TimedOut,
}

/// Result of resolving a pending entry, handed back to the session so it
/// can update the matching thread message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// The peer the message was addressed to.
    pub receiver: UserId,
    /// The terminal delivery state.
    pub delivery: Delivery,
}

struct Entry {
    receiver: UserId,
    state: Delivery,
    /// Armed while the entry is pending; aborted on any resolution.
    timer: Option<JoinHandle<()>>,
}

/// Registry of in-flight sends keyed by correlation id.
///
/// Terminal entries are retained so a late ack or echo for an already
/// resolved `RefId` stays a recognizable no-op. RefIds are never reused,
/// so the registry grows with the number of sends in one session.
pub struct Outbox {
    entries: HashMap<RefId, Entry>,
}

impl Outbox {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register a fresh pending send with its armed delivery timer.
    ///
    /// The caller has already generated the `RefId` and inserted the
    /// optimistic thread message; this records the entry the ack/echo
    /// paths will resolve against.
    pub fn begin(&mut self, ref_id: RefId, receiver: UserId, timer: JoinHandle<()>) {
        debug_assert!(
            !self.entries.contains_key(&ref_id),
            "RefId registered twice"
        );
        self.entries.insert(
            ref_id,
            Entry {
                receiver,
                state: Delivery::Pending,
                timer: Some(timer),
            },
        );
    }

    /// Resolve a pending entry via the acknowledgment (or timeout) path.
    ///
    /// Returns `None` -- a no-op -- for an unknown or already-terminal
    /// `RefId`. On a real transition the delivery timer is cancelled
    /// unconditionally (success and failure paths both cancel).
    pub fn resolve(&mut self, ref_id: RefId, outcome: &SendOutcome) -> Option<Resolved> {
        let entry = self.entries.get_mut(&ref_id)?;
        if entry.state != Delivery::Pending {
            return None;
        }
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.state = match outcome {
            SendOutcome::Accepted { .. } => Delivery::Confirmed,
            SendOutcome::Rejected { .. } | SendOutcome::TimedOut => Delivery::Failed,
        };
        Some(Resolved {
            receiver: entry.receiver.clone(),
            delivery: entry.state,
        })
    }

    /// Resolve a pending entry via the authoritative-echo path.
    ///
    /// Equivalent to a successful [`resolve`](Self::resolve); the caller
    /// additionally adopts the echo's server id and timestamp onto the
    /// thread message. Returns the receiver, or `None` as a no-op for an
    /// unknown or already-terminal `RefId`.
    pub fn supersede(&mut self, ref_id: RefId) -> Option<UserId> {
        let entry = self.entries.get_mut(&ref_id)?;
        if entry.state != Delivery::Pending {
            return None;
        }
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.state = Delivery::Confirmed;
        Some(entry.receiver.clone())
    }

    /// Whether `ref_id` is known and still pending.
    #[must_use]
    pub fn is_pending(&self, ref_id: RefId) -> bool {
        self.entries
            .get(&ref_id)
            .is_some_and(|e| e.state == Delivery::Pending)
    }

    /// Whether `ref_id` was ever registered here, pending or terminal.
    ///
    /// Distinguishes a late echo of an already-resolved send (known,
    /// terminal -- discard) from an echo of a send made by another tab
    /// of the same user (unknown here -- admit).
    #[must_use]
    pub fn contains(&self, ref_id: RefId) -> bool {
        self.entries.contains_key(&ref_id)
    }

    /// Number of entries still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.state == Delivery::Pending)
            .count()
    }

    /// Teardown: abort every outstanding timer and drop all entries.
    ///
    /// Returns how many entries were still pending. No pending entry
    /// survives this call.
    pub fn discard_all(&mut self) -> usize {
        let mut pending = 0;
        for entry in self.entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            if entry.state == Delivery::Pending {
                pending += 1;
            }
        }
        self.entries.clear();
        pending
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Arm the single-shot delivery timer for one send.
///
/// After `timeout` the task posts the `RefId` back into the session
/// actor, which fails the entry if it is still pending. Resolution via
/// ack or echo aborts the task instead.
pub fn arm_delivery_timer(
    ref_id: RefId,
    timeout: Duration,
    tick_tx: mpsc::Sender<RefId>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        // Receiver gone means the session is shutting down; nothing to do.
        let _ = tick_tx.send(ref_id).await;
    })
}
