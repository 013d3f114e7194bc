//! Read-receipt signaling and tracking.
//!
//! Outbound: [`ReadTracker::mark_read`] decides whether a read signal
//! should go to the router at all -- only when the active thread actually
//! holds unread messages, so repeated calls are idempotent and quiet.
//! Inbound: [`ReadTracker::on_peer_read`] flips the read flag on the
//! local user's messages and remembers which peers have read them; no
//! delivery state is touched. Nothing renders this yet, but the state
//! must not be lost.

use std::collections::HashSet;

use huddle_proto::ident::UserId;

use crate::thread::ThreadStore;

/// Tracks read state in both directions for one session.
pub struct ReadTracker {
    /// Peers that have confirmed reading the local user's messages.
    read_by: HashSet<UserId>,
}

impl ReadTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            read_by: HashSet::new(),
        }
    }

    /// Mark `peer`'s messages read locally.
    ///
    /// Returns `true` if anything was unread -- the caller should then
    /// send `MarkMessagesRead` upstream. Safe to call repeatedly; once
    /// everything is read it returns `false` and no signal is sent.
    pub fn mark_read(threads: &mut ThreadStore, peer: &UserId) -> bool {
        threads.mark_from_peer_read(peer) > 0
    }

    /// A peer reports having read the local user's messages.
    ///
    /// Returns how many thread messages changed.
    pub fn on_peer_read(&mut self, threads: &mut ThreadStore, by: &UserId) -> usize {
        self.read_by.insert(by.clone());
        threads.mark_read_by(by)
    }

    /// Whether `peer` has read the local user's messages at least once.
    #[must_use]
    pub fn has_read(&self, peer: &UserId) -> bool {
        self.read_by.contains(peer)
    }
}

impl Default for ReadTracker {
    fn default() -> Self {
        Self::new()
    }
}
