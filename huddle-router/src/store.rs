//! In-memory message persistence.
//!
//! Messages are durably accepted here before the router acknowledges a
//! send. Conversations are keyed by the unordered user pair, capped with
//! FIFO eviction, and serve the history read path that seeds client
//! threads on conversation open.

use std::collections::{HashMap, VecDeque};

use tokio::sync::RwLock;

use huddle_proto::ident::{MessageId, Timestamp};

/// Default maximum number of retained messages per conversation.
const DEFAULT_MAX_CONVERSATION_LEN: usize = 10_000;

/// A persisted direct message.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoredMessage {
    /// Server-assigned message id.
    pub id: MessageId,
    /// Who sent the message.
    pub sender: String,
    /// Who it was addressed to.
    pub receiver: String,
    /// Message text.
    pub text: String,
    /// Server-assigned timestamp.
    pub timestamp: Timestamp,
    /// Whether the receiver has read it.
    pub read: bool,
}

/// Conversation-keyed in-memory message store with FIFO eviction.
pub struct MessageStore {
    conversations: RwLock<HashMap<(String, String), VecDeque<StoredMessage>>>,
    max_conversation_len: usize,
}

/// Unordered conversation key for a user pair.
fn conversation_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl MessageStore {
    /// Creates an empty store with the default conversation cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_conversation_len(DEFAULT_MAX_CONVERSATION_LEN)
    }

    /// Creates an empty store with a custom conversation cap.
    #[must_use]
    pub fn with_max_conversation_len(max_conversation_len: usize) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_conversation_len,
        }
    }

    /// Persist a message, assigning its id and timestamp.
    ///
    /// When the conversation exceeds the cap, the oldest message is
    /// evicted (FIFO).
    pub async fn append(&self, sender: &str, receiver: &str, text: &str) -> StoredMessage {
        let stored = StoredMessage {
            id: MessageId::new(),
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            text: text.to_string(),
            timestamp: Timestamp::now(),
            read: false,
        };

        let mut conversations = self.conversations.write().await;
        let queue = conversations
            .entry(conversation_key(sender, receiver))
            .or_default();
        queue.push_back(stored.clone());
        if queue.len() > self.max_conversation_len {
            queue.pop_front();
        }
        drop(conversations);

        stored
    }

    /// Mark all messages `from -> to` as read. Returns how many changed.
    pub async fn mark_read(&self, from: &str, to: &str) -> usize {
        let mut conversations = self.conversations.write().await;
        let Some(queue) = conversations.get_mut(&conversation_key(from, to)) else {
            return 0;
        };
        let mut changed = 0;
        for msg in queue
            .iter_mut()
            .filter(|m| m.sender == from && m.receiver == to && !m.read)
        {
            msg.read = true;
            changed += 1;
        }
        changed
    }

    /// The conversation between two users, oldest first, truncated to the
    /// most recent `limit` messages.
    pub async fn conversation(&self, a: &str, b: &str, limit: usize) -> Vec<StoredMessage> {
        let conversations = self.conversations.read().await;
        let Some(queue) = conversations.get(&conversation_key(a, b)) else {
            return Vec::new();
        };
        let skip = queue.len().saturating_sub(limit);
        queue.iter().skip(skip).cloned().collect()
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
