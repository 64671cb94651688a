//! Conversation list cache.
//!
//! The server is authoritative: every refresh replaces the whole list and
//! the total unread count is recomputed from scratch. No merging.

use super::types::{Conversation, ConversationId};

/// Badge text shown when the unread total exceeds this value.
const BADGE_CAP: u32 = 9;

/// Cached list of the current user's conversations.
#[derive(Clone, Debug, Default)]
pub struct ConversationCache {
    conversations: Vec<Conversation>,
    total_unread: u32,
    refreshes: u64,
}

impl ConversationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a freshly fetched list.
    pub fn replace(&mut self, conversations: Vec<Conversation>) {
        self.total_unread = conversations
            .iter()
            .fold(0_u32, |acc, c| acc.saturating_add(c.unread_count));
        self.conversations = conversations;
        self.refreshes += 1;
    }

    /// All cached conversations in server order.
    #[must_use]
    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Look up a conversation by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| &c.id == id)
    }

    /// Sum of the per-conversation unread counts.
    #[must_use]
    pub const fn total_unread(&self) -> u32 {
        self.total_unread
    }

    /// Unread badge label, `None` when there is nothing unread.
    #[must_use]
    pub fn badge(&self) -> Option<String> {
        match self.total_unread {
            0 => None,
            n if n > BADGE_CAP => Some(format!("{BADGE_CAP}+")),
            n => Some(n.to_string()),
        }
    }

    /// Number of successful refreshes applied so far.
    #[must_use]
    pub const fn refresh_count(&self) -> u64 {
        self.refreshes
    }
}
