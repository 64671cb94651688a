//! Delivery and read-state bookkeeping.

use dashmap::{DashMap, DashSet};

use super::types::{Message, MessageId, MessageStatus, UserId};

/// How a status is rendered next to an outgoing message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusIndicator {
    /// One check mark.
    SingleCheck,
    /// Two check marks; `accent` is set once the message was read.
    DoubleCheck {
        /// Highlight colour instead of the neutral one.
        accent: bool,
    },
}

impl StatusIndicator {
    /// Indicator for `status`.
    #[must_use]
    pub const fn for_status(status: MessageStatus) -> Self {
        match status {
            MessageStatus::Sent => Self::SingleCheck,
            MessageStatus::Delivered => Self::DoubleCheck { accent: false },
            MessageStatus::Read => Self::DoubleCheck { accent: true },
        }
    }

    /// Text glyph for console rendering.
    #[must_use]
    pub const fn glyph(self) -> &'static str {
        match self {
            Self::SingleCheck => "✓",
            Self::DoubleCheck { accent: false } => "✓✓",
            Self::DoubleCheck { accent: true } => "✓✓*",
        }
    }
}

/// Per-message status, forward-only, plus the set of acknowledged messages.
#[derive(Debug, Default)]
pub struct ReadTracker {
    statuses: DashMap<MessageId, MessageStatus>,
    acknowledged: DashSet<MessageId>,
}

impl ReadTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed status and return the resulting one.
    ///
    /// A status lower than one already seen is ignored.
    pub fn observe(&self, id: &MessageId, status: MessageStatus) -> MessageStatus {
        let mut entry = self.statuses.entry(id.clone()).or_insert(status);
        let next = entry.advance(status);
        *entry = next;
        next
    }

    /// Record the status carried by a message.
    pub fn observe_message(&self, message: &Message) -> MessageStatus {
        self.observe(&message.id, message.status)
    }

    /// Highest status seen for `id`.
    #[must_use]
    pub fn status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.statuses.get(id).map(|s| *s)
    }

    /// Whether `message` still needs a read acknowledgement from `me`.
    ///
    /// Returns `true` at most once per message id, and never for messages
    /// `me` sent.
    pub fn should_acknowledge(&self, message: &Message, me: &UserId) -> bool {
        if message.is_from(me) {
            return false;
        }
        self.acknowledged.insert(message.id.clone())
    }

    /// Number of messages with a tracked status.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// Whether nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty() && self.acknowledged.is_empty()
    }

    /// Forget everything. Called whenever the open stream changes.
    pub fn clear(&self) {
        self.statuses.clear();
        self.acknowledged.clear();
    }
}
