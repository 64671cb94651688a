//! Events published by the chat client to its front end.

use serde::{Deserialize, Serialize};

use super::types::{ConversationId, Message};

/// Severity of a user-visible notice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    /// Operation succeeded.
    Success,
    /// Operation failed or was rejected.
    Error,
}

/// Everything a front end needs to redraw.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Non-blocking toast.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Text shown to the user.
        message: String,
    },
    /// The push socket went online or offline.
    ConnectionChanged {
        /// New state.
        online: bool,
    },
    /// The other party started or stopped typing.
    Typing {
        /// Typing state.
        is_typing: bool,
    },
    /// A conversation was selected (or deselected) and its stream cleared.
    StreamReset {
        /// The newly open conversation.
        conversation_id: Option<ConversationId>,
    },
    /// History of the open conversation finished loading.
    StreamLoaded {
        /// The loaded conversation.
        conversation_id: ConversationId,
        /// Number of messages now shown.
        count: usize,
    },
    /// A message was appended to the open stream.
    MessageAppended {
        /// The appended message.
        message: Message,
    },
    /// The view should scroll to the newest message.
    ScrollToEnd {
        /// Scroll epoch; strictly increasing.
        epoch: u64,
    },
    /// The conversation list was refreshed.
    ConversationsUpdated {
        /// New unread total.
        total_unread: u32,
    },
}

impl ChatEvent {
    /// Error notice.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    /// Success notice.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self::Notice {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }
}
