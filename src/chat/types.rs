//! Wire and domain types for the chat client.
//!
//! Identifiers are opaque strings issued by the backend. They are wrapped
//! in newtypes so a `MessageId` can never be passed where a `UserId` is
//! expected.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declare a string newtype identifier with a consistent API.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            #[inline]
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// Borrow the raw identifier.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }
    };
}

define_string_id!(
    /// Identifier of a platform user (patient, doctor or admin).
    UserId
);

define_string_id!(
    /// Identifier of a two-party conversation.
    ConversationId
);

define_string_id!(
    /// Identifier of a single chat message.
    MessageId
);

/// Role of a platform user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// A patient booking appointments.
    Patient,
    /// A healthcare provider.
    Doctor,
    /// Platform administrator.
    Admin,
}

impl UserRole {
    /// Lowercase wire name of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
            Self::Admin => "admin",
        }
    }
}

/// The authenticated user, as returned by `GET /auth/me`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Login email.
    #[serde(default)]
    pub email: String,
    /// Platform role.
    pub role: UserRole,
}

/// Kind of payload carried by a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Inline image attachment.
    Image,
    /// Generic file attachment.
    File,
}

/// Delivery status of a message.
///
/// Variants are declared in lifecycle order so the derived `Ord` matches
/// `sent < delivered < read`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the server.
    #[default]
    Sent,
    /// Pushed to the receiver.
    Delivered,
    /// Acknowledged as read by the receiver.
    Read,
}

impl MessageStatus {
    /// Combine the current status with an observed one; never moves backwards.
    #[must_use]
    pub fn advance(self, observed: Self) -> Self {
        self.max(observed)
    }
}

/// A single chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Recipient of the message.
    pub receiver_id: UserId,
    /// Author display name, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Payload kind.
    #[serde(default)]
    pub message_type: MessageType,
    /// Text body for text messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Attachment file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Attachment size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Attachment URL relative to the backend origin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    /// Creation time on the server.
    #[serde(with = "timestamp_serde")]
    pub created_at: DateTime<Utc>,
    /// Delivery status as last reported by the server.
    #[serde(default)]
    pub status: MessageStatus,
}

impl Message {
    /// Whether this message was authored by `user`.
    #[must_use]
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    /// Whether the message carries an attachment rather than text.
    #[must_use]
    pub const fn is_attachment(&self) -> bool {
        matches!(self.message_type, MessageType::Image | MessageType::File)
    }

    /// One-line preview used in conversation lists.
    #[must_use]
    pub fn preview(&self) -> String {
        if self.is_attachment() {
            format!("📎 {}", self.file_name.as_deref().unwrap_or("File"))
        } else {
            self.content.clone().unwrap_or_default()
        }
    }
}

/// Summary of a two-party conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: ConversationId,
    /// Both participants.
    pub participants: Vec<UserId>,
    /// Display name of the other participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_participant_name: Option<String>,
    /// Role of the other participant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_participant_role: Option<UserRole>,
    /// Most recent message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<Message>,
    /// Time of the most recent activity.
    #[serde(default, with = "timestamp_serde::option")]
    pub last_message_at: Option<DateTime<Utc>>,
    /// Messages received by the current user and not yet read.
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// The participant that is not `me`.
    #[must_use]
    pub fn other_participant(&self, me: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != me)
    }

    /// Display label for the other participant.
    #[must_use]
    pub fn title(&self) -> &str {
        self.other_participant_name.as_deref().unwrap_or("Unknown User")
    }
}

/// Frame pushed by the server over the per-user socket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    /// A message was sent to or by the current user.
    NewMessage {
        /// The server-confirmed message.
        message: Message,
    },
    /// The other party started or stopped typing.
    Typing {
        /// Typing state.
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },
}

/// Serde module for backend timestamps.
///
/// The backend emits naive UTC timestamps (no offset); RFC 3339 is accepted too.
mod timestamp_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp {raw:?}: {e}"))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(ts: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match ts {
                Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
