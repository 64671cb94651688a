//! Real-time chat delivery client for the DocEase platform.
//!
//! This module is organized into:
//! - `types`: Identifiers, messages, conversations and push frames
//! - `config` / `error`: Client configuration and error type
//! - `session`: Authenticated user and token persistence
//! - `api`: REST seam and its `reqwest` implementation
//! - `connection`: Push socket supervision with fixed-delay reconnect
//! - `conversations`: Wholesale-refreshed conversation list
//! - `stream`: Ordered messages of the open conversation
//! - `receipts`: Forward-only status tracking and read acknowledgements
//! - `send`: Single-flight send gate and upload ceiling
//! - `client`: Orchestration of all of the above for one session

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod conversations;
pub mod error;
pub mod events;
pub mod receipts;
pub mod send;
pub mod session;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types for convenience
pub use api::{ApiFuture, ChatApi, HttpChatApi};
pub use client::ChatClient;
pub use config::{ChatConfig, MAX_UPLOAD_BYTES};
pub use connection::{ConnectionManager, ConnectionState, PushSocket, SocketTransport, WsTransport};
pub use conversations::ConversationCache;
pub use error::{ChatError, ChatResult};
pub use events::{ChatEvent, NoticeLevel};
pub use receipts::{ReadTracker, StatusIndicator};
pub use send::{FileUpload, SendGate};
pub use session::{FileTokenStore, MemoryTokenStore, Session, TokenStore};
pub use stream::{AppendOutcome, LoadTicket, MessageStream};
pub use types::{
    Conversation, ConversationId, Message, MessageId, MessageStatus, MessageType, PushFrame,
    UserId, UserProfile, UserRole,
};
