//! Error types for the chat client.

use thiserror::Error;

/// Errors that can occur in chat operations.
#[derive(Debug, Error)]
pub enum ChatError {
    /// HTTP request failed before a response was received.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// HTTP client configuration error.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    /// The server answered with a non-success status.
    #[error("server returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The bearer token was rejected or is missing.
    #[error("not authorized, log in again")]
    Unauthorized,

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON parsing error.
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Push socket failure.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The socket request could not be built (bad URL or request).
    #[error("cannot build socket request: {0}")]
    SocketConstruction(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Text send attempted with an empty or whitespace-only body.
    #[error("message is empty")]
    EmptyMessage,

    /// Send attempted with no conversation open.
    #[error("no conversation is open")]
    NoConversation,

    /// Conversation id not present in the cache.
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    /// A send or upload is already in flight.
    #[error("a message is already being sent")]
    SendInFlight,

    /// Attachment above the upload ceiling.
    #[error("file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge {
        /// Size of the rejected file.
        size: u64,
        /// Configured ceiling.
        limit: u64,
    },
}

impl ChatError {
    /// Check if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::HttpRequest(_) | Self::WebSocket(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the operation was rejected locally, before any network call.
    #[must_use]
    pub const fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Self::EmptyMessage
                | Self::NoConversation
                | Self::UnknownConversation(_)
                | Self::SendInFlight
                | Self::FileTooLarge { .. }
        )
    }
}

/// Convenience result alias for chat operations.
pub type ChatResult<T> = Result<T, ChatError>;
