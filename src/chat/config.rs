//! Configuration for the chat client.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::error::{ChatError, ChatResult};
use super::types::UserId;

/// Default REST API base URL.
const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Default upload ceiling.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024; // 10 MB

/// Environment variable overriding the REST API base URL.
const API_URL_ENV: &str = "DOCEASE_API_URL";
/// Environment variable overriding the push socket base URL.
const WS_URL_ENV: &str = "DOCEASE_WS_URL";
/// Environment variable overriding the token file location.
const TOKEN_FILE_ENV: &str = "DOCEASE_TOKEN_FILE";

/// Configuration for the chat client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatConfig {
    /// REST API base URL, including the `/api` prefix.
    pub api_base_url: String,
    /// Push socket base URL. Derived from the API origin when unset.
    pub ws_base_url: Option<String>,
    /// Request timeout.
    #[serde(with = "duration_serde")]
    pub request_timeout: Duration,
    /// Connection timeout.
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
    /// Delay before reconnecting after the socket closed.
    #[serde(with = "duration_serde")]
    pub reconnect_delay: Duration,
    /// Delay before reconnecting after the socket could not be opened.
    #[serde(with = "duration_serde")]
    pub connect_error_delay: Duration,
    /// Largest attachment accepted for upload (bytes).
    pub max_upload_bytes: u64,
    /// Where the bearer token is persisted.
    pub token_file: PathBuf,
    /// Capacity of the push frame and event channels.
    pub channel_capacity: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            ws_base_url: None,
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(3),
            connect_error_delay: Duration::from_secs(5),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            token_file: default_token_file(),
            channel_capacity: 256,
        }
    }
}

impl ChatConfig {
    /// Create a new config with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from `DOCEASE_*` environment variables.
    ///
    /// # Errors
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> ChatResult<Self> {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(API_URL_ENV) {
            config.api_base_url = url;
        }
        if let Ok(url) = std::env::var(WS_URL_ENV) {
            config.ws_base_url = Some(url);
        }
        if let Ok(path) = std::env::var(TOKEN_FILE_ENV) {
            config.token_file = PathBuf::from(path);
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the REST API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Set the push socket base URL.
    #[must_use]
    pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.ws_base_url = Some(url.into());
        self
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set both reconnect delays.
    #[must_use]
    pub const fn with_reconnect_delays(mut self, after_close: Duration, after_error: Duration) -> Self {
        self.reconnect_delay = after_close;
        self.connect_error_delay = after_error;
        self
    }

    /// Set the upload ceiling.
    #[must_use]
    pub const fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    /// Set the token file path.
    #[must_use]
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = path.into();
        self
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        let api = Url::parse(&self.api_base_url)?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "api_base_url must be http(s), got {}",
                api.scheme()
            )));
        }

        if let Some(ws) = &self.ws_base_url {
            let ws = Url::parse(ws)?;
            if !matches!(ws.scheme(), "ws" | "wss") {
                return Err(ChatError::Config(format!(
                    "ws_base_url must be ws(s), got {}",
                    ws.scheme()
                )));
            }
        }

        if self.max_upload_bytes == 0 {
            return Err(ChatError::Config("max_upload_bytes must be > 0".to_string()));
        }

        if self.channel_capacity == 0 {
            return Err(ChatError::Config("channel_capacity must be > 0".to_string()));
        }

        Ok(())
    }

    /// Absolute URL of a REST endpoint.
    #[must_use]
    pub fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Base URL of the push socket, derived from the API origin when unset.
    ///
    /// # Errors
    /// Returns an error if the API URL cannot be parsed.
    pub fn ws_base(&self) -> ChatResult<String> {
        if let Some(ws) = &self.ws_base_url {
            return Ok(ws.trim_end_matches('/').to_string());
        }

        let origin = Url::parse(&self.api_base_url)?.origin().ascii_serialization();
        if let Some(rest) = origin.strip_prefix("https://") {
            Ok(format!("wss://{rest}"))
        } else if let Some(rest) = origin.strip_prefix("http://") {
            Ok(format!("ws://{rest}"))
        } else {
            Err(ChatError::Config(format!(
                "cannot derive a socket URL from {}",
                self.api_base_url
            )))
        }
    }

    /// Per-user push channel URL.
    ///
    /// # Errors
    /// Returns an error if the resulting URL is invalid.
    pub fn socket_url(&self, user_id: &UserId) -> ChatResult<Url> {
        let raw = format!("{}/ws/chat/{user_id}", self.ws_base()?);
        Ok(Url::parse(&raw)?)
    }
}

/// Default token location: `$HOME/.docease/token`, or the working directory.
fn default_token_file() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(|_| PathBuf::from(".docease"), |home| PathBuf::from(home).join(".docease"))
        .join("token")
}

/// Serde module for Duration serialization.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
