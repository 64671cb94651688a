//! REST client for the chat endpoints of the DocEase backend.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::config::ChatConfig;
use super::error::{ChatError, ChatResult};
use super::send::FileUpload;
use super::types::{Conversation, ConversationId, Message, MessageId, MessageType, UserId, UserProfile};

/// Boxed future type for API operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Longest error body kept in [`ChatError::Status`].
const MAX_ERROR_BODY: usize = 512;

/// Trait abstraction over the chat REST endpoints.
pub trait ChatApi: Send + Sync {
    /// `GET /auth/me`: resolve the user behind the bearer token.
    fn current_user(&self) -> ApiFuture<'_, ChatResult<UserProfile>>;

    /// `GET /chat/conversations`.
    fn list_conversations(&self) -> ApiFuture<'_, ChatResult<Vec<Conversation>>>;

    /// `GET /chat/messages/{conversation_id}`.
    fn fetch_messages(&self, conversation_id: &ConversationId) -> ApiFuture<'_, ChatResult<Vec<Message>>>;

    /// `POST /chat/send` with a text body.
    fn send_text(&self, receiver_id: &UserId, content: &str) -> ApiFuture<'_, ChatResult<Message>>;

    /// `POST /chat/upload?receiver_id=..` with a multipart `file` field.
    fn upload_file(&self, receiver_id: &UserId, upload: FileUpload) -> ApiFuture<'_, ChatResult<Message>>;

    /// `PUT /chat/messages/{message_id}/read`.
    fn mark_read(&self, message_id: &MessageId) -> ApiFuture<'_, ChatResult<()>>;
}

#[derive(Debug, Serialize)]
struct SendTextRequest<'a> {
    receiver_id: &'a UserId,
    message_type: MessageType,
    content: &'a str,
}

/// `reqwest`-backed implementation of [`ChatApi`].
pub struct HttpChatApi {
    config: ChatConfig,
    client: reqwest::Client,
}

impl HttpChatApi {
    /// Create a client that authenticates every call with `token`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: ChatConfig, token: &str) -> ChatResult<Self> {
        let client = Self::build_client(&config, token)?;
        Ok(Self { config, client })
    }

    /// Build an HTTP client with the bearer header and timeouts.
    fn build_client(config: &ChatConfig, token: &str) -> ChatResult<reqwest::Client> {
        let mut headers = HeaderMap::new();

        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChatError::HttpClient(format!("invalid token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        if let Ok(ua) = HeaderValue::from_str(&format!("docease-chat/{}", env!("CARGO_PKG_VERSION"))) {
            headers.insert(USER_AGENT, ua);
        }

        reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ChatError::HttpClient(e.to_string()))
    }

    /// Map non-success statuses to errors.
    async fn check(response: reqwest::Response) -> ChatResult<reqwest::Response> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ChatError::Unauthorized);
        }
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(ChatError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a JSON body after checking the status.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ChatResult<T> {
        let bytes = Self::check(response).await?.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl ChatApi for HttpChatApi {
    fn current_user(&self) -> ApiFuture<'_, ChatResult<UserProfile>> {
        Box::pin(async move {
            let response = self.client.get(self.config.api_url("auth/me")).send().await?;
            Self::decode(response).await
        })
    }

    fn list_conversations(&self) -> ApiFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            let response = self
                .client
                .get(self.config.api_url("chat/conversations"))
                .send()
                .await?;
            let conversations: Vec<Conversation> = Self::decode(response).await?;
            debug!(count = conversations.len(), "Fetched conversations");
            Ok(conversations)
        })
    }

    fn fetch_messages(&self, conversation_id: &ConversationId) -> ApiFuture<'_, ChatResult<Vec<Message>>> {
        let url = self.config.api_url(&format!("chat/messages/{conversation_id}"));
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            Self::decode(response).await
        })
    }

    fn send_text(&self, receiver_id: &UserId, content: &str) -> ApiFuture<'_, ChatResult<Message>> {
        let receiver_id = receiver_id.clone();
        let content = content.to_string();
        Box::pin(async move {
            let body = SendTextRequest {
                receiver_id: &receiver_id,
                message_type: MessageType::Text,
                content: &content,
            };
            let response = self
                .client
                .post(self.config.api_url("chat/send"))
                .json(&body)
                .send()
                .await?;
            Self::decode(response).await
        })
    }

    fn upload_file(&self, receiver_id: &UserId, upload: FileUpload) -> ApiFuture<'_, ChatResult<Message>> {
        let receiver_id = receiver_id.clone();
        Box::pin(async move {
            let size = upload.size();
            let mut part = Part::bytes(upload.bytes).file_name(upload.file_name.clone());
            if let Some(content_type) = &upload.content_type {
                part = part
                    .mime_str(content_type)
                    .map_err(|e| ChatError::HttpClient(format!("invalid content type: {e}")))?;
            }
            let form = Form::new().part("file", part);

            debug!(file = %upload.file_name, size, receiver = %receiver_id, "Uploading attachment");
            let response = self
                .client
                .post(self.config.api_url("chat/upload"))
                .query(&[("receiver_id", receiver_id.as_str())])
                .multipart(form)
                .send()
                .await?;
            Self::decode(response).await
        })
    }

    fn mark_read(&self, message_id: &MessageId) -> ApiFuture<'_, ChatResult<()>> {
        let url = self.config.api_url(&format!("chat/messages/{message_id}/read"));
        Box::pin(async move {
            let response = self
                .client
                .put(url)
                .json(&serde_json::json!({}))
                .send()
                .await?;
            Self::check(response).await?;
            Ok(())
        })
    }
}
