//! The chat client: owns every piece of chat state for one session.
//!
//! Network calls never run under a lock. Push frames are consumed by a
//! dispatcher task that only holds a weak reference to the client, so
//! dropping the last [`ChatClient`] handle tears everything down.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::api::ChatApi;
use super::config::ChatConfig;
use super::connection::{ConnectionManager, ConnectionState, SocketTransport};
use super::conversations::ConversationCache;
use super::error::{ChatError, ChatResult};
use super::events::ChatEvent;
use super::receipts::ReadTracker;
use super::send::{FileUpload, SendGate, check_file_size, validate_text};
use super::session::Session;
use super::stream::{AppendOutcome, MessageStream};
use super::types::{Conversation, ConversationId, Message, MessageId, MessageStatus, PushFrame, UserId};

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Handle to a running chat client. Cheap to clone.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    api: Arc<dyn ChatApi>,
    session: Session,
    config: ChatConfig,
    connection: ConnectionManager,
    conversations: RwLock<ConversationCache>,
    stream: RwLock<MessageStream>,
    receipts: ReadTracker,
    gate: SendGate,
    typing: AtomicBool,
    events: broadcast::Sender<ChatEvent>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.get_mut().take() {
            handle.abort();
        }
    }
}

impl ChatClient {
    /// Create a client for `session`.
    ///
    /// Nothing is fetched or connected until [`ChatClient::start`].
    ///
    /// # Errors
    /// Returns an error if `config` is invalid.
    pub fn new(
        api: Arc<dyn ChatApi>,
        session: Session,
        transport: Arc<dyn SocketTransport>,
        config: ChatConfig,
    ) -> ChatResult<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.channel_capacity);
        let connection = ConnectionManager::new(transport, config.clone());
        Ok(Self {
            inner: Arc::new(ClientInner {
                api,
                session,
                config,
                connection,
                conversations: RwLock::new(ConversationCache::new()),
                stream: RwLock::new(MessageStream::new()),
                receipts: ReadTracker::new(),
                gate: SendGate::new(),
                typing: AtomicBool::new(false),
                events,
                dispatcher: Mutex::new(None),
            }),
        })
    }

    /// Connect the push channel, start dispatching frames and load the
    /// conversation list.
    ///
    /// # Errors
    /// Returns an error if the socket URL cannot be built. A failed initial
    /// fetch is reported as a notice only.
    pub async fn start(&self) -> ChatResult<()> {
        let (frames_tx, frames_rx) = mpsc::channel(self.inner.config.channel_capacity);
        let states = self.inner.connection.subscribe();
        self.inner
            .connection
            .connect(self.inner.session.user_id(), frames_tx)
            .await?;

        let handle = tokio::spawn(dispatch(Arc::downgrade(&self.inner), frames_rx, states));
        if let Some(previous) = self.inner.dispatcher.lock().await.replace(handle) {
            previous.abort();
        }
        info!(user_id = %self.inner.session.user_id(), "Chat client started");

        if let Err(err) = self.fetch_conversations().await {
            debug!(%err, "Initial conversation fetch failed");
        }
        Ok(())
    }

    /// Stop the push channel and the dispatcher.
    pub async fn shutdown(&self) {
        self.inner.connection.shutdown().await;
        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            handle.abort();
        }
        info!("Chat client stopped");
    }

    /// Shut down and forget the persisted token.
    ///
    /// # Errors
    /// Returns an error if the token cannot be removed.
    pub async fn logout(&self) -> ChatResult<()> {
        self.shutdown().await;
        {
            let mut stream = self.inner.stream.write().await;
            stream.close();
            self.inner.receipts.clear();
        }
        self.inner.conversations.write().await.replace(Vec::new());
        self.emit(ChatEvent::ConversationsUpdated { total_unread: 0 });
        self.inner.session.clone().logout().await
    }

    /// Subscribe to client events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// The session this client runs for.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    // ------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------

    /// Reload the conversation list from the server.
    ///
    /// # Errors
    /// Returns the request error; the cache is left untouched in that case.
    pub async fn fetch_conversations(&self) -> ChatResult<()> {
        match self.inner.api.list_conversations().await {
            Ok(list) => {
                let count = list.len();
                let (total_unread, refresh) = {
                    let mut cache = self.inner.conversations.write().await;
                    cache.replace(list);
                    (cache.total_unread(), cache.refresh_count())
                };
                debug!(count, total_unread, refresh, "Conversations refreshed");
                self.emit(ChatEvent::ConversationsUpdated { total_unread });
                Ok(())
            }
            Err(err) => {
                warn!(%err, "Failed to load conversations");
                self.emit(ChatEvent::error("Failed to load conversations"));
                Err(err)
            }
        }
    }

    /// Open `conversation` and load its history.
    ///
    /// The stream is cleared before the fetch starts. If another
    /// conversation is opened before this fetch returns, its result is
    /// discarded.
    ///
    /// # Errors
    /// Returns the request error.
    pub async fn open_conversation(&self, conversation: Conversation) -> ChatResult<()> {
        let conversation_id = conversation.id.clone();
        let ticket = {
            let mut stream = self.inner.stream.write().await;
            self.inner.receipts.clear();
            stream.begin_open(conversation)
        };
        self.inner.typing.store(false, Ordering::Release);
        self.emit(ChatEvent::StreamReset {
            conversation_id: Some(conversation_id.clone()),
        });
        info!(%conversation_id, "Opening conversation");

        match self.inner.api.fetch_messages(ticket.conversation_id()).await {
            Ok(history) => {
                let loaded = {
                    let mut stream = self.inner.stream.write().await;
                    stream.finish_open(&ticket, history).then(|| {
                        for message in stream.messages() {
                            self.inner.receipts.observe_message(message);
                        }
                        (stream.messages().len(), stream.scroll_epoch())
                    })
                };
                match loaded {
                    Some((count, epoch)) => {
                        self.emit(ChatEvent::StreamLoaded {
                            conversation_id,
                            count,
                        });
                        self.emit(ChatEvent::ScrollToEnd { epoch });
                    }
                    None => debug!(%conversation_id, "Discarding stale history"),
                }
                Ok(())
            }
            Err(err) => {
                warn!(%err, %conversation_id, "Failed to load messages");
                if self.inner.stream.write().await.fail_open(&ticket) {
                    self.emit(ChatEvent::error("Failed to load messages"));
                }
                Err(err)
            }
        }
    }

    /// Open a cached conversation by id.
    ///
    /// # Errors
    /// Returns [`ChatError::UnknownConversation`] if it is not cached, or the
    /// request error.
    pub async fn open_conversation_by_id(&self, id: &ConversationId) -> ChatResult<()> {
        let conversation = self
            .inner
            .conversations
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::UnknownConversation(id.to_string()))?;
        self.open_conversation(conversation).await
    }

    /// Deselect the open conversation.
    pub async fn close_conversation(&self) {
        {
            let mut stream = self.inner.stream.write().await;
            stream.close();
            self.inner.receipts.clear();
        }
        self.inner.typing.store(false, Ordering::Release);
        self.emit(ChatEvent::StreamReset {
            conversation_id: None,
        });
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    /// Send a text message to the other participant of the open conversation.
    ///
    /// The caller should clear its input when this returns `Ok`.
    ///
    /// # Errors
    /// Local rejections ([`ChatError::EmptyMessage`],
    /// [`ChatError::NoConversation`], [`ChatError::SendInFlight`]) make no
    /// network call. Request failures are also reported as a notice.
    pub async fn send_text(&self, body: &str) -> ChatResult<Message> {
        let content = validate_text(body)?;
        let receiver = self.receiver().await?;

        let result = {
            let _permit = self.inner.gate.try_acquire().ok_or(ChatError::SendInFlight)?;
            self.inner.api.send_text(&receiver, content).await
        };

        match result {
            Ok(message) => {
                info!(message_id = %message.id, "Message sent");
                self.after_send(message.clone()).await;
                Ok(message)
            }
            Err(err) => {
                warn!(%err, "Failed to send message");
                self.emit(ChatEvent::error("Failed to send message"));
                Err(err)
            }
        }
    }

    /// Upload an attachment to the other participant of the open conversation.
    ///
    /// # Errors
    /// Returns [`ChatError::FileTooLarge`] (with a notice) above the upload
    /// ceiling, [`ChatError::NoConversation`] or [`ChatError::SendInFlight`]
    /// without any network call, or the request error.
    pub async fn send_file(&self, upload: FileUpload) -> ChatResult<Message> {
        let receiver = self.receiver().await?;
        if let Err(err) = check_file_size(upload.size(), self.inner.config.max_upload_bytes) {
            self.reject_oversized();
            return Err(err);
        }

        let file_name = upload.file_name.clone();
        let result = {
            let _permit = self.inner.gate.try_acquire().ok_or(ChatError::SendInFlight)?;
            self.inner.api.upload_file(&receiver, upload).await
        };

        match result {
            Ok(message) => {
                info!(message_id = %message.id, %file_name, "File sent");
                self.after_send(message.clone()).await;
                self.emit(ChatEvent::success("File sent successfully!"));
                Ok(message)
            }
            Err(err) => {
                warn!(%err, %file_name, "Failed to send file");
                self.emit(ChatEvent::error("Failed to send file"));
                Err(err)
            }
        }
    }

    /// Read a file from disk and upload it.
    ///
    /// Oversized files are rejected from their metadata, before being read.
    ///
    /// # Errors
    /// Same as [`ChatClient::send_file`], plus IO errors.
    pub async fn send_file_path(&self, path: &Path) -> ChatResult<Message> {
        self.receiver().await?;
        let upload = match FileUpload::from_path(path, self.inner.config.max_upload_bytes).await {
            Ok(upload) => upload,
            Err(err @ ChatError::FileTooLarge { .. }) => {
                self.reject_oversized();
                return Err(err);
            }
            Err(err) => return Err(err),
        };
        self.send_file(upload).await
    }

    /// Acknowledge `message_id` as read. Failures are logged and ignored.
    pub async fn mark_read(&self, message_id: &MessageId) {
        match self.inner.api.mark_read(message_id).await {
            Ok(()) => {
                // The stream may have moved on while the call was in flight.
                if self.inner.stream.read().await.contains(message_id) {
                    self.inner.receipts.observe(message_id, MessageStatus::Read);
                }
                debug!(%message_id, "Marked as read");
            }
            Err(err) => warn!(%err, %message_id, "Error marking message as read"),
        }
    }

    async fn receiver(&self) -> ChatResult<UserId> {
        let me = self.inner.session.user_id();
        self.inner
            .stream
            .read()
            .await
            .selected()
            .and_then(|c| c.other_participant(me).cloned())
            .ok_or(ChatError::NoConversation)
    }

    async fn after_send(&self, message: Message) {
        self.append(message, false).await;
        if let Err(err) = self.fetch_conversations().await {
            debug!(%err, "Refresh after send failed");
        }
    }

    fn reject_oversized(&self) {
        let limit_mb = self.inner.config.max_upload_bytes / BYTES_PER_MB;
        self.emit(ChatEvent::error(format!("File size must be less than {limit_mb}MB")));
    }

    // ------------------------------------------------------------------
    // Push frames
    // ------------------------------------------------------------------

    async fn handle_frame(&self, frame: PushFrame) {
        match frame {
            PushFrame::NewMessage { message } => self.receive(message).await,
            PushFrame::Typing { is_typing } => {
                self.inner.typing.store(is_typing, Ordering::Release);
                self.emit(ChatEvent::Typing { is_typing });
            }
        }
    }

    async fn receive(&self, message: Message) {
        let me = self.inner.session.user_id();
        let ack = (self.append(message.clone(), true).await == AppendOutcome::Appended)
            && self.inner.receipts.should_acknowledge(&message, me);
        if ack {
            self.mark_read(&message.id).await;
        }

        if let Err(err) = self.fetch_conversations().await {
            debug!(%err, "Refresh after push failed");
        }
    }

    async fn append(&self, message: Message, remote: bool) -> AppendOutcome {
        let (outcome, epoch) = {
            let mut stream = self.inner.stream.write().await;
            let outcome = if remote {
                stream.append_remote(message.clone())
            } else {
                stream.append_local(message.clone())
            };
            if outcome == AppendOutcome::Appended {
                self.inner.receipts.observe_message(&message);
            }
            (outcome, stream.scroll_epoch())
        };
        match outcome {
            AppendOutcome::Appended => {
                self.emit(ChatEvent::MessageAppended { message });
                self.emit(ChatEvent::ScrollToEnd { epoch });
            }
            AppendOutcome::Duplicate => debug!(message_id = %message.id, "Skipping duplicate message"),
            AppendOutcome::NotOpen => {}
        }
        outcome
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Messages of the open conversation, with the best known status.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner
            .stream
            .read()
            .await
            .messages()
            .iter()
            .cloned()
            .map(|mut message| {
                message.status = self.status_of(&message);
                message
            })
            .collect()
    }

    /// Best known status of `message`: its own, raised by any tracked update.
    #[must_use]
    pub fn status_of(&self, message: &Message) -> MessageStatus {
        self.inner
            .receipts
            .status(&message.id)
            .map_or(message.status, |tracked| message.status.advance(tracked))
    }

    /// Cached conversations.
    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.conversations.read().await.list().to_vec()
    }

    /// The open conversation.
    pub async fn selected(&self) -> Option<Conversation> {
        self.inner.stream.read().await.selected().cloned()
    }

    /// Whether a history load is in flight.
    pub async fn is_loading(&self) -> bool {
        self.inner.stream.read().await.is_loading()
    }

    /// Total unread count across conversations.
    pub async fn unread_count(&self) -> u32 {
        self.inner.conversations.read().await.total_unread()
    }

    /// Unread badge label.
    pub async fn unread_badge(&self) -> Option<String> {
        self.inner.conversations.read().await.badge()
    }

    /// Whether a send is in flight.
    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.inner.gate.is_busy()
    }

    /// Whether the push socket is open.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.connection.is_online()
    }

    /// Whether the other party is typing.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.inner.typing.load(Ordering::Acquire)
    }

    /// Connection attempts made so far.
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.connection.connect_attempts()
    }

    /// Current push connection state, including the last socket error.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("session", &self.inner.session)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

/// Route push frames and connection changes to the client until either
/// source closes or the client is dropped.
async fn dispatch(
    client: Weak<ClientInner>,
    mut frames: mpsc::Receiver<PushFrame>,
    mut states: watch::Receiver<ConnectionState>,
) {
    let mut online = false;
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let Some(inner) = client.upgrade() else { break };
                ChatClient { inner }.handle_frame(frame).await;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let now = states.borrow_and_update().online;
                if now == online {
                    continue;
                }
                online = now;
                let Some(inner) = client.upgrade() else { break };
                ChatClient { inner }.emit(ChatEvent::ConnectionChanged { online });
            }
        }
    }
    debug!("Chat dispatcher exited");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::chat::config::MAX_UPLOAD_BYTES;
    use crate::chat::events::NoticeLevel;
    use crate::chat::session::MemoryTokenStore;
    use crate::chat::testing::{
        FakeApi, ScriptedTransport, SocketScript, conversation, message, patient, wait_until,
    };

    async fn client(api: &Arc<FakeApi>, scripts: Vec<SocketScript>) -> ChatClient {
        let session = Session::establish(patient(), "tok", Arc::new(MemoryTokenStore::new()))
            .await
            .expect("session");
        let transport = Arc::new(ScriptedTransport::new(scripts));
        ChatClient::new(
            Arc::clone(api) as Arc<dyn ChatApi>,
            session,
            transport,
            ChatConfig::new().with_ws_base_url("ws://push.test"),
        )
        .expect("client")
    }

    fn api_with_conversations() -> Arc<FakeApi> {
        let api = Arc::new(FakeApi::new());
        api.set_conversations(vec![
            conversation("c1", "p1", "d1", 1),
            conversation("c2", "p1", "d2", 2),
        ]);
        api
    }

    fn ids(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.id.as_str()).collect()
    }

    fn drain(events: &mut broadcast::Receiver<ChatEvent>) -> Vec<ChatEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    fn notices(events: &[ChatEvent]) -> Vec<(NoticeLevel, &str)> {
        events
            .iter()
            .filter_map(|e| match e {
                ChatEvent::Notice { level, message } => Some((*level, message.as_str())),
                _ => None,
            })
            .collect()
    }

    async fn open(client: &ChatClient, id: &str) {
        client.fetch_conversations().await.expect("fetch");
        client
            .open_conversation_by_id(&ConversationId::new(id))
            .await
            .expect("open");
    }

    #[tokio::test]
    async fn test_fetch_conversations_totals_unread() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;

        client.fetch_conversations().await.expect("fetch");
        assert_eq!(client.conversations().await.len(), 2);
        assert_eq!(client.unread_count().await, 3);
        assert_eq!(client.unread_badge().await.as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_cache() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        client.fetch_conversations().await.expect("fetch");
        let mut events = client.subscribe();

        api.fail_list(true);
        assert!(client.fetch_conversations().await.is_err());
        assert_eq!(client.conversations().await.len(), 2);
        assert_eq!(
            notices(&drain(&mut events)),
            vec![(NoticeLevel::Error, "Failed to load conversations")]
        );
    }

    #[tokio::test]
    async fn test_last_selection_wins() {
        let api = api_with_conversations();
        api.set_history("c1", vec![message("a1", "c1", "d1", "p1")]);
        api.set_history("c2", vec![message("b1", "c2", "d2", "p1")]);
        let slow = api.gate_history("c1");
        let client = client(&api, vec![]).await;
        client.fetch_conversations().await.expect("fetch");

        let first = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .open_conversation_by_id(&ConversationId::new("c1"))
                    .await
            })
        };
        wait_until(|| api.fetches().len() == 1).await;
        assert!(client.is_loading().await);
        assert!(client.messages().await.is_empty());

        client
            .open_conversation_by_id(&ConversationId::new("c2"))
            .await
            .expect("open c2");
        slow.notify_one();
        first.await.expect("join").expect("stale load still succeeds");

        let selected = client.selected().await.expect("selected");
        assert_eq!(selected.id.as_str(), "c2");
        assert_eq!(ids(&client.messages().await), vec!["b1"]);
        assert!(!client.is_loading().await);
    }

    #[tokio::test]
    async fn test_history_failure_clears_loading() {
        let api = api_with_conversations();
        api.fail_history(true);
        let client = client(&api, vec![]).await;
        client.fetch_conversations().await.expect("fetch");
        let mut events = client.subscribe();

        let result = client.open_conversation_by_id(&ConversationId::new("c1")).await;
        assert!(result.is_err());
        assert!(!client.is_loading().await);
        assert_eq!(
            notices(&drain(&mut events)),
            vec![(NoticeLevel::Error, "Failed to load messages")]
        );
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        let result = client.open_conversation_by_id(&ConversationId::new("zz")).await;
        assert!(matches!(result, Err(ChatError::UnknownConversation(_))));
        assert!(api.fetches().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read_once_per_inbound_message() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let lists_before = api.list_calls();

        let inbound = message("m1", "c1", "d1", "p1");
        client
            .handle_frame(PushFrame::NewMessage { message: inbound.clone() })
            .await;
        client
            .handle_frame(PushFrame::NewMessage { message: inbound })
            .await;
        client
            .handle_frame(PushFrame::NewMessage {
                message: message("m2", "c1", "p1", "d1"),
            })
            .await;
        client
            .handle_frame(PushFrame::NewMessage {
                message: message("m3", "c2", "d2", "p1"),
            })
            .await;

        assert_eq!(api.reads(), vec![MessageId::new("m1")]);
        assert_eq!(ids(&client.messages().await), vec!["m1", "m2"]);
        assert_eq!(client.messages().await[0].status, MessageStatus::Read);
        // Every push refreshes the list, including the one for another conversation.
        assert_eq!(api.list_calls(), lists_before + 4);
    }

    #[tokio::test]
    async fn test_read_failure_is_swallowed() {
        let api = api_with_conversations();
        api.fail_read(true);
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let mut events = client.subscribe();

        client
            .handle_frame(PushFrame::NewMessage {
                message: message("m1", "c1", "d1", "p1"),
            })
            .await;

        assert_eq!(api.reads().len(), 1);
        assert_eq!(ids(&client.messages().await), vec!["m1"]);
        assert_eq!(client.messages().await[0].status, MessageStatus::Sent);
        assert!(notices(&drain(&mut events)).is_empty());
    }

    #[tokio::test]
    async fn test_typing_frame() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        client.handle_frame(PushFrame::Typing { is_typing: true }).await;
        assert!(client.is_typing());
        client.handle_frame(PushFrame::Typing { is_typing: false }).await;
        assert!(!client.is_typing());
    }

    #[tokio::test]
    async fn test_blank_text_makes_no_call() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;

        assert!(matches!(
            client.send_text("hello").await,
            Err(ChatError::NoConversation)
        ));
        open(&client, "c1").await;
        for body in ["", "   ", "\n\t "] {
            assert!(matches!(
                client.send_text(body).await,
                Err(ChatError::EmptyMessage)
            ));
        }
        assert_eq!(api.send_calls(), 0);
        assert!(!client.is_sending());
    }

    #[tokio::test]
    async fn test_oversized_file_makes_no_call() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let mut events = client.subscribe();

        let upload = FileUpload::new("scan.bin", vec![0_u8; usize::try_from(MAX_UPLOAD_BYTES + 1).expect("fits")]);
        assert!(matches!(
            client.send_file(upload).await,
            Err(ChatError::FileTooLarge { .. })
        ));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("huge.pdf");
        std::fs::File::create(&path)
            .expect("create")
            .set_len(MAX_UPLOAD_BYTES + 1)
            .expect("set_len");
        assert!(matches!(
            client.send_file_path(&path).await,
            Err(ChatError::FileTooLarge { .. })
        ));

        assert_eq!(api.upload_calls(), 0);
        assert_eq!(
            notices(&drain(&mut events)),
            vec![
                (NoticeLevel::Error, "File size must be less than 10MB"),
                (NoticeLevel::Error, "File size must be less than 10MB"),
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_once_per_successful_send() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let mut events = client.subscribe();

        let before = api.list_calls();
        let sent = client.send_text("  Hello doctor  ").await.expect("send");
        assert_eq!(sent.content.as_deref(), Some("Hello doctor"));
        assert_eq!(api.list_calls(), before + 1);

        let upload = FileUpload::new("lab.pdf", vec![1, 2, 3]);
        let file = client.send_file(upload).await.expect("upload");
        assert_eq!(file.file_name.as_deref(), Some("lab.pdf"));
        assert_eq!(api.list_calls(), before + 2);

        assert_eq!(
            ids(&client.messages().await),
            vec![sent.id.as_str(), file.id.as_str()]
        );
        assert_eq!(
            notices(&drain(&mut events)),
            vec![(NoticeLevel::Success, "File sent successfully!")]
        );
    }

    #[tokio::test]
    async fn test_failed_send_leaves_state_unchanged() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let mut events = client.subscribe();
        api.fail_send(true);

        let before = api.list_calls();
        assert!(client.send_text("hi").await.is_err());
        assert!(client.send_file(FileUpload::new("a.txt", vec![1])).await.is_err());

        assert_eq!(api.list_calls(), before);
        assert!(client.messages().await.is_empty());
        assert!(!client.is_sending());
        assert_eq!(
            notices(&drain(&mut events)),
            vec![
                (NoticeLevel::Error, "Failed to send message"),
                (NoticeLevel::Error, "Failed to send file"),
            ]
        );
    }

    #[tokio::test]
    async fn test_sends_are_single_flight() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let release = api.gate_sends();

        let pending = {
            let client = client.clone();
            tokio::spawn(async move { client.send_text("first").await })
        };
        wait_until(|| api.send_calls() == 1).await;
        assert!(client.is_sending());

        assert!(matches!(
            client.send_text("second").await,
            Err(ChatError::SendInFlight)
        ));
        assert!(matches!(
            client.send_file(FileUpload::new("a.txt", vec![1])).await,
            Err(ChatError::SendInFlight)
        ));
        assert_eq!(api.send_calls(), 1);
        assert_eq!(api.upload_calls(), 0);

        release.notify_one();
        pending.await.expect("join").expect("first send");
        assert!(!client.is_sending());
    }

    #[tokio::test]
    async fn test_push_channel_end_to_end() {
        let api = api_with_conversations();
        let (script, socket) = SocketScript::live();
        let client = client(&api, vec![script]).await;
        let mut events = client.subscribe();

        client.start().await.expect("start");
        wait_until(|| client.is_online()).await;
        assert_eq!(client.conversations().await.len(), 2);
        client
            .open_conversation_by_id(&ConversationId::new("c1"))
            .await
            .expect("open");

        let frame = serde_json::to_string(&PushFrame::NewMessage {
            message: message("m9", "c1", "d1", "p1"),
        })
        .expect("json");
        socket.send(frame).expect("push");
        socket
            .send(r#"{"type":"typing","isTyping":true}"#.to_string())
            .expect("push");

        wait_until(|| client.is_typing()).await;
        assert_eq!(api.reads(), vec![MessageId::new("m9")]);
        assert_eq!(ids(&client.messages().await), vec!["m9"]);

        let seen = drain(&mut events);
        assert!(seen.contains(&ChatEvent::ConnectionChanged { online: true }));
        assert!(seen.iter().any(|e| matches!(e, ChatEvent::ScrollToEnd { .. })));

        client.shutdown().await;
        assert!(!client.is_online());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_logout_clears_token() {
        let api = api_with_conversations();
        let store = Arc::new(MemoryTokenStore::new());
        let session = Session::establish(patient(), "tok", store.clone())
            .await
            .expect("session");
        let client = ChatClient::new(
            Arc::clone(&api) as Arc<dyn ChatApi>,
            session,
            Arc::new(ScriptedTransport::new(vec![])),
            ChatConfig::new().with_ws_base_url("ws://push.test"),
        )
        .expect("client");

        client.fetch_conversations().await.expect("fetch");
        assert_eq!(client.unread_count().await, 3);
        let mut events = client.subscribe();

        client.logout().await.expect("logout");
        assert_eq!(
            crate::chat::session::TokenStore::load(store.as_ref())
                .await
                .expect("load"),
            None
        );
        assert!(client.conversations().await.is_empty());
        assert_eq!(client.unread_count().await, 0);
        assert_eq!(client.unread_badge().await, None);
        assert!(
            drain(&mut events)
                .iter()
                .any(|e| matches!(e, ChatEvent::ConversationsUpdated { total_unread: 0 }))
        );
    }

    #[tokio::test]
    async fn test_tracker_follows_open_stream() {
        let api = api_with_conversations();
        api.set_history(
            "c2",
            vec![message("b1", "c2", "d2", "p1"), message("b2", "c2", "p1", "d2")],
        );
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;

        for id in ["x1", "x2", "x3"] {
            client
                .handle_frame(PushFrame::NewMessage {
                    message: message(id, "c2", "d2", "p1"),
                })
                .await;
        }
        assert!(client.inner.receipts.is_empty());

        client
            .handle_frame(PushFrame::NewMessage {
                message: message("a1", "c1", "d1", "p1"),
            })
            .await;
        assert_eq!(client.inner.receipts.len(), 1);

        client
            .open_conversation_by_id(&ConversationId::new("c2"))
            .await
            .expect("open c2");
        assert_eq!(client.inner.receipts.len(), 2);
        assert_eq!(client.inner.receipts.status(&MessageId::new("a1")), None);

        client.close_conversation().await;
        assert!(client.inner.receipts.is_empty());
    }

    #[tokio::test]
    async fn test_late_read_ack_is_not_recorded_after_switch() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        client
            .handle_frame(PushFrame::NewMessage {
                message: message("a1", "c1", "d1", "p1"),
            })
            .await;
        client
            .open_conversation_by_id(&ConversationId::new("c2"))
            .await
            .expect("open c2");

        client.mark_read(&MessageId::new("a1")).await;
        assert!(client.inner.receipts.is_empty());
    }

    #[tokio::test]
    async fn test_status_of_merges_tracked_read() {
        let api = api_with_conversations();
        let client = client(&api, vec![]).await;
        open(&client, "c1").await;
        let inbound = message("a1", "c1", "d1", "p1");
        client
            .handle_frame(PushFrame::NewMessage {
                message: inbound.clone(),
            })
            .await;

        assert_eq!(inbound.status, MessageStatus::Sent);
        assert_eq!(client.status_of(&inbound), MessageStatus::Read);
        assert_eq!(
            client.status_of(&message("zz", "c1", "d1", "p1")),
            MessageStatus::Sent
        );
    }
}
