//! Test doubles shared by the chat unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Notify, mpsc};
use url::Url;

use super::api::{ApiFuture, ChatApi};
use super::connection::{PushSocket, SocketFuture, SocketTransport};
use super::error::{ChatError, ChatResult};
use super::send::FileUpload;
use super::types::{
    Conversation, ConversationId, Message, MessageId, MessageStatus, MessageType, UserId,
    UserProfile, UserRole,
};

/// Build a text message.
pub fn message(id: &str, conversation: &str, sender: &str, receiver: &str) -> Message {
    Message {
        id: MessageId::new(id),
        conversation_id: ConversationId::new(conversation),
        sender_id: UserId::new(sender),
        receiver_id: UserId::new(receiver),
        sender_name: None,
        message_type: MessageType::Text,
        content: Some(format!("body of {id}")),
        file_name: None,
        file_size: None,
        file_url: None,
        created_at: Utc::now(),
        status: MessageStatus::Sent,
    }
}

/// Build a conversation between `me` and `other`.
pub fn conversation(id: &str, me: &str, other: &str, unread: u32) -> Conversation {
    Conversation {
        id: ConversationId::new(id),
        participants: vec![UserId::new(me), UserId::new(other)],
        other_participant_name: Some(format!("User {other}")),
        other_participant_role: Some(UserRole::Doctor),
        last_message: None,
        last_message_at: None,
        unread_count: unread,
    }
}

/// The patient the fake backend authenticates as.
pub fn patient() -> UserProfile {
    UserProfile {
        id: UserId::new("p1"),
        name: "Pat Patient".to_string(),
        email: "pat@example.com".to_string(),
        role: UserRole::Patient,
    }
}

/// Poll `condition` while letting (possibly paused) time advance.
pub async fn wait_until(condition: impl Fn() -> bool) {
    for _ in 0..20_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// What happens after a scripted socket has delivered its frames.
#[derive(Clone, Debug)]
pub enum AfterFrames {
    Close,
    Fail,
    Hold,
}

/// Outcome of one scripted connection attempt.
#[derive(Clone, Debug)]
pub enum SocketScript {
    Refuse,
    Malformed,
    Open(Vec<String>, AfterFrames),
    Live(Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>),
}

impl SocketScript {
    pub const fn open_and_close(frames: Vec<String>) -> Self {
        Self::Open(frames, AfterFrames::Close)
    }

    pub const fn open_and_fail(frames: Vec<String>) -> Self {
        Self::Open(frames, AfterFrames::Fail)
    }

    pub const fn open_and_hold(frames: Vec<String>) -> Self {
        Self::Open(frames, AfterFrames::Hold)
    }

    /// A socket fed by the returned sender; dropping the sender closes it.
    pub fn live() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::Live(Arc::new(tokio::sync::Mutex::new(rx))), tx)
    }
}

/// Transport that replays scripted outcomes; the last script repeats.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<SocketScript>>,
    last: Mutex<Option<SocketScript>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<SocketScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(None),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("lock").clone()
    }

    fn next_script(&self) -> SocketScript {
        let next = self.scripts.lock().expect("lock").pop_front();
        let mut last = self.last.lock().expect("lock");
        match next {
            Some(script) => {
                *last = Some(script.clone());
                script
            }
            None => last.clone().unwrap_or(SocketScript::Refuse),
        }
    }
}

impl SocketTransport for ScriptedTransport {
    fn connect(&self, url: &Url) -> SocketFuture<'_, ChatResult<Box<dyn PushSocket>>> {
        self.urls.lock().expect("lock").push(url.to_string());
        let script = self.next_script();
        Box::pin(async move {
            match script {
                SocketScript::Refuse => Err(ChatError::WebSocket("connection refused".to_string())),
                SocketScript::Malformed => Err(ChatError::SocketConstruction("invalid request".to_string())),
                SocketScript::Open(frames, after) => Ok(Box::new(FakeSocket {
                    frames: frames.into(),
                    after,
                    live: None,
                }) as Box<dyn PushSocket>),
                SocketScript::Live(rx) => Ok(Box::new(FakeSocket {
                    frames: VecDeque::new(),
                    after: AfterFrames::Close,
                    live: Some(rx),
                }) as Box<dyn PushSocket>),
            }
        })
    }
}

struct FakeSocket {
    frames: VecDeque<String>,
    after: AfterFrames,
    live: Option<Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>>,
}

impl PushSocket for FakeSocket {
    fn next_frame(&mut self) -> SocketFuture<'_, Option<ChatResult<String>>> {
        Box::pin(async move {
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if let Some(live) = &self.live {
                return live.lock().await.recv().await.map(Ok);
            }
            match self.after {
                AfterFrames::Close => None,
                AfterFrames::Fail => Some(Err(ChatError::WebSocket("connection reset".to_string()))),
                AfterFrames::Hold => std::future::pending().await,
            }
        })
    }

    fn close(&mut self) -> SocketFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// In-memory backend recording every call.
#[derive(Default)]
pub struct FakeApi {
    conversations: Mutex<Vec<Conversation>>,
    histories: Mutex<HashMap<ConversationId, Vec<Message>>>,
    history_gates: Mutex<HashMap<ConversationId, Arc<Notify>>>,
    send_gate: Mutex<Option<Arc<Notify>>>,
    fetches: Mutex<Vec<ConversationId>>,
    reads: Mutex<Vec<MessageId>>,
    list_calls: AtomicUsize,
    send_calls: AtomicUsize,
    upload_calls: AtomicUsize,
    next_id: AtomicUsize,
    fail_list: AtomicBool,
    fail_send: AtomicBool,
    fail_history: AtomicBool,
    fail_read: AtomicBool,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        *self.conversations.lock().expect("lock") = conversations;
    }

    pub fn set_history(&self, id: &str, messages: Vec<Message>) {
        self.histories
            .lock()
            .expect("lock")
            .insert(ConversationId::new(id), messages);
    }

    /// Make history fetches for `id` wait until the returned notify fires.
    pub fn gate_history(&self, id: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.history_gates
            .lock()
            .expect("lock")
            .insert(ConversationId::new(id), Arc::clone(&gate));
        gate
    }

    /// Make text sends and uploads wait until the returned notify fires.
    pub fn gate_sends(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.send_gate.lock().expect("lock") = Some(Arc::clone(&gate));
        gate
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_send(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_read(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> Vec<ConversationId> {
        self.fetches.lock().expect("lock").clone()
    }

    pub fn reads(&self) -> Vec<MessageId> {
        self.reads.lock().expect("lock").clone()
    }

    fn conversation_with(&self, receiver: &UserId) -> ConversationId {
        self.conversations
            .lock()
            .expect("lock")
            .iter()
            .find(|c| c.participants.contains(receiver))
            .map_or_else(|| ConversationId::new("c-new"), |c| c.id.clone())
    }

    fn outgoing(&self, receiver: &UserId) -> Message {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let conversation = self.conversation_with(receiver);
        message(
            &format!("out-{n}"),
            conversation.as_str(),
            "p1",
            receiver.as_str(),
        )
    }

    async fn wait_send_gate(&self) {
        let gate = self.send_gate.lock().expect("lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

impl ChatApi for FakeApi {
    fn current_user(&self) -> ApiFuture<'_, ChatResult<UserProfile>> {
        Box::pin(async { Ok(patient()) })
    }

    fn list_conversations(&self) -> ApiFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(self.conversations.lock().expect("lock").clone())
        })
    }

    fn fetch_messages(&self, conversation_id: &ConversationId) -> ApiFuture<'_, ChatResult<Vec<Message>>> {
        let id = conversation_id.clone();
        Box::pin(async move {
            self.fetches.lock().expect("lock").push(id.clone());
            let gate = self.history_gates.lock().expect("lock").get(&id).cloned();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_history.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(self
                .histories
                .lock()
                .expect("lock")
                .get(&id)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn send_text(&self, receiver_id: &UserId, content: &str) -> ApiFuture<'_, ChatResult<Message>> {
        let receiver_id = receiver_id.clone();
        let content = content.to_string();
        Box::pin(async move {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_send_gate().await;
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            let mut sent = self.outgoing(&receiver_id);
            sent.content = Some(content);
            Ok(sent)
        })
    }

    fn upload_file(&self, receiver_id: &UserId, upload: FileUpload) -> ApiFuture<'_, ChatResult<Message>> {
        let receiver_id = receiver_id.clone();
        Box::pin(async move {
            self.upload_calls.fetch_add(1, Ordering::SeqCst);
            self.wait_send_gate().await;
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: 502,
                    body: "bad gateway".to_string(),
                });
            }
            let mut sent = self.outgoing(&receiver_id);
            sent.message_type = MessageType::File;
            sent.content = None;
            sent.file_size = Some(upload.size());
            sent.file_name = Some(upload.file_name);
            Ok(sent)
        })
    }

    fn mark_read(&self, message_id: &MessageId) -> ApiFuture<'_, ChatResult<()>> {
        let id = message_id.clone();
        Box::pin(async move {
            self.reads.lock().expect("lock").push(id);
            if self.fail_read.load(Ordering::SeqCst) {
                return Err(ChatError::Status {
                    status: 500,
                    body: "boom".to_string(),
                });
            }
            Ok(())
        })
    }
}
