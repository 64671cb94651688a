//! Message stream of the open conversation.
//!
//! At most one conversation is open. Its history is loaded asynchronously:
//! [`MessageStream::begin_open`] hands out a [`LoadTicket`] and only the
//! ticket of the latest open may install its result. A history response
//! that arrives after the user switched away is dropped.
//!
//! Appends never reorder. Messages are kept in the order they were
//! observed locally, and a message id is only ever shown once.

use std::collections::HashSet;

use super::types::{Conversation, ConversationId, Message, MessageId};

/// Proof that a history load was started for a given open.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadTicket {
    conversation_id: ConversationId,
    generation: u64,
}

impl LoadTicket {
    /// Conversation whose history should be fetched.
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }
}

/// Result of an append attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was added at the end of the stream.
    Appended,
    /// A message with the same id is already shown.
    Duplicate,
    /// The message belongs to a conversation that is not open.
    NotOpen,
}

/// Ordered messages of the open conversation.
#[derive(Debug, Default)]
pub struct MessageStream {
    selected: Option<Conversation>,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    loading: bool,
    generation: u64,
    scroll_epoch: u64,
}

impl MessageStream {
    /// Create a stream with nothing open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select `conversation`, clearing the previous content, and start loading.
    pub fn begin_open(&mut self, conversation: Conversation) -> LoadTicket {
        self.generation += 1;
        self.messages.clear();
        self.ids.clear();
        self.loading = true;
        let ticket = LoadTicket {
            conversation_id: conversation.id.clone(),
            generation: self.generation,
        };
        self.selected = Some(conversation);
        ticket
    }

    /// Install the fetched history if `ticket` is still current.
    ///
    /// Messages appended while the load was in flight and missing from the
    /// history are kept after it. Returns `false` for a stale ticket.
    pub fn finish_open(&mut self, ticket: &LoadTicket, history: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }

        let arrived = std::mem::take(&mut self.messages);
        self.ids.clear();
        for message in history.into_iter().chain(arrived) {
            if self.ids.insert(message.id.clone()) {
                self.messages.push(message);
            }
        }
        self.loading = false;
        self.scroll_epoch += 1;
        true
    }

    /// Clear the loading flag after a failed load, if `ticket` is still current.
    pub fn fail_open(&mut self, ticket: &LoadTicket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.loading = false;
        true
    }

    /// Append a message this client just sent.
    pub fn append_local(&mut self, message: Message) -> AppendOutcome {
        self.append(message)
    }

    /// Append a message pushed by the server.
    pub fn append_remote(&mut self, message: Message) -> AppendOutcome {
        self.append(message)
    }

    fn append(&mut self, message: Message) -> AppendOutcome {
        if !self.is_open_for(&message.conversation_id) {
            return AppendOutcome::NotOpen;
        }
        if !self.ids.insert(message.id.clone()) {
            return AppendOutcome::Duplicate;
        }
        self.messages.push(message);
        self.scroll_epoch += 1;
        AppendOutcome::Appended
    }

    /// Deselect the open conversation. Pending loads become stale.
    pub fn close(&mut self) {
        self.generation += 1;
        self.selected = None;
        self.messages.clear();
        self.ids.clear();
        self.loading = false;
    }

    /// Whether `id` is the open conversation.
    #[must_use]
    pub fn is_open_for(&self, id: &ConversationId) -> bool {
        self.selected.as_ref().is_some_and(|c| &c.id == id)
    }

    /// Whether message `id` is shown in the stream.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// The open conversation.
    #[must_use]
    pub const fn selected(&self) -> Option<&Conversation> {
        self.selected.as_ref()
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether a history load is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// Incremented once per successful load and once per append.
    #[must_use]
    pub const fn scroll_epoch(&self) -> u64 {
        self.scroll_epoch
    }

    const fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation
    }
}
