//! Per-session conversation log.
//!
//! A session moves through three states:
//!
//! ```text
//! NoConversation -> (ensure | append) -> Empty -> (append) -> NonEmpty -> (append)*
//! ```
//!
//! [`ConversationStore::ensure`] is the only operation that creates a
//! conversation. Appends always write the whole conversation back and flag
//! the session as modified, otherwise the session layer discards them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::session::SessionStore;

/// Session key holding the serialized conversation.
pub const CONVERSATION_KEY: &str = "conversation";

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Assistant,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ConversationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ConversationError::InvalidMessageKind(other.to_owned())),
        }
    }
}

/// One entry in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub text: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Assistant,
            text: text.into(),
        }
    }
}

/// Ordered messages bound to one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// Where a session sits in the conversation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// The session has never been observed by the store.
    NoConversation,
    /// A conversation exists but holds no messages.
    Empty,
    /// A conversation with this many messages.
    NonEmpty(usize),
}

/// Errors raised by [`ConversationStore`].
#[derive(Debug, Error)]
pub enum ConversationError {
    /// A message tag other than `user` or `assistant`.
    #[error("invalid message kind '{0}': expected 'user' or 'assistant'")]
    InvalidMessageKind(String),

    /// The stored value could not be decoded.
    #[error("conversation stored for session {session_id} is corrupt: {source}")]
    CorruptConversation {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    /// The conversation could not be encoded for storage.
    #[error("failed to encode conversation: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Reads and appends the conversation kept in each session.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    sessions: Arc<dyn SessionStore>,
}

impl ConversationStore {
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    /// Current lifecycle state of the session's conversation.
    pub fn state(&self, session_id: &str) -> Result<ConversationState, ConversationError> {
        Ok(match self.load(session_id)? {
            None => ConversationState::NoConversation,
            Some(conversation) if conversation.is_empty() => ConversationState::Empty,
            Some(conversation) => ConversationState::NonEmpty(conversation.len()),
        })
    }

    /// Return the session's conversation, creating an empty one if needed.
    pub fn ensure(&self, session_id: &str) -> Result<Conversation, ConversationError> {
        if let Some(conversation) = self.load(session_id)? {
            return Ok(conversation);
        }

        let conversation = Conversation::default();
        self.save(session_id, &conversation)?;
        info!(
            name: "conversation.created",
            session_id = %session_id,
            "Created empty conversation"
        );
        Ok(conversation)
    }

    /// Append one message to the end of the conversation.
    pub fn append(
        &self,
        session_id: &str,
        kind: MessageKind,
        text: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let mut conversation = self.ensure(session_id)?;
        conversation.push(Message {
            kind,
            text: text.into(),
        });
        self.save(session_id, &conversation)?;
        debug!(
            session_id = %session_id,
            kind = %kind,
            message_count = conversation.len(),
            "Appended message"
        );
        Ok(())
    }

    /// Append a message whose kind arrives as a string tag.
    ///
    /// Unknown tags fail before the session is touched.
    pub fn append_tagged(
        &self,
        session_id: &str,
        kind: &str,
        text: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let kind = kind.parse::<MessageKind>()?;
        self.append(session_id, kind, text)
    }

    /// Append a user message followed by its assistant reply.
    ///
    /// Both messages land in a single write, so no other append can fall
    /// between them.
    pub fn record_exchange(
        &self,
        session_id: &str,
        user_text: impl Into<String>,
        assistant_text: impl Into<String>,
    ) -> Result<(), ConversationError> {
        let mut conversation = self.ensure(session_id)?;
        conversation.push(Message::user(user_text));
        conversation.push(Message::assistant(assistant_text));
        self.save(session_id, &conversation)?;
        info!(
            name: "conversation.exchange_recorded",
            session_id = %session_id,
            message_count = conversation.len(),
            "Recorded exchange"
        );
        Ok(())
    }

    /// Messages recorded so far, oldest first. Never mutates the session.
    pub fn view(&self, session_id: &str) -> Result<Vec<Message>, ConversationError> {
        Ok(self
            .load(session_id)?
            .map(Conversation::into_messages)
            .unwrap_or_default())
    }

    /// Finish the interaction for `session_id` in the session layer.
    pub fn release(&self, session_id: &str) {
        self.sessions.release(session_id);
    }

    fn load(&self, session_id: &str) -> Result<Option<Conversation>, ConversationError> {
        self.sessions
            .get(session_id, CONVERSATION_KEY)
            .map(|value| {
                serde_json::from_value(value).map_err(|source| {
                    ConversationError::CorruptConversation {
                        session_id: session_id.to_owned(),
                        source,
                    }
                })
            })
            .transpose()
    }

    fn save(&self, session_id: &str, conversation: &Conversation) -> Result<(), ConversationError> {
        let value = serde_json::to_value(conversation).map_err(ConversationError::Encode)?;
        self.sessions.set(session_id, CONVERSATION_KEY, value);
        self.sessions.mark_modified(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use serde_json::json;

    fn store() -> (MemorySessionStore, ConversationStore) {
        let sessions = MemorySessionStore::new();
        let conversations = ConversationStore::new(Arc::new(sessions.clone()));
        (sessions, conversations)
    }

    #[test]
    fn test_fresh_session_views_empty() {
        let (sessions, conversations) = store();

        assert!(conversations.view("s1").unwrap().is_empty());
        assert_eq!(
            conversations.state("s1").unwrap(),
            ConversationState::NoConversation
        );
        // Reading must not create anything.
        assert!(!sessions.contains("s1"));
    }

    #[test]
    fn test_ensure_creates_once() {
        let (_sessions, conversations) = store();

        let first = conversations.ensure("s1").unwrap();
        let second = conversations.ensure("s1").unwrap();

        assert!(first.is_empty());
        assert_eq!(first, second);
        assert_eq!(conversations.state("s1").unwrap(), ConversationState::Empty);
    }

    #[test]
    fn test_record_exchange_orders_messages() {
        let (_sessions, conversations) = store();

        conversations
            .record_exchange("s1", "What is momentum?", "Here is the answer...")
            .unwrap();

        let messages = conversations.view("s1").unwrap();
        assert_eq!(
            messages,
            vec![
                Message::user("What is momentum?"),
                Message::assistant("Here is the answer..."),
            ]
        );
    }

    #[test]
    fn test_many_exchanges_keep_chronological_order() {
        let (_sessions, conversations) = store();

        for i in 0..5 {
            conversations
                .record_exchange("s1", format!("q{i}"), format!("a{i}"))
                .unwrap();
        }

        let messages = conversations.view("s1").unwrap();
        assert_eq!(messages.len(), 10);
        for (i, pair) in messages.chunks(2).enumerate() {
            assert_eq!(pair[0], Message::user(format!("q{i}")));
            assert_eq!(pair[1], Message::assistant(format!("a{i}")));
        }
        assert_eq!(
            conversations.state("s1").unwrap(),
            ConversationState::NonEmpty(10)
        );
    }

    #[test]
    fn test_sessions_do_not_share_conversations() {
        let (_sessions, conversations) = store();

        conversations.record_exchange("a", "qa", "aa").unwrap();
        conversations.record_exchange("b", "qb", "ab").unwrap();
        conversations.append("a", MessageKind::User, "qa2").unwrap();

        assert_eq!(conversations.view("a").unwrap().len(), 3);
        assert_eq!(
            conversations.view("b").unwrap(),
            vec![Message::user("qb"), Message::assistant("ab")]
        );
    }

    #[test]
    fn test_unknown_kind_is_rejected_without_mutation() {
        let (_sessions, conversations) = store();
        conversations.record_exchange("s1", "q", "a").unwrap();

        let err = conversations.append_tagged("s1", "system", "x").unwrap_err();
        assert!(matches!(err, ConversationError::InvalidMessageKind(ref kind) if kind == "system"));
        assert_eq!(conversations.view("s1").unwrap().len(), 2);

        let err = conversations.append_tagged("fresh", "ai", "x").unwrap_err();
        assert!(matches!(err, ConversationError::InvalidMessageKind(_)));
        assert_eq!(
            conversations.state("fresh").unwrap(),
            ConversationState::NoConversation
        );
    }

    #[test]
    fn test_append_tagged_accepts_known_kinds() {
        let (_sessions, conversations) = store();

        conversations.append_tagged("s1", "user", "hi").unwrap();
        conversations.append_tagged("s1", "assistant", "").unwrap();

        assert_eq!(
            conversations.view("s1").unwrap(),
            vec![Message::user("hi"), Message::assistant("")]
        );
    }

    #[test]
    fn test_appends_survive_release() {
        let (sessions, conversations) = store();

        conversations.record_exchange("s1", "q", "a").unwrap();
        conversations.release("s1");

        assert_eq!(conversations.view("s1").unwrap().len(), 2);
        assert!(sessions.contains("s1"));
    }

    #[test]
    fn test_write_without_modified_flag_is_lost() {
        let (sessions, conversations) = store();
        conversations.ensure("s1").unwrap();
        conversations.release("s1");

        sessions.set("s1", CONVERSATION_KEY, json!([{"kind": "user", "text": "sneaky"}]));
        sessions.release("s1");

        assert!(conversations.view("s1").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_value_is_reported() {
        let (sessions, conversations) = store();
        sessions.set("s1", CONVERSATION_KEY, json!({"not": "a list"}));

        let err = conversations.view("s1").unwrap_err();
        assert!(matches!(err, ConversationError::CorruptConversation { .. }));
    }

    #[test]
    fn test_message_serialization_shape() {
        let value = serde_json::to_value(Message::assistant("hello")).unwrap();
        assert_eq!(value, json!({"kind": "assistant", "text": "hello"}));
    }
}
