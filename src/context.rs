//! Per-conversation state: the bounded message history plus the handles a
//! module may need while answering (router back-reference, metadata, span).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Span;

use crate::router::Router;

/// Default bound on `ConversationContext::history`
pub const DEFAULT_MAX_HISTORY: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn of a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    role: Role,
    content: String,
    timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// State for one logical conversation, keyed by the platform's conversation id.
///
/// Only the router mutates `history`; modules get a shared reference.
#[derive(Debug)]
pub struct ConversationContext {
    conversation_id: String,
    user_id: String,
    history: VecDeque<ConversationMessage>,
    router: Option<Weak<Router>>,
    metadata: HashMap<String, Value>,
    span: Span,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let conversation_id = conversation_id.into();
        let user_id = user_id.into();
        let span = tracing::info_span!(
            "conversation",
            conversation_id = %conversation_id,
            user_id = %user_id
        );
        Self {
            conversation_id,
            user_id,
            history: VecDeque::new(),
            router: None,
            metadata: HashMap::new(),
            span,
        }
    }

    /// Attach a lookup-only handle to the router serving this conversation
    pub fn with_router(mut self, router: Weak<Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Messages in insertion order, oldest first
    pub fn history(&self) -> &VecDeque<ConversationMessage> {
        &self.history
    }

    /// The router this context was created for, if it is still alive
    pub fn router(&self) -> Option<Arc<Router>> {
        self.router.as_ref().and_then(Weak::upgrade)
    }

    /// Tracing span that every log line for this conversation is recorded under
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }

    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Append a message and drop the oldest entries until at most `max` remain.
    pub(crate) fn push(&mut self, role: Role, content: impl Into<String>, max: usize) {
        self.history.push_back(ConversationMessage::new(role, content));
        while self.history.len() > max {
            self.history.pop_front();
        }
    }
}
