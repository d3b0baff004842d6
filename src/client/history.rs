//! Ordered conversation history owned by one session.

use crate::types::{
    ContentBlock, Message, MessageRole, MessageSource, StoredKind, StoredMessage, ToolCall,
};
use serde_json::Value;
use tracing::debug;

/// Append-only during a turn, with a single rollback point: the user message of the turn
/// in flight.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Appends `message` unless it has no content. Returns whether it was stored.
    pub(crate) fn push(&mut self, message: Message) -> bool {
        if message.is_empty() {
            debug!(role = message.role.as_str(), "skipping empty message");
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Removes the trailing user message appended for a failed turn.
    pub(crate) fn rollback_user(&mut self) -> Option<Message> {
        match self.messages.last() {
            Some(m) if m.role == MessageRole::User => self.messages.pop(),
            _ => None,
        }
    }

    /// Looks up a tool call requested earlier in the conversation.
    pub fn tool_call(&self, call_id: &str) -> Option<&ToolCall> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == MessageRole::Assistant)
            .flat_map(|m| m.tool_calls())
            .find(|c| c.id == call_id)
    }

    /// Converts externally stored messages, skipping anything without a text representation.
    pub fn from_stored(prior: &[StoredMessage]) -> Self {
        let mut history = History::new();
        for stored in prior {
            let role = match (stored.source, stored.kind) {
                (MessageSource::User, StoredKind::Text) => MessageRole::User,
                (MessageSource::Model | MessageSource::Agent, StoredKind::Text) => {
                    MessageRole::Assistant
                }
                (source, kind) => {
                    debug!(?source, ?kind, "skipping stored message");
                    continue;
                }
            };
            let text = match &stored.payload {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            if text.is_empty() {
                continue;
            }
            history.push(Message::with_blocks(role, vec![ContentBlock::text(text)]));
        }
        history
    }
}
