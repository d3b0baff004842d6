//! Conversation messages and the content blocks they are made of.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::with_blocks(MessageRole::System, vec![ContentBlock::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::with_blocks(MessageRole::User, vec![ContentBlock::text(text)])
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::with_blocks(MessageRole::Assistant, vec![ContentBlock::text(text)])
    }

    pub fn with_blocks(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Concatenation of every text block, in order.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    pub fn tool_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolResult(result) => Some(result),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Content block. Closed set: anything a backend sends that is not one of these is either
/// mapped onto one by the driver or dropped there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// A function invocation requested by the model. Arguments are opaque to the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The caller's answer to a [`ToolCall`], linked by `call_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    /// Function name echoed back for backends that address results by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub payload: Value,
}

impl ToolResult {
    pub fn new(call_id: impl Into<String>, payload: Value) -> Self {
        Self {
            call_id: call_id.into(),
            name: None,
            payload,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Answers `call` with `payload`, copying its id and name.
    pub fn for_call(call: &ToolCall, payload: Value) -> Self {
        Self::new(call.id.clone(), payload).with_name(call.name.clone())
    }

    /// Payload rendered as text for backends without structured result blocks.
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One piece of user input for [`crate::client::ChatSession::send`].
///
/// A single send is either all text or all tool results; mixing is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Text(String),
    ToolResult(ToolResult),
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<ToolResult> for Content {
    fn from(r: ToolResult) -> Self {
        Content::ToolResult(r)
    }
}

/// The content list of one send call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Contents(pub Vec<Content>);

impl Contents {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Content> {
        self.0
    }
}

impl<T: Into<Content>> From<Vec<T>> for Contents {
    fn from(items: Vec<T>) -> Self {
        Contents(items.into_iter().map(Into::into).collect())
    }
}

impl From<Content> for Contents {
    fn from(c: Content) -> Self {
        Contents(vec![c])
    }
}

impl From<&str> for Contents {
    fn from(s: &str) -> Self {
        Contents(vec![s.into()])
    }
}

impl From<String> for Contents {
    fn from(s: String) -> Self {
        Contents(vec![s.into()])
    }
}

impl From<ToolResult> for Contents {
    fn from(r: ToolResult) -> Self {
        Contents(vec![r.into()])
    }
}

/// Who authored a message stored outside the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Model,
    Agent,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredKind {
    Text,
    ToolCallRequest,
    ToolCallResponse,
    Error,
    #[serde(other)]
    Unknown,
}

/// A message persisted by the application, used to seed a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub source: MessageSource,
    #[serde(rename = "type")]
    pub kind: StoredKind,
    #[serde(default)]
    pub payload: Value,
}

impl StoredMessage {
    pub fn text(source: MessageSource, text: impl Into<String>) -> Self {
        Self {
            source,
            kind: StoredKind::Text,
            payload: Value::String(text.into()),
        }
    }
}
