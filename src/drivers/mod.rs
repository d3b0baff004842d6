//! 后端驱动抽象层：同步（完整消息）与流式（增量事件）两种协议形态。
//!
//! Backend adapter layer. A backend speaks one of two shapes:
//!
//! - [`SyncAdapter`]: one request, one complete assistant [`Message`].
//! - [`StreamingAdapter`]: one request, a stream of [`RawEvent`]s that the session feeds
//!   through the [`crate::pipeline::StreamAggregator`].
//!
//! Adapters are stateless with respect to the conversation: they receive the full history on
//! every call and never mutate it. They make exactly one network call per invocation; retries
//! live in [`crate::resilience::retry`].

pub mod gateway;
pub mod messages;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::tokens::{TokenCountExtractor, UsageExtractor};
use crate::types::{FunctionDefinition, Message, RawEvent};
use crate::{BoxStream, Result};

pub use gateway::GatewayDriver;
pub use messages::MessagesDriver;

/// Everything an adapter needs for one turn. `history` already ends with the new user turn.
#[derive(Debug, Clone, Copy)]
pub struct TurnRequest<'a> {
    pub model: &'a str,
    pub history: &'a [Message],
    pub system_prompt: Option<&'a str>,
    pub functions: &'a [FunctionDefinition],
}

/// Result of a synchronous call.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterReply {
    /// Assistant message; may be empty if the backend returned no content.
    pub message: Message,
    /// Usage exactly as the backend reported it.
    pub raw_usage: Option<Value>,
}

/// Raw events of one streaming turn. Owns the underlying connection.
pub type RawEventStream = BoxStream<'static, RawEvent>;

#[async_trait]
pub trait SyncAdapter: Send + Sync + std::fmt::Debug {
    /// Backend name used in logs, error context and [`crate::types::Usage::backend`].
    fn name(&self) -> &str;

    /// Model used when a session does not ask for one, or asks for an unsupported one.
    fn default_model(&self) -> &str;

    fn list_models(&self) -> Vec<String> {
        vec![self.default_model().to_string()]
    }

    fn supports_model(&self, model: &str) -> bool {
        !model.trim().is_empty()
    }

    fn usage_extractor(&self) -> Arc<dyn UsageExtractor> {
        Arc::new(TokenCountExtractor::new())
    }

    async fn invoke(&self, request: TurnRequest<'_>) -> Result<AdapterReply>;
}

#[async_trait]
pub trait StreamingAdapter: SyncAdapter {
    /// Opens the stream. Errors returned here happen before any event was produced.
    async fn open_stream(&self, request: TurnRequest<'_>) -> Result<RawEventStream>;
}

/// Accepted model names for a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    default_model: String,
    models: Vec<String>,
}

impl ModelCatalog {
    /// An empty `models` list accepts any non-blank model name.
    pub fn new(default_model: impl Into<String>, models: Vec<String>) -> Self {
        Self {
            default_model: default_model.into(),
            models,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn supports(&self, model: &str) -> bool {
        if model.trim().is_empty() {
            return false;
        }
        self.models.is_empty() || self.models.iter().any(|m| m.eq_ignore_ascii_case(model))
    }

    pub fn list(&self) -> Vec<String> {
        if self.models.is_empty() {
            vec![self.default_model.clone()]
        } else {
            self.models.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_open_and_closed() {
        let open = ModelCatalog::new("base", vec![]);
        assert!(open.supports("anything"));
        assert!(!open.supports(" "));
        assert_eq!(open.list(), vec!["base".to_string()]);

        let closed = ModelCatalog::new("a", vec!["a".into(), "B-2".into()]);
        assert!(closed.supports("b-2"));
        assert!(!closed.supports("c"));
    }
}
