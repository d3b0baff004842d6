//! Chat gateway driver: plain `{role, content}` messages over JSON, line-streamed replies.
//!
//! Request:  `POST chat?model=<model>` with `{"messages": [{"role": "...", "content": "..."}]}`
//! Response: `{"message": "...", "metadata": {...}}`
//! Stream:   the same request, answered with plain text, one chunk per line.
//!
//! The gateway has no function calling. Tool results sent by the caller are rendered into the
//! user turn as JSON text, and function definitions are not forwarded.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::InferenceConfig;
use crate::pipeline::LineDecoder;
use crate::transport::http::{byte_stream, read_json};
use crate::transport::HttpTransport;
use crate::types::{ContentBlock, Message, MessageRole, RawEvent};
use crate::{Error, ErrorContext, Result};

use super::{AdapterReply, ModelCatalog, RawEventStream, StreamingAdapter, SyncAdapter, TurnRequest};

const BACKEND_NAME: &str = "gateway";
const CHAT_PATH: &str = "chat";
const DEFAULT_MODEL: &str = "claude-sonnet-4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct GatewayMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct GatewayRequest {
    messages: Vec<GatewayMessage>,
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    message: String,
    #[serde(default)]
    metadata: Option<Value>,
}

#[derive(Debug)]
pub struct GatewayDriver {
    transport: HttpTransport,
    catalog: ModelCatalog,
}

impl GatewayDriver {
    pub fn new(transport: HttpTransport, inference: InferenceConfig, models: Vec<String>) -> Self {
        let default_model = inference.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            transport,
            catalog: ModelCatalog::new(default_model, models),
        }
    }

    fn build_request(request: &TurnRequest<'_>) -> GatewayRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        if let Some(system) = request.system_prompt.filter(|s| !s.is_empty()) {
            messages.push(GatewayMessage {
                role: MessageRole::System.as_str().to_string(),
                content: system.to_string(),
            });
        }
        if !request.functions.is_empty() {
            debug!(
                functions = request.functions.len(),
                "gateway has no function calling; definitions not sent"
            );
        }
        for m in request.history {
            let content = render(m);
            if content.is_empty() {
                continue;
            }
            messages.push(GatewayMessage {
                role: m.role.as_str().to_string(),
                content,
            });
        }
        GatewayRequest { messages }
    }

    fn decode_reply(body: Value) -> Result<AdapterReply> {
        let resp: GatewayResponse = serde_json::from_value(body).map_err(|e| {
            Error::protocol_decode(format!("unexpected gateway response: {}", e))
        })?;
        let message = if resp.message.is_empty() {
            Message::with_blocks(MessageRole::Assistant, Vec::new())
        } else {
            Message::assistant(resp.message)
        };
        let raw_usage = resp
            .metadata
            .map(|m| m.get("usage").cloned().unwrap_or(m));
        Ok(AdapterReply { message, raw_usage })
    }

    fn context(model: &str, operation: &str) -> ErrorContext {
        ErrorContext::new()
            .with_backend(BACKEND_NAME)
            .with_model(model)
            .with_operation(operation)
    }
}

/// Flattens a message into the gateway's single text field.
fn render(message: &Message) -> String {
    message
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::ToolCall(call) => serde_json::json!({
                "tool_call": {"id": call.id, "name": call.name, "arguments": call.arguments}
            })
            .to_string(),
            ContentBlock::ToolResult(result) => result.payload_text(),
        })
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl SyncAdapter for GatewayDriver {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn default_model(&self) -> &str {
        self.catalog.default_model()
    }

    fn list_models(&self) -> Vec<String> {
        self.catalog.list()
    }

    fn supports_model(&self, model: &str) -> bool {
        self.catalog.supports(model)
    }

    async fn invoke(&self, request: TurnRequest<'_>) -> Result<AdapterReply> {
        let body = serde_json::to_value(Self::build_request(&request))?;
        info!(backend = BACKEND_NAME, model = request.model, "invoking backend");
        let resp = self
            .transport
            .post_json(CHAT_PATH, &[("model", request.model)], &body, "application/json")
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "invoke"))?;
        let json = read_json(resp)
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "invoke"))?;
        Self::decode_reply(json).map_err(|e| match e {
            Error::ProtocolDecode { message, .. } => Error::ProtocolDecode {
                message,
                context: Self::context(request.model, "invoke"),
            },
            other => other,
        })
    }
}

#[async_trait]
impl StreamingAdapter for GatewayDriver {
    async fn open_stream(&self, request: TurnRequest<'_>) -> Result<RawEventStream> {
        let body = serde_json::to_value(Self::build_request(&request))?;
        info!(backend = BACKEND_NAME, model = request.model, "opening stream");
        let resp = self
            .transport
            .post_json(CHAT_PATH, &[("model", request.model)], &body, "text/plain")
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "open_stream"))?;

        // One text block for the whole reply; line breaks between chunks are preserved.
        let mut first = true;
        let lines = LineDecoder.decode_stream(byte_stream(resp)).map(move |line| {
            line.map(|l| {
                let text = if first { l } else { format!("\n{}", l) };
                first = false;
                RawEvent::text(0, text)
            })
        });
        let events = stream::iter([Ok(RawEvent::open_text(0))])
            .chain(lines)
            .chain(stream::iter([
                Ok(RawEvent::close(0)),
                Ok(RawEvent::complete(None)),
            ]));
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolResult, FunctionDefinition};
    use serde_json::json;

    #[test]
    fn test_build_request_flattens_history() {
        let history = vec![
            Message::user("hi"),
            Message::assistant("hello"),
            Message::with_blocks(
                MessageRole::User,
                vec![ContentBlock::ToolResult(ToolResult::new("c1", json!({"ok": 1})))],
            ),
            Message::with_blocks(MessageRole::User, vec![]),
        ];
        let functions = vec![FunctionDefinition::new("f", "unused")];
        let req = GatewayDriver::build_request(&TurnRequest {
            model: "m",
            history: &history,
            system_prompt: Some("sys"),
            functions: &functions,
        });
        let roles: Vec<_> = req.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(req.messages[3].content, r#"{"ok":1}"#);
    }

    #[test]
    fn test_decode_reply() {
        let reply = GatewayDriver::decode_reply(json!({
            "message": "Hello there",
            "metadata": {"usage": {"inputTokens": 4, "outputTokens": 2}}
        }))
        .unwrap();
        assert_eq!(reply.message.text(), "Hello there");
        assert_eq!(reply.raw_usage.unwrap()["inputTokens"], 4);

        let empty = GatewayDriver::decode_reply(json!({"message": ""})).unwrap();
        assert!(empty.message.is_empty());
        assert!(empty.raw_usage.is_none());

        assert!(matches!(
            GatewayDriver::decode_reply(json!({"text": "x"})),
            Err(Error::ProtocolDecode { .. })
        ));
    }
}
