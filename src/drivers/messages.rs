//! Messages API 驱动：类型化内容块协议（同步 JSON + SSE 流式）
//!
//! Driver for typed content-block "messages" APIs. Key traits of the protocol:
//! - The system prompt is a top-level `system` field, not part of `messages`.
//! - Content is a list of typed blocks: `text`, `tool_use`, `tool_result`.
//! - Tools are declared as `{name, description, input_schema}`.
//! - `max_tokens` is required.
//! - Streaming uses SSE with `content_block_start` / `content_block_delta` /
//!   `content_block_stop`, usage split across `message_start` and `message_delta`, and a final
//!   `message_stop`. Block `index` maps directly to a [`RawEvent`] slot.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::config::InferenceConfig;
use crate::error_code::StandardErrorCode;
use crate::pipeline::SseDecoder;
use crate::transport::http::{byte_stream, read_json};
use crate::transport::HttpTransport;
use crate::types::{ContentBlock, Message, MessageRole, RawEvent, ToolCall};
use crate::{Error, ErrorContext, Result};

use super::{AdapterReply, ModelCatalog, RawEventStream, StreamingAdapter, SyncAdapter, TurnRequest};

const BACKEND_NAME: &str = "messages";
const MESSAGES_PATH: &str = "messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const API_VERSION: &str = "2023-06-01";

/// Typed content-block messages driver.
#[derive(Debug)]
pub struct MessagesDriver {
    transport: HttpTransport,
    inference: InferenceConfig,
    catalog: ModelCatalog,
}

impl MessagesDriver {
    /// `inference` fields left unset fall back to the driver defaults (model, `max_tokens`).
    pub fn new(transport: HttpTransport, inference: InferenceConfig, models: Vec<String>) -> Self {
        let defaults = InferenceConfig::default()
            .with_model(DEFAULT_MODEL)
            .with_max_tokens(DEFAULT_MAX_TOKENS);
        let inference = inference.merge_over(&defaults);
        let default_model = inference
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        Self {
            transport: transport.with_default_header("anthropic-version", API_VERSION),
            inference,
            catalog: ModelCatalog::new(default_model, models),
        }
    }

    fn context(&self, model: &str, operation: &str) -> ErrorContext {
        ErrorContext::new()
            .with_backend(BACKEND_NAME)
            .with_model(model)
            .with_operation(operation)
    }

    pub(crate) fn build_body(&self, request: &TurnRequest<'_>, stream: bool) -> Value {
        let mut system_parts: Vec<String> = request
            .system_prompt
            .filter(|s| !s.is_empty())
            .map(|s| vec![s.to_string()])
            .unwrap_or_default();
        let mut messages = Vec::with_capacity(request.history.len());

        for m in request.history {
            if m.role == MessageRole::System {
                system_parts.push(m.text());
                continue;
            }
            let content: Vec<Value> = m.content.iter().map(encode_block).collect();
            if content.is_empty() {
                continue;
            }
            messages.push(json!({
                "role": m.role.as_str(),
                "content": content,
            }));
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": self.inference.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if let Some(t) = self.inference.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(p) = self.inference.top_p {
            body["top_p"] = json!(p);
        }
        if let Some(k) = self.inference.top_k {
            body["top_k"] = json!(k);
        }
        if !request.functions.is_empty() {
            let tools: Vec<Value> = request
                .functions
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "description": f.description,
                        "input_schema": f.parameters_json(),
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!({"type": "auto"});
        }

        body
    }

    pub(crate) fn parse_response(body: &Value) -> Result<AdapterReply> {
        let blocks = body
            .get("content")
            .and_then(|c| c.as_array())
            .ok_or_else(|| Error::protocol_decode("response has no content array"))?;

        let mut content = Vec::with_capacity(blocks.len());
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                    if !text.is_empty() {
                        content.push(ContentBlock::text(text));
                    }
                }
                Some("tool_use") => {
                    let arguments = match block.get("input") {
                        Some(Value::Object(map)) => map.clone(),
                        _ => Map::new(),
                    };
                    content.push(ContentBlock::ToolCall(ToolCall {
                        id: str_field(block, "id"),
                        name: str_field(block, "name"),
                        arguments,
                    }));
                }
                other => debug!(block_type = ?other, "skipping unsupported content block"),
            }
        }

        Ok(AdapterReply {
            message: Message::with_blocks(MessageRole::Assistant, content),
            raw_usage: body.get("usage").cloned(),
        })
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|s| s.as_str())
        .unwrap_or_default()
        .to_string()
}

fn encode_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::ToolCall(call) => json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.arguments,
        }),
        ContentBlock::ToolResult(result) => json!({
            "type": "tool_result",
            "tool_use_id": result.call_id,
            "content": result.payload_text(),
        }),
    }
}

/// Maps SSE payloads to [`RawEvent`]s, carrying usage across `message_start` and
/// `message_delta` until `message_stop`.
#[derive(Debug, Default)]
pub(crate) struct StreamEventMapper {
    usage: Map<String, Value>,
}

impl StreamEventMapper {
    pub(crate) fn map(&mut self, frame: &Value) -> Result<Option<RawEvent>> {
        let event_type = frame
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::protocol_decode("stream event has no type"))?;

        let slot = || -> Result<u32> {
            frame
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as u32)
                .ok_or_else(|| {
                    Error::protocol_decode(format!("{} event has no block index", event_type))
                })
        };

        match event_type {
            "message_start" => {
                self.merge_usage(frame.pointer("/message/usage"));
                Ok(None)
            }
            "content_block_start" => {
                let slot = slot()?;
                let block = frame.get("content_block").unwrap_or(&Value::Null);
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => Ok(Some(RawEvent::open_text(slot))),
                    Some("tool_use") => Ok(Some(RawEvent::open_tool_call(
                        slot,
                        str_field(block, "id"),
                        str_field(block, "name"),
                    ))),
                    // Thinking and other block kinds are not part of the reply.
                    _ => Ok(None),
                }
            }
            "content_block_delta" => {
                let slot = slot()?;
                let delta = frame.get("delta").unwrap_or(&Value::Null);
                match delta.get("type").and_then(|t| t.as_str()) {
                    Some("text_delta") => Ok(Some(RawEvent::text(slot, str_field(delta, "text")))),
                    Some("input_json_delta") => Ok(Some(RawEvent::arguments(
                        slot,
                        str_field(delta, "partial_json"),
                    ))),
                    _ => Ok(None),
                }
            }
            "content_block_stop" => Ok(Some(RawEvent::close(slot()?))),
            "message_delta" => {
                self.merge_usage(frame.get("usage"));
                Ok(None)
            }
            "message_stop" => {
                let usage = std::mem::take(&mut self.usage);
                Ok(Some(RawEvent::complete(
                    (!usage.is_empty()).then_some(Value::Object(usage)),
                )))
            }
            "error" => {
                let err = frame.get("error").unwrap_or(&Value::Null);
                let code = err
                    .get("type")
                    .and_then(|t| t.as_str())
                    .and_then(StandardErrorCode::from_provider_code)
                    .unwrap_or(StandardErrorCode::Unknown);
                let message = err
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error")
                    .to_string();
                Err(Error::from_standard_code(code, message, ErrorContext::new()))
            }
            _ => Ok(None),
        }
    }

    fn merge_usage(&mut self, usage: Option<&Value>) {
        if let Some(Value::Object(map)) = usage {
            for (k, v) in map {
                if !v.is_null() {
                    self.usage.insert(k.clone(), v.clone());
                }
            }
        }
    }
}

#[async_trait]
impl SyncAdapter for MessagesDriver {
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
        let body = self.build_body(&request, false);
        info!(
            backend = BACKEND_NAME,
            model = request.model,
            messages = request.history.len(),
            tools = request.functions.len(),
            "invoking backend"
        );
        let resp = self
            .transport
            .post_json(MESSAGES_PATH, &[], &body, "application/json")
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "invoke"))?;
        let json = read_json(resp)
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "invoke"))?;
        Self::parse_response(&json).map_err(|e| match e {
            Error::ProtocolDecode { message, .. } => Error::ProtocolDecode {
                message,
                context: self.context(request.model, "invoke"),
            },
            other => other,
        })
    }
}

#[async_trait]
impl StreamingAdapter for MessagesDriver {
    async fn open_stream(&self, request: TurnRequest<'_>) -> Result<RawEventStream> {
        let body = self.build_body(&request, true);
        info!(
            backend = BACKEND_NAME,
            model = request.model,
            messages = request.history.len(),
            "opening stream"
        );
        let resp = self
            .transport
            .post_json(MESSAGES_PATH, &[], &body, "text/event-stream")
            .await
            .map_err(|e| e.in_operation(BACKEND_NAME, request.model, "open_stream"))?;

        let frames = SseDecoder::default().decode_stream(byte_stream(resp));
        let mut mapper = StreamEventMapper::default();
        let events = frames.filter_map(move |frame| {
            let mapped = frame.and_then(|f| mapper.map(&f)).transpose();
            futures::future::ready(mapped)
        });
        Ok(require_message_stop(
            Box::pin(events),
            self.context(request.model, "open_stream"),
        ))
    }
}

/// A body that closes before `message_stop` is a truncated turn, not a finished one.
fn require_message_stop(events: RawEventStream, context: ErrorContext) -> RawEventStream {
    let stream = stream::unfold(Some((events, context)), |state| async move {
        let (mut events, context) = state?;
        match events.next().await {
            Some(Ok(event)) => {
                let done = matches!(event, RawEvent::TurnComplete { .. });
                Some((Ok(event), if done { None } else { Some((events, context)) }))
            }
            Some(Err(e)) => Some((Err(e), None)),
            None => {
                warn!(backend = BACKEND_NAME, "stream ended before message_stop");
                Some((
                    Err(Error::transport_with_context(
                        "stream ended before message_stop",
                        context,
                    )),
                    None,
                ))
            }
        }
    });
    Box::pin(stream)
}
