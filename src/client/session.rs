use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::core::Backend;
use crate::client::history::History;
use crate::client::stream::{ChatStream, StreamTurn};
use crate::drivers::{AdapterReply, StreamingAdapter, SyncAdapter, TurnRequest};
use crate::error_code::StandardErrorCode;
use crate::pipeline::StreamAggregator;
use crate::tokens::UsageExtractor;
use crate::types::{
    Content, ContentBlock, Contents, FunctionDefinition, Message, MessageRole, StoredMessage,
    ToolCall, Usage,
};
use crate::{Error, ErrorContext, Result};

/// Called with every usage report a session produces.
pub type UsageCallback = Arc<dyn Fn(&Usage) + Send + Sync>;

/// Per-session behavior shared by every session a [`Backend`] creates.
#[derive(Clone, Default)]
pub struct SessionOptions {
    pub usage_callback: Option<UsageCallback>,
    /// Upper bound for one backend call (sync invoke or stream setup).
    pub attempt_timeout: Option<Duration>,
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("usage_callback", &self.usage_callback.is_some())
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub message: Message,
    pub usage: Option<Usage>,
}

impl ChatResponse {
    pub fn text(&self) -> String {
        self.message.text()
    }

    pub fn tool_calls(&self) -> Vec<&ToolCall> {
        self.message.tool_calls().collect()
    }
}

/// One conversation with one backend.
///
/// Not internally synchronized: every mutating call takes `&mut self`, and a streaming turn
/// keeps the session borrowed until its [`ChatStream`] is dropped.
pub struct ChatSession {
    id: String,
    model: String,
    system_prompt: Option<String>,
    history: History,
    functions: Vec<FunctionDefinition>,
    sync: Arc<dyn SyncAdapter>,
    streaming: Option<Arc<dyn StreamingAdapter>>,
    extractor: Arc<dyn UsageExtractor>,
    options: SessionOptions,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("backend", &self.sync.name())
            .field("model", &self.model)
            .field("history_len", &self.history.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl ChatSession {
    /// New empty session on `backend` using its default model. An empty system prompt means
    /// none.
    pub fn new(backend: &Backend, system_prompt: impl Into<String>) -> Self {
        let system_prompt = system_prompt.into();
        let sync = backend.sync_adapter();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            model: sync.default_model().to_string(),
            system_prompt: (!system_prompt.is_empty()).then_some(system_prompt),
            history: History::new(),
            functions: Vec::new(),
            extractor: backend.usage_extractor(),
            streaming: backend.streaming_adapter(),
            sync,
            options: backend.options().clone(),
        }
    }

    /// Selects `model`; a model the backend does not support falls back to its default.
    pub fn with_model(mut self, model: &str) -> Self {
        if self.sync.supports_model(model) {
            self.model = model.to_string();
        } else {
            warn!(
                backend = self.sync.name(),
                requested = model,
                fallback = %self.model,
                "unsupported model requested; using backend default"
            );
        }
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn backend_name(&self) -> &str {
        self.sync.name()
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    pub fn history(&self) -> &[Message] {
        self.history.as_slice()
    }

    /// History with the system prompt, if any, as a leading system message.
    pub fn transcript(&self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.history.len() + 1);
        if let Some(p) = &self.system_prompt {
            out.push(Message::system(p.clone()));
        }
        out.extend(self.history.as_slice().iter().cloned());
        out
    }

    pub fn functions(&self) -> &[FunctionDefinition] {
        &self.functions
    }

    pub fn supports_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// Replaces the history with externally stored messages. Messages without a text
    /// representation are skipped.
    pub fn initialize(&mut self, prior: &[StoredMessage]) -> Result<()> {
        self.history = History::from_stored(prior);
        info!(
            session = %self.id,
            stored = prior.len(),
            kept = self.history.len(),
            "history initialized"
        );
        Ok(())
    }

    /// Replaces the function set. An empty list disables tool use for later turns.
    pub fn set_functions(&mut self, functions: Vec<FunctionDefinition>) -> Result<()> {
        let mut seen = HashSet::with_capacity(functions.len());
        for f in &functions {
            if f.name.trim().is_empty() {
                return Err(Error::usage("function name must not be empty"));
            }
            if !seen.insert(f.name.as_str()) {
                return Err(Error::usage(format!("duplicate function name '{}'", f.name)));
            }
        }
        debug!(session = %self.id, count = functions.len(), "functions set");
        self.functions = functions;
        Ok(())
    }

    /// Pure classification; see [`Error::is_retryable`].
    pub fn is_retryable(&self, err: &Error) -> bool {
        err.is_retryable()
    }

    pub async fn send(&mut self, content: impl Into<Contents>) -> Result<ChatResponse> {
        self.send_with_cancel(content, &CancellationToken::new()).await
    }

    /// Sends one user turn and waits for the complete reply. On any failure, including
    /// cancellation, history is left exactly as it was.
    pub async fn send_with_cancel(
        &mut self,
        content: impl Into<Contents>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let user = self.build_user_message(content.into())?;
        self.history.push(user);

        match self.invoke_sync(cancel).await {
            Ok(reply) => Ok(self.commit_reply(reply)),
            Err(e) => {
                self.history.rollback_user();
                warn!(
                    session = %self.id,
                    backend = self.sync.name(),
                    error = %e,
                    "send failed; user message rolled back"
                );
                Err(e)
            }
        }
    }

    pub async fn send_streaming(&mut self, content: impl Into<Contents>) -> Result<ChatStream<'_>> {
        self.send_streaming_with_cancel(content, &CancellationToken::new())
            .await
    }

    /// Opens a streaming turn. Errors before the stream opens are returned here and leave
    /// history untouched; the turn is committed only once the returned stream is drained.
    pub async fn send_streaming_with_cancel(
        &mut self,
        content: impl Into<Contents>,
        cancel: &CancellationToken,
    ) -> Result<ChatStream<'_>> {
        let turn = self.begin_stream(content.into(), cancel).await?;
        Ok(ChatStream::new(self, turn))
    }

    pub(crate) async fn begin_stream(
        &self,
        contents: Contents,
        cancel: &CancellationToken,
    ) -> Result<StreamTurn> {
        let user = self.build_user_message(contents)?;
        let streaming = self.streaming.as_ref().ok_or_else(|| {
            Error::capability_with_context(
                "backend does not support streaming",
                self.error_context("send_streaming"),
            )
        })?;

        let mut history = Vec::with_capacity(self.history.len() + 1);
        history.extend_from_slice(self.history.as_slice());
        history.push(user.clone());
        let request = TurnRequest {
            model: &self.model,
            history: &history,
            system_prompt: self.system_prompt.as_deref(),
            functions: &self.functions,
        };

        let raw = self
            .bounded("open_stream", cancel, streaming.open_stream(request))
            .await?;
        let units = StreamAggregator::new(self.extractor.clone(), &self.model, streaming.name())
            .with_cancellation(cancel.clone())
            .aggregate(raw);
        Ok(StreamTurn::new(user, units))
    }

    async fn invoke_sync(&self, cancel: &CancellationToken) -> Result<AdapterReply> {
        let request = TurnRequest {
            model: &self.model,
            history: self.history.as_slice(),
            system_prompt: self.system_prompt.as_deref(),
            functions: &self.functions,
        };
        self.bounded("invoke", cancel, self.sync.invoke(request)).await
    }

    /// Races a backend call against cancellation and the optional attempt timeout.
    async fn bounded<T, F>(&self, operation: &str, cancel: &CancellationToken, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let call = async {
            match self.options.attempt_timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::from_standard_code(
                        StandardErrorCode::Timeout,
                        format!("attempt timed out after {:?}", limit),
                        self.error_context(operation),
                    )),
                },
                None => call.await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                context: self.error_context(operation),
            }),
            result = call => result,
        }
    }

    fn error_context(&self, operation: &str) -> ErrorContext {
        ErrorContext::new()
            .with_backend(self.sync.name())
            .with_model(self.model.as_str())
            .with_operation(operation)
    }

    /// Validates a send call and builds the user message for it.
    fn build_user_message(&self, contents: Contents) -> Result<Message> {
        if contents.is_empty() {
            return Err(Error::usage("no content provided"));
        }
        let mut texts = Vec::new();
        let mut results = Vec::new();
        for c in contents.into_vec() {
            match c {
                Content::Text(t) => texts.push(t),
                Content::ToolResult(r) => results.push(r),
            }
        }
        if !texts.is_empty() && !results.is_empty() {
            return Err(Error::usage(
                "cannot mix text messages and tool results in the same call",
            ));
        }

        if !results.is_empty() {
            let mut blocks = Vec::with_capacity(results.len());
            for r in results {
                if r.call_id.is_empty() {
                    return Err(Error::usage("tool result has an empty call_id"));
                }
                if self.history.tool_call(&r.call_id).is_none() {
                    return Err(Error::usage(format!(
                        "tool result references unknown call_id '{}'",
                        r.call_id
                    )));
                }
                blocks.push(ContentBlock::ToolResult(r));
            }
            return Ok(Message::with_blocks(MessageRole::User, blocks));
        }

        if texts.iter().all(|t| t.is_empty()) {
            return Err(Error::usage("text content is empty"));
        }
        // Every fragment keeps its place, empty ones included.
        Ok(Message::user(texts.join(" ")))
    }

    fn commit_reply(&mut self, reply: AdapterReply) -> ChatResponse {
        let usage = reply
            .raw_usage
            .as_ref()
            .and_then(|raw| self.extractor.extract(raw, &self.model, self.sync.name()));
        if let Some(u) = &usage {
            self.report_usage(u);
        }
        let message = assistant_message(reply.message.content);
        if !self.history.push(message.clone()) {
            debug!(session = %self.id, "backend returned an empty reply");
        }
        ChatResponse { message, usage }
    }

    /// Commits a fully drained streaming turn.
    pub(crate) fn commit_stream(&mut self, user: Message, text: String, calls: Vec<ToolCall>) -> Message {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::text(text));
        }
        blocks.extend(calls.into_iter().map(ContentBlock::ToolCall));
        let message = assistant_message(blocks);
        self.history.push(user);
        self.history.push(message.clone());
        info!(
            session = %self.id,
            history_len = self.history.len(),
            "streaming turn committed"
        );
        message
    }

    pub(crate) fn report_usage(&self, usage: &Usage) {
        debug!(
            backend = %usage.backend,
            model = %usage.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "usage"
        );
        if let Some(cb) = &self.options.usage_callback {
            cb(usage);
        }
    }
}

/// Builds the assistant message to commit, dropping tool calls without an id.
fn assistant_message(blocks: Vec<ContentBlock>) -> Message {
    let content = blocks
        .into_iter()
        .filter(|b| match b {
            ContentBlock::ToolCall(call) if call.id.is_empty() => {
                warn!(tool = %call.name, "dropping tool call without id");
                false
            }
            ContentBlock::Text { text } => !text.is_empty(),
            _ => true,
        })
        .collect();
    Message::with_blocks(MessageRole::Assistant, content)
}
