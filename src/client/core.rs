use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::client::session::{ChatSession, SessionOptions, UsageCallback};
use crate::config::BackendConfig;
use crate::drivers::{StreamingAdapter, SyncAdapter};
use crate::resilience::retry::{RetryPolicy, RetryingSession};
use crate::tokens::UsageExtractor;
use crate::types::{Schema, Usage};
use crate::{Error, ErrorContext, Result};

/// A configured backend: its sync shape, its streaming shape when it has one, and the options
/// given to every session created on it.
#[derive(Clone)]
pub struct Backend {
    sync: Arc<dyn SyncAdapter>,
    streaming: Option<Arc<dyn StreamingAdapter>>,
    extractor: Option<Arc<dyn UsageExtractor>>,
    options: SessionOptions,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.sync.name())
            .field("streaming", &self.streaming.is_some())
            .field("options", &self.options)
            .finish()
    }
}

impl Backend {
    pub fn sync_only(sync: Arc<dyn SyncAdapter>) -> Self {
        Self {
            sync,
            streaming: None,
            extractor: None,
            options: SessionOptions::default(),
        }
    }

    /// Both shapes, usually the same driver behind two trait objects.
    pub fn with_streaming(sync: Arc<dyn SyncAdapter>, streaming: Arc<dyn StreamingAdapter>) -> Self {
        Self {
            streaming: Some(streaming),
            ..Self::sync_only(sync)
        }
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_usage_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Usage) + Send + Sync + 'static,
    {
        let cb: UsageCallback = Arc::new(callback);
        self.options.usage_callback = Some(cb);
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.options.attempt_timeout = Some(timeout);
        self
    }

    /// Overrides the extractor the adapter provides.
    pub fn with_usage_extractor(mut self, extractor: Arc<dyn UsageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn name(&self) -> &str {
        self.sync.name()
    }

    pub fn supports_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub(crate) fn sync_adapter(&self) -> Arc<dyn SyncAdapter> {
        self.sync.clone()
    }

    pub(crate) fn streaming_adapter(&self) -> Option<Arc<dyn StreamingAdapter>> {
        self.streaming.clone()
    }

    pub(crate) fn usage_extractor(&self) -> Arc<dyn UsageExtractor> {
        self.extractor
            .clone()
            .unwrap_or_else(|| self.sync.usage_extractor())
    }
}

/// Text and usage of a one-shot completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Entry point: creates sessions on one backend and runs one-shot completions.
#[derive(Debug, Clone)]
pub struct ChatClient {
    backend: Backend,
    retry: Option<RetryPolicy>,
}

impl ChatClient {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            retry: None,
        }
    }

    /// Builds the configured backend. A `retry` section enables retries for
    /// [`ChatClient::generate_completion`] and [`ChatClient::start_retrying_chat`].
    pub fn from_config(config: &BackendConfig) -> Result<Self> {
        let backend = config.build_backend()?;
        info!(
            backend = backend.name(),
            streaming = backend.supports_streaming(),
            "chat client ready"
        );
        // `inference.max_retries` is shorthand for a default policy with that many retries.
        let retry = config.retry.clone().or_else(|| {
            config
                .inference
                .max_retries
                .map(|n| RetryPolicy::default().with_max_attempts(n.saturating_add(1)))
        });
        Ok(Self { backend, retry })
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn start_chat(&self, system_prompt: impl Into<String>) -> ChatSession {
        ChatSession::new(&self.backend, system_prompt)
    }

    /// Like [`ChatClient::start_chat`] on `model`, falling back to the default model when the
    /// backend does not support it.
    pub fn start_chat_with_model(&self, system_prompt: impl Into<String>, model: &str) -> ChatSession {
        self.start_chat(system_prompt).with_model(model)
    }

    /// A session wrapped in the configured retry policy, or the default one.
    pub fn start_retrying_chat(&self, system_prompt: impl Into<String>) -> RetryingSession {
        self.retry
            .clone()
            .unwrap_or_default()
            .wrap(self.start_chat(system_prompt))
    }

    pub async fn generate_completion(&self, prompt: &str) -> Result<CompletionResponse> {
        let session = self.start_chat("");
        self.complete_on(session, prompt).await
    }

    /// One-shot completion on an explicit model. Unlike sessions, an unsupported model is an
    /// error here.
    pub async fn generate_completion_with_model(
        &self,
        prompt: &str,
        model: &str,
    ) -> Result<CompletionResponse> {
        if !self.backend.sync.supports_model(model) {
            return Err(Error::Usage {
                message: format!("model '{}' is not supported", model),
                context: ErrorContext::new()
                    .with_backend(self.backend.name())
                    .with_model(model)
                    .with_operation("generate_completion"),
            });
        }
        let session = self.start_chat("").with_model(model);
        self.complete_on(session, prompt).await
    }

    pub fn list_models(&self) -> Vec<String> {
        self.backend.sync.list_models()
    }

    /// Structured output is not available on any shipped backend; the call always fails with
    /// [`Error::Capability`].
    pub fn set_response_schema(&mut self, schema: &Schema) -> Result<()> {
        Err(Error::capability_with_context(
            format!(
                "response schema ({} properties) is not supported",
                schema.properties.len()
            ),
            ErrorContext::new()
                .with_backend(self.backend.name())
                .with_operation("set_response_schema"),
        ))
    }

    async fn complete_on(&self, session: ChatSession, prompt: &str) -> Result<CompletionResponse> {
        let response = match &self.retry {
            Some(policy) => policy.clone().wrap(session).send(prompt).await?,
            None => {
                let mut session = session;
                session.send(prompt).await?
            }
        };
        Ok(CompletionResponse {
            text: response.text(),
            usage: response.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{AdapterReply, ModelCatalog, TurnRequest};
    use crate::types::Message;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Echo {
        catalog: ModelCatalog,
    }

    #[async_trait]
    impl SyncAdapter for Echo {
        fn name(&self) -> &str {
            "echo"
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
            let last = request.history.last().map(|m| m.text()).unwrap_or_default();
            Ok(AdapterReply {
                message: Message::assistant(format!("{}:{}", request.model, last)),
                raw_usage: Some(json!({"input_tokens": 3, "output_tokens": 1})),
            })
        }
    }

    fn echo_backend() -> Backend {
        Backend::sync_only(Arc::new(Echo {
            catalog: ModelCatalog::new("small", vec!["small".into(), "large".into()]),
        }))
    }

    #[tokio::test]
    async fn test_generate_completion_reports_usage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let client = ChatClient::new(
            echo_backend().with_usage_callback(move |u| sink.lock().unwrap().push(u.total_tokens)),
        );
        let out = client.generate_completion("hi").await.unwrap();
        assert_eq!(out.text, "small:hi");
        assert_eq!(out.usage.unwrap().total_tokens, 4);
        assert_eq!(*seen.lock().unwrap(), vec![4]);
    }

    #[tokio::test]
    async fn test_completion_rejects_unsupported_model() {
        let client = ChatClient::new(echo_backend());
        let err = client
            .generate_completion_with_model("hi", "huge")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Usage { .. }));

        let out = client.generate_completion_with_model("hi", "large").await.unwrap();
        assert_eq!(out.text, "large:hi");
    }

    #[test]
    fn test_response_schema_is_a_capability_error() {
        let mut client = ChatClient::new(echo_backend());
        let schema = Schema::object();
        let err = client.set_response_schema(&schema).unwrap_err();
        assert!(matches!(err, Error::Capability { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_session_falls_back_to_default_model() {
        let client = ChatClient::new(echo_backend());
        assert_eq!(client.start_chat_with_model("", "huge").model(), "small");
        assert_eq!(client.start_chat_with_model("", "large").model(), "large");
        assert_eq!(client.list_models(), vec!["small", "large"]);
        assert!(!client.backend().supports_streaming());
    }
}
