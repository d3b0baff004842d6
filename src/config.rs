//! 配置模块：显式的推理参数、传输参数与后端配置，支持 YAML 加载与校验。
//!
//! # Configuration
//!
//! Every knob the runtime uses arrives through one of these structs. Nothing here reads the
//! process environment: the caller resolves credentials and endpoints and hands them over,
//! either by building the structs directly or by loading a YAML document.
//!
//! ```yaml
//! kind: messages
//! transport:
//!   base_url: https://llm.internal.example/v1/
//!   api_key: sk-...
//!   auth_header: x-api-key
//!   auth_scheme: null
//!   timeout_ms: 60000
//! inference:
//!   model: claude-sonnet-4-20250514
//!   temperature: 0.1
//!   max_tokens: 4096
//! retry:
//!   max_attempts: 5
//!   initial_backoff_ms: 250
//! ```

use crate::client::{Backend, SessionOptions};
use crate::drivers::{GatewayDriver, MessagesDriver, StreamingAdapter, SyncAdapter};
use crate::resilience::retry::RetryPolicy;
use crate::transport::HttpTransport;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Sampling and length parameters forwarded to the backend.
///
/// `None` means "not set": [`InferenceConfig::merge_over`] fills unset fields from a set of
/// defaults, and drivers omit fields that remain unset from the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
    /// Retries on transient failures when no `retry` section is configured.
    pub max_retries: Option<u32>,
}

impl InferenceConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Range checks: temperature in `[0, 2]`, top_p in `[0, 1]`, model non-blank when set.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(invalid_field(
                    "inference.temperature",
                    format!("temperature must be within [0, 2], got {}", t),
                ));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(invalid_field(
                    "inference.top_p",
                    format!("top_p must be within [0, 1], got {}", p),
                ));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(invalid_field("inference.model", "model must not be blank"));
            }
        }
        Ok(())
    }

    /// Returns a config where every field set on `self` wins and unset fields come from
    /// `defaults`.
    pub fn merge_over(&self, defaults: &InferenceConfig) -> InferenceConfig {
        InferenceConfig {
            model: self.model.clone().or_else(|| defaults.model.clone()),
            temperature: self.temperature.or(defaults.temperature),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            top_p: self.top_p.or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
            max_retries: self.max_retries.or(defaults.max_retries),
        }
    }
}

fn invalid_field(field: &str, msg: impl Into<String>) -> Error {
    Error::Configuration {
        message: msg.into(),
        context: ErrorContext::new().with_details(format!("field: {}", field)),
    }
}

fn default_auth_header() -> String {
    "authorization".to_string()
}

fn default_auth_scheme() -> Option<String> {
    Some("Bearer".to_string())
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_pool_max_idle() -> usize {
    32
}

/// HTTP client settings for one backend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint root; request paths are joined onto it.
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Header carrying the credential.
    #[serde(default = "default_auth_header")]
    pub auth_header: String,
    /// Prefix placed before the key (`"<scheme> <key>"`); `None` sends the bare key.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Extra static headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl TransportConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            auth_header: default_auth_header(),
            auth_scheme: default_auth_scheme(),
            timeout_ms: default_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle(),
            proxy: None,
            accept_invalid_certs: false,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sends the credential as `<header>: [<scheme> ]<key>`.
    pub fn with_auth(mut self, header: impl Into<String>, scheme: Option<&str>) -> Self {
        self.auth_header = header.into();
        self.auth_scheme = scheme.map(str::to_string);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Typed content-block messages API with SSE streaming.
    Messages,
    /// Plain role/content chat gateway with line streaming.
    Gateway,
}

fn default_true() -> bool {
    true
}

/// Complete description of one backend, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub transport: TransportConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Models accepted by this backend; empty accepts any model name.
    #[serde(default)]
    pub models: Vec<String>,
    /// Register the streaming shape; `false` makes the backend sync-only.
    #[serde(default = "default_true")]
    pub streaming: bool,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    /// Upper bound for a single backend attempt, on top of the HTTP timeout.
    #[serde(default)]
    pub attempt_timeout_ms: Option<u64>,
}

impl BackendConfig {
    pub fn new(kind: BackendKind, transport: TransportConfig) -> Self {
        Self {
            kind,
            transport,
            inference: InferenceConfig::default(),
            models: Vec::new(),
            streaming: true,
            retry: None,
            attempt_timeout_ms: None,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: BackendConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::configuration(format!("invalid backend config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw).map_err(|e| match e {
            Error::Configuration { message, context } => Error::Configuration {
                message,
                context: context.with_details(format!("path: {}", path.display())),
            },
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.inference.validate()?;
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        url::Url::parse(&self.transport.base_url).map_err(|e| {
            invalid_field(
                "transport.base_url",
                format!("invalid base url '{}': {}", self.transport.base_url, e),
            )
        })?;
        Ok(())
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            attempt_timeout: self.attempt_timeout_ms.map(Duration::from_millis),
            ..SessionOptions::default()
        }
    }

    /// Builds the configured driver and registers its shapes.
    pub fn build_backend(&self) -> Result<Backend> {
        self.validate()?;
        let transport = HttpTransport::new(&self.transport)?;
        let backend = match self.kind {
            BackendKind::Messages => {
                let driver = Arc::new(MessagesDriver::new(
                    transport,
                    self.inference.clone(),
                    self.models.clone(),
                ));
                register(driver, self.streaming)
            }
            BackendKind::Gateway => {
                let driver = Arc::new(GatewayDriver::new(
                    transport,
                    self.inference.clone(),
                    self.models.clone(),
                ));
                register(driver, self.streaming)
            }
        };
        Ok(backend.with_options(self.session_options()))
    }
}

fn register<D>(driver: Arc<D>, streaming: bool) -> Backend
where
    D: StreamingAdapter + 'static,
{
    let sync: Arc<dyn SyncAdapter> = driver.clone();
    if streaming {
        let stream: Arc<dyn StreamingAdapter> = driver;
        Backend::with_streaming(sync, stream)
    } else {
        Backend::sync_only(sync)
    }
}

/// `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_validation() {
        assert!(InferenceConfig::default().is_valid());
        assert!(InferenceConfig::default().with_temperature(2.0).is_valid());
        assert!(!InferenceConfig::default().with_temperature(2.5).is_valid());
        assert!(!InferenceConfig::default().with_top_p(1.1).is_valid());
        assert!(!InferenceConfig::default().with_model("  ").is_valid());
    }

    #[test]
    fn test_merge_prefers_explicit_fields() {
        let defaults = InferenceConfig::default()
            .with_model("base")
            .with_temperature(0.1)
            .with_max_tokens(4096);
        let merged = InferenceConfig::default()
            .with_temperature(0.7)
            .merge_over(&defaults);
        assert_eq!(merged.model.as_deref(), Some("base"));
        assert_eq!(merged.temperature, Some(0.7));
        assert_eq!(merged.max_tokens, Some(4096));
        assert_eq!(merged.top_p, None);
    }

    #[test]
    fn test_backend_config_from_yaml() {
        let yaml = r#"
kind: gateway
transport:
  base_url: http://localhost:8080/
  api_key: secret
  auth_scheme: Token
inference:
  model: small-model
  temperature: 0.3
models: [small-model, large-model]
streaming: false
retry:
  max_attempts: 4
  initial_backoff_ms: 100
  multiplier: 3.0
  max_backoff_ms: 2000
  jitter: false
"#;
        let cfg = BackendConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.kind, BackendKind::Gateway);
        assert_eq!(cfg.transport.auth_header, "authorization");
        assert_eq!(cfg.transport.auth_scheme.as_deref(), Some("Token"));
        assert_eq!(cfg.transport.timeout(), Duration::from_secs(30));
        assert!(!cfg.streaming);
        let retry = cfg.retry.unwrap();
        assert_eq!(retry.max_attempts, 4);
        assert_eq!(retry.initial_backoff, Duration::from_millis(100));
        assert!(!retry.jitter);
    }

    #[test]
    fn test_invalid_yaml_values_are_rejected() {
        let yaml = r#"
kind: messages
transport:
  base_url: "not a url"
"#;
        let err = BackendConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let yaml = r#"
kind: messages
transport:
  base_url: http://localhost/
inference:
  temperature: 3.0
"#;
        assert!(BackendConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_sync_only_backend_has_no_streaming_shape() {
        let mut cfg = BackendConfig::new(
            BackendKind::Gateway,
            TransportConfig::new("http://localhost:9/"),
        );
        cfg.streaming = false;
        let backend = cfg.build_backend().unwrap();
        assert!(!backend.supports_streaming());
    }
}
