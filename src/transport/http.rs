use crate::config::TransportConfig;
use crate::error_code::{error_message, StandardErrorCode};
use crate::{BoxStream, Error, ErrorContext, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::Proxy;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const REQUEST_ID_HEADER: &str = "x-request-id";
const MAX_ERROR_DETAIL: usize = 512;

/// Thin reqwest wrapper configured entirely from a [`TransportConfig`].
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    auth: Option<(String, String)>,
    headers: Vec<(String, String)>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("auth_header", &self.auth.as_ref().map(|(h, _)| h.as_str()))
            .finish()
    }
}

impl HttpTransport {
    pub fn new(cfg: &TransportConfig) -> Result<Self> {
        let mut base_url = Url::parse(&cfg.base_url).map_err(|e| {
            Error::configuration(format!("invalid base url '{}': {}", cfg.base_url, e))
        })?;
        // Url::join drops the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs);

        if let Some(proxy_url) = &cfg.proxy {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration(format!("invalid proxy '{}': {}", proxy_url, e))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::from(TransportError::Other(e.to_string())))?;

        let auth = cfg.api_key.as_ref().map(|key| {
            let value = match &cfg.auth_scheme {
                Some(scheme) => format!("{} {}", scheme, key),
                None => key.clone(),
            };
            (cfg.auth_header.clone(), value)
        });

        Ok(Self {
            client,
            base_url,
            auth,
            headers: cfg
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Adds a static header unless the configuration already set one with the same name.
    pub fn with_default_header(mut self, name: &str, value: &str) -> Self {
        if !self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
            self.headers.push((name.to_string(), value.to_string()));
        }
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::configuration(format!("invalid endpoint path '{}': {}", path, e)))
    }

    fn request(&self, method: reqwest::Method, url: Url, request_id: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, url)
            .header(REQUEST_ID_HEADER, request_id);
        if let Some((name, value)) = &self.auth {
            req = req.header(name.as_str(), value.as_str());
        }
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    /// POSTs a JSON body and returns the response once its status is known to be a success.
    pub async fn post_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &Value,
        accept: &str,
    ) -> Result<reqwest::Response> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(path)?;
        debug!(url = %url, request_id = %request_id, "POST");

        let resp = self
            .request(reqwest::Method::POST, url, &request_id)
            .query(query)
            .header("accept", accept)
            .json(body)
            .send()
            .await
            .map_err(|e| with_request_id(Error::from(TransportError::Http(e)), &request_id))?;

        Self::check_status(resp, &request_id).await
    }

    pub async fn get_json(&self, path: &str) -> Result<Value> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(path)?;
        let resp = self
            .request(reqwest::Method::GET, url, &request_id)
            .send()
            .await
            .map_err(|e| with_request_id(Error::from(TransportError::Http(e)), &request_id))?;
        let resp = Self::check_status(resp, &request_id).await?;
        read_json(resp).await
    }

    async fn check_status(resp: reqwest::Response, request_id: &str) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let status = status.as_u16();
        let retry_after = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = resp.text().await.unwrap_or_default();
        let body: Option<Value> = serde_json::from_str(&text).ok();
        let code = StandardErrorCode::classify_response(status, body.as_ref());
        let message = body
            .as_ref()
            .and_then(error_message)
            .unwrap_or_else(|| format!("HTTP {}", status));

        warn!(
            http_status = status,
            error_code = code.code(),
            request_id = %request_id,
            "backend returned error status"
        );

        let mut ctx = ErrorContext::new()
            .with_status_code(status)
            .with_request_id(request_id);
        if !text.is_empty() {
            ctx = ctx.with_details(truncate(&text, MAX_ERROR_DETAIL));
        }
        let mut err = Error::from_standard_code(code, message, ctx);
        if let Error::Overloaded {
            retry_after: slot, ..
        } = &mut err
        {
            *slot = retry_after;
        }
        Err(err)
    }
}

/// Reads a complete JSON response body. A body that is not JSON is a decode failure, not a
/// transport failure.
pub async fn read_json(resp: reqwest::Response) -> Result<Value> {
    resp.json::<Value>().await.map_err(|e| {
        if e.is_decode() {
            Error::protocol_decode(format!("response body is not valid JSON: {}", e))
        } else {
            Error::from(TransportError::Http(e))
        }
    })
}

/// Converts a response body into a byte stream owned by the caller. Dropping the stream
/// closes the connection.
pub fn byte_stream(resp: reqwest::Response) -> BoxStream<'static, Bytes> {
    Box::pin(
        resp.bytes_stream()
            .map_err(|e| Error::from(TransportError::Http(e))),
    )
}

fn with_request_id(err: Error, request_id: &str) -> Error {
    match err {
        Error::Transport { message, context } => Error::Transport {
            message,
            context: context.with_request_id(request_id),
        },
        other => other,
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Http(e) if e.is_timeout())
    }
}
