//! 标准错误码：把 HTTP 状态码、厂商错误类型和错误文本统一映射为稳定的错误码。
//!
//! Standard error codes shared by every backend driver.
//!
//! Drivers never decide retry semantics on their own. They translate whatever the backend
//! reported (an HTTP status, an `error.type` field in the body, or only a message string)
//! into a [`StandardErrorCode`], and [`crate::Error::from_standard_code`] turns that code into
//! one of the session-level error categories.
//!
//! | Prefix | Category    | Description                    |
//! |--------|-------------|--------------------------------|
//! | E1xxx  | client      | Request-side errors            |
//! | E2xxx  | rate        | Rate limit and quota errors    |
//! | E3xxx  | server      | Backend-side errors            |
//! | E4xxx  | operational | Lifecycle and state conflicts  |
//! | E9xxx  | unknown     | Catch-all / unclassified       |
//!
//! ```rust
//! use ai_chat_rust::error_code::StandardErrorCode;
//!
//! let code = StandardErrorCode::from_http_status(529);
//! assert_eq!(code, StandardErrorCode::Overloaded);
//! assert!(code.transient());
//!
//! let code = StandardErrorCode::from_message("ThrottlingException: Rate exceeded");
//! assert_eq!(code, Some(StandardErrorCode::RateLimited));
//! ```

use serde_json::Value;
use std::fmt;

/// Canonical error code attached to backend failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardErrorCode {
    /// E1001: Malformed request, invalid parameters, or missing required fields
    InvalidRequest,
    /// E1002: Invalid, expired, or missing credentials
    Authentication,
    /// E1003: Valid credentials but insufficient permissions
    PermissionDenied,
    /// E1004: Requested model or endpoint does not exist
    NotFound,
    /// E1005: Input exceeds context window or payload size limit
    RequestTooLarge,
    /// E2001: Request rate limit exceeded
    RateLimited,
    /// E2002: Account usage quota or billing limit reached
    QuotaExhausted,
    /// E3001: Internal server error on the backend
    ServerError,
    /// E3002: Backend temporarily overloaded
    Overloaded,
    /// E3003: Request timed out before a response was received
    Timeout,
    /// E4001: State conflict
    Conflict,
    /// E4002: Request was cancelled by the caller
    Cancelled,
    /// E9999: Error could not be classified
    Unknown,
}

impl StandardErrorCode {
    /// Returns the canonical code string (e.g., `"E1001"`).
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "E1001",
            Self::Authentication => "E1002",
            Self::PermissionDenied => "E1003",
            Self::NotFound => "E1004",
            Self::RequestTooLarge => "E1005",
            Self::RateLimited => "E2001",
            Self::QuotaExhausted => "E2002",
            Self::ServerError => "E3001",
            Self::Overloaded => "E3002",
            Self::Timeout => "E3003",
            Self::Conflict => "E4001",
            Self::Cancelled => "E4002",
            Self::Unknown => "E9999",
        }
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::Authentication => "authentication",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::RequestTooLarge => "request_too_large",
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Conflict => "conflict",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the condition is expected to clear up on its own.
    ///
    /// Quota exhaustion is deliberately excluded: retrying a billing limit only burns attempts.
    #[inline]
    pub fn transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError | Self::Overloaded | Self::Timeout
        )
    }

    /// Returns the category: `"client"`, `"rate"`, `"server"`, `"operational"`, or `"unknown"`.
    #[inline]
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidRequest
            | Self::Authentication
            | Self::PermissionDenied
            | Self::NotFound
            | Self::RequestTooLarge => "client",
            Self::RateLimited | Self::QuotaExhausted => "rate",
            Self::ServerError | Self::Overloaded | Self::Timeout => "server",
            Self::Conflict | Self::Cancelled => "operational",
            Self::Unknown => "unknown",
        }
    }

    /// Maps a backend error type string (`error.type` / `error.code`) to a standard code.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let code = match provider_code {
            "invalid_request" | "invalid_request_error" | "ValidationException" => {
                Self::InvalidRequest
            }
            "authentication" | "authentication_error" | "invalid_api_key"
            | "UnrecognizedClientException" => Self::Authentication,
            "permission_denied" | "permission_error" | "AccessDeniedException" => {
                Self::PermissionDenied
            }
            "not_found" | "not_found_error" | "model_not_found" | "ResourceNotFoundException" => {
                Self::NotFound
            }
            "request_too_large" | "context_length_exceeded" => Self::RequestTooLarge,
            "rate_limited" | "rate_limit_error" | "rate_limit_exceeded"
            | "ThrottlingException" => Self::RateLimited,
            "quota_exhausted" | "insufficient_quota" | "ServiceQuotaExceededException" => {
                Self::QuotaExhausted
            }
            "server_error" | "api_error" | "InternalServerException" => Self::ServerError,
            "overloaded" | "overloaded_error" | "ServiceUnavailableException" => Self::Overloaded,
            "timeout" | "ModelTimeoutException" => Self::Timeout,
            "conflict" => Self::Conflict,
            "cancelled" => Self::Cancelled,
            _ => return None,
        };
        Some(code)
    }

    /// Maps an HTTP status code to the most likely standard code.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::InvalidRequest,
            401 => Self::Authentication,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            408 => Self::Timeout,
            409 => Self::Conflict,
            413 => Self::RequestTooLarge,
            429 => Self::RateLimited,
            500 | 502 => Self::ServerError,
            503 => Self::Overloaded,
            504 => Self::Timeout,
            529 => Self::Overloaded,
            _ => Self::Unknown,
        }
    }

    /// Scans a free-form error message for well-known transient markers.
    ///
    /// Matching ignores case and separators, so `"Service Unavailable"`,
    /// `"ServiceUnavailableException"` and `"service_unavailable"` all hit.
    pub fn from_message(message: &str) -> Option<Self> {
        let folded: String = message
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        if folded.contains("throttling") || folded.contains("ratelimit") {
            Some(Self::RateLimited)
        } else if folded.contains("serviceunavailable") || folded.contains("overloaded") {
            Some(Self::Overloaded)
        } else if folded.contains("internalservererror") {
            Some(Self::ServerError)
        } else if folded.contains("requesttimeout") {
            Some(Self::Timeout)
        } else {
            None
        }
    }

    /// Classifies a failed HTTP response: a recognized `error.type` in the body wins over the
    /// bare status, and the status wins over message markers.
    pub fn classify_response(status: u16, body: Option<&Value>) -> Self {
        let provider_code = body.and_then(|b| {
            b.pointer("/error/type")
                .or_else(|| b.pointer("/error/code"))
                .or_else(|| b.get("__type"))
                .and_then(|v| v.as_str())
        });
        if let Some(code) = provider_code.and_then(Self::from_provider_code) {
            return code;
        }
        match Self::from_http_status(status) {
            Self::Unknown => body
                .and_then(error_message)
                .and_then(|m| Self::from_message(&m))
                .unwrap_or(Self::Unknown),
            code => code,
        }
    }
}

/// Extracts a human-readable message from a backend error body.
pub fn error_message(body: &Value) -> Option<String> {
    body.pointer("/error/message")
        .or_else(|| body.get("message"))
        .or_else(|| body.get("error"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl fmt::Display for StandardErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
