use crate::error_code::StandardErrorCode;
use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Structured context attached to session and backend errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Backend name (e.g., "messages", "gateway")
    pub backend: Option<String>,
    /// Model the failing call was addressed to
    pub model: Option<String>,
    /// Operation that failed (e.g., "invoke", "open_stream", "send")
    pub operation: Option<String>,
    /// HTTP status returned by the backend, if any
    pub status_code: Option<u16>,
    /// Standard error code derived from the backend response
    pub standard_code: Option<StandardErrorCode>,
    /// Client-generated request id sent with the call
    pub request_id: Option<String>,
    /// Free-form details (response body excerpt, offending field, ...)
    pub details: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_standard_code(mut self, code: StandardErrorCode) -> Self {
        self.standard_code = Some(code);
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Error type for chat sessions and backend adapters.
///
/// Variants are categories, not causes: every backend failure is classified into exactly one of
/// them, and [`Error::is_retryable`] is a pure function of the category (plus message markers
/// for backends that only report text).
#[derive(Debug, Error)]
pub enum Error {
    /// Caller misuse detected before any backend call was made.
    #[error("Usage error: {message}{}", format_context(.context))]
    Usage {
        message: String,
        context: ErrorContext,
    },

    /// Connection failure, timeout or interrupted body.
    #[error("Transport error: {message}{}", format_context(.context))]
    Transport {
        message: String,
        context: ErrorContext,
    },

    /// Backend signalled rate limiting or overload.
    #[error("Backend overloaded: {message}{}", format_context(.context))]
    Overloaded {
        message: String,
        context: ErrorContext,
        retry_after: Option<Duration>,
    },

    /// Backend understood the request and refused it.
    #[error("Request rejected: {message}{}", format_context(.context))]
    Rejected {
        message: String,
        context: ErrorContext,
    },

    /// A raw stream event did not fit the event taxonomy.
    #[error("Protocol decode error: {message}{}", format_context(.context))]
    ProtocolDecode {
        message: String,
        context: ErrorContext,
    },

    #[error("Operation cancelled{}", format_context(.context))]
    Cancelled { context: ErrorContext },

    /// The configured backend lacks the requested shape (e.g. streaming).
    #[error("Capability error: {message}{}", format_context(.context))]
    Capability {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref backend) = ctx.backend {
        parts.push(format!("backend: {}", backend));
    }
    if let Some(ref model) = ctx.model {
        parts.push(format!("model: {}", model));
    }
    if let Some(ref op) = ctx.operation {
        parts.push(format!("operation: {}", op));
    }
    if let Some(status) = ctx.status_code {
        parts.push(format!("status: {}", status));
    }
    if let Some(code) = ctx.standard_code {
        parts.push(format!("code: {}", code));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn usage(msg: impl Into<String>) -> Self {
        Error::Usage {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn transport_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Transport {
            message: msg.into(),
            context,
        }
    }

    pub fn rejected_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Rejected {
            message: msg.into(),
            context,
        }
    }

    pub fn protocol_decode(msg: impl Into<String>) -> Self {
        Error::ProtocolDecode {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn cancelled() -> Self {
        Error::Cancelled {
            context: ErrorContext::new(),
        }
    }

    pub fn capability_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Capability {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Builds the error category that corresponds to a classified backend failure.
    pub fn from_standard_code(
        code: StandardErrorCode,
        msg: impl Into<String>,
        context: ErrorContext,
    ) -> Self {
        let message = msg.into();
        let context = context.with_standard_code(code);
        match code {
            StandardErrorCode::RateLimited | StandardErrorCode::Overloaded => Error::Overloaded {
                message,
                context,
                retry_after: None,
            },
            StandardErrorCode::ServerError | StandardErrorCode::Timeout => {
                Error::Transport { message, context }
            }
            StandardErrorCode::Cancelled => Error::Cancelled { context },
            StandardErrorCode::Unknown if context.status_code.map_or(false, |s| s >= 500) => {
                Error::Transport { message, context }
            }
            _ => Error::Rejected { message, context },
        }
    }

    /// Whether repeating the same call may succeed.
    ///
    /// Transport failures and overload are retryable. A rejection is retryable only when its
    /// message carries a known transient marker, which covers backends that wrap throttling in
    /// a generic error body.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport { .. } | Error::Overloaded { .. } => true,
            Error::Rejected { message, .. } => StandardErrorCode::from_message(message)
                .map_or(false, |code| code.transient()),
            _ => false,
        }
    }

    /// Backend-suggested delay before the next attempt, when one was reported.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Overloaded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Usage { context, .. }
            | Error::Transport { context, .. }
            | Error::Overloaded { context, .. }
            | Error::Rejected { context, .. }
            | Error::ProtocolDecode { context, .. }
            | Error::Cancelled { context }
            | Error::Capability { context, .. }
            | Error::Configuration { context, .. } => Some(context),
            Error::Serialization(_) | Error::Io(_) => None,
        }
    }

    pub fn standard_code(&self) -> Option<StandardErrorCode> {
        self.context().and_then(|c| c.standard_code)
    }

    /// Fills backend/model/operation on an error produced by a lower layer, without
    /// overwriting anything that layer already recorded.
    pub fn in_operation(mut self, backend: &str, model: &str, operation: &str) -> Self {
        let ctx = match &mut self {
            Error::Usage { context, .. }
            | Error::Transport { context, .. }
            | Error::Overloaded { context, .. }
            | Error::Rejected { context, .. }
            | Error::ProtocolDecode { context, .. }
            | Error::Cancelled { context }
            | Error::Capability { context, .. }
            | Error::Configuration { context, .. } => context,
            Error::Serialization(_) | Error::Io(_) => return self,
        };
        ctx.backend.get_or_insert_with(|| backend.to_string());
        ctx.model.get_or_insert_with(|| model.to_string());
        ctx.operation.get_or_insert_with(|| operation.to_string());
        self
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        let code = if err.is_timeout() {
            StandardErrorCode::Timeout
        } else {
            StandardErrorCode::ServerError
        };
        Error::Transport {
            message: err.to_string(),
            context: ErrorContext::new().with_standard_code(code),
        }
    }
}
