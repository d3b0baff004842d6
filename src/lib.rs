//! # ai-chat-rust
//!
//! 面向多种对话式 AI 后端的统一会话运行时：一个会话抽象同时覆盖请求/响应与流式两种后端形态。
//!
//! Provider-agnostic chat session runtime. One [`ChatSession`] abstraction drives
//! request/response backends and streaming backends alike, with function calling, usage
//! reporting and retry built in.
//!
//! ## Core Behavior
//!
//! - **History is atomic per turn**: a failed, cancelled or abandoned turn leaves history
//!   exactly as it was.
//! - **Streaming is aggregated**: text is delivered as it arrives, tool calls only once their
//!   arguments are complete.
//! - **Errors are categories**: every backend failure maps onto one [`Error`] variant, and
//!   retryability is a function of that variant.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_chat_rust::{BackendConfig, ChatClient};
//!
//! #[tokio::main]
//! async fn main() -> ai_chat_rust::Result<()> {
//!     let config = BackendConfig::from_path("backend.yaml")?;
//!     let client = ChatClient::from_config(&config)?;
//!
//!     let mut chat = client.start_chat("You are a terse assistant.");
//!     let reply = chat.send("What is a pod?").await?;
//!     println!("{}", reply.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | messages, content blocks, tool definitions, stream events, usage |
//! | [`drivers`] | backend adapter traits and the bundled HTTP drivers |
//! | [`pipeline`] | wire decoders and the stream aggregator |
//! | [`client`] | sessions, streaming turns and the client entry point |
//! | [`resilience`] | retry policy and retrying sessions |
//! | [`tokens`] | usage normalization and pricing |
//! | [`config`] | YAML backend configuration |
//! | [`transport`] | shared HTTP transport |

pub mod client;
pub mod config;
pub mod drivers;
pub mod error_code;
pub mod pipeline;
pub mod resilience;
pub mod tokens;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::{
    Backend, ChatClient, ChatResponse, ChatSession, ChatStream, CompletionResponse,
    SessionOptions, UsageCallback,
};
pub use config::{BackendConfig, BackendKind, InferenceConfig, TransportConfig};
pub use drivers::{StreamingAdapter, SyncAdapter};
pub use error_code::StandardErrorCode;
pub use resilience::{RetryPolicy, RetryingSession};
pub use types::{
    Content, ContentBlock, Contents, DeliveryUnit, FunctionDefinition, Message, MessageRole,
    StoredMessage, ToolCall, ToolResult, Usage,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A specialized Result for pipeline operations
pub type PipeResult<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `PipeResult<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = PipeResult<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
