//! 会话客户端：会话历史、同步与流式对话轮次、一次性补全。
//!
//! Chat client surface. Implementation is split into submodules under `src/client/`.
//!
//! | Type | Role |
//! |------|------|
//! | [`ChatClient`] | creates sessions, runs one-shot completions, lists models |
//! | [`ChatSession`] | one conversation: history, functions, sync and streaming turns |
//! | [`ChatStream`] | delivery units of one streaming turn, committed when drained |
//! | [`History`] | ordered messages of a session |

pub mod core;
pub mod history;
pub mod session;
pub mod stream;

pub use core::{Backend, ChatClient, CompletionResponse};
pub use history::History;
pub use session::{ChatResponse, ChatSession, SessionOptions, UsageCallback};
pub use stream::ChatStream;
