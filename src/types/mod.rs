//! 核心类型定义：消息、内容块、函数定义、流事件与用量。
//!
//! Core data model shared by every layer.
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`message`] | [`Message`], [`ContentBlock`], [`ToolCall`], [`ToolResult`], send [`Content`], [`StoredMessage`] |
//! | [`tool`] | [`FunctionDefinition`] and its parameter [`Schema`] |
//! | [`events`] | [`RawEvent`] from drivers, [`DeliveryUnit`] to callers |
//! | [`usage`] | normalized [`Usage`] |

pub mod events;
pub mod message;
pub mod tool;
pub mod usage;

pub use events::{BlockKind, DeliveryUnit, Fragment, RawEvent};
pub use message::{
    Content, ContentBlock, Contents, Message, MessageRole, MessageSource, StoredKind, StoredMessage,
    ToolCall, ToolResult,
};
pub use tool::{FunctionDefinition, Schema, SchemaType};
pub use usage::Usage;
