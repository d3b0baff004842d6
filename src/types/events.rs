//! Raw backend events and the delivery units the session hands to callers.
//!
//! A streaming driver translates its wire protocol into [`RawEvent`]s; the
//! [`crate::pipeline::aggregate::StreamAggregator`] turns those into [`DeliveryUnit`]s.
//!
//! ```text
//! BlockOpen(0, text)  BlockDelta(0, "Hel")  BlockDelta(0, "lo")  BlockClose(0)
//!        │                   │                     │
//!        └──────────────► TextDelta("Hel")   TextDelta("lo")
//!
//! BlockOpen(1, tool_call, id, name)  BlockDelta(1, "{\"a\"")  BlockDelta(1, ":1}")  BlockClose(1)
//!                                                                                    │
//!                                                      CompletedToolCall{a: 1} ◄─────┘
//! ```

use crate::types::message::ToolCall;
use crate::types::usage::Usage;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolCall,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    /// A piece of the JSON-encoded arguments of a tool call.
    Arguments(String),
}

/// Protocol-neutral streaming event. `slot` identifies a content block within one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    BlockOpen {
        slot: u32,
        kind: BlockKind,
        id: Option<String>,
        name: Option<String>,
    },
    BlockDelta {
        slot: u32,
        fragment: Fragment,
    },
    BlockClose {
        slot: u32,
    },
    /// End of the turn; `usage` is the backend's raw usage object, if it sent one.
    TurnComplete {
        usage: Option<Value>,
    },
}

impl RawEvent {
    pub fn open_text(slot: u32) -> Self {
        RawEvent::BlockOpen {
            slot,
            kind: BlockKind::Text,
            id: None,
            name: None,
        }
    }

    pub fn open_tool_call(slot: u32, id: impl Into<String>, name: impl Into<String>) -> Self {
        RawEvent::BlockOpen {
            slot,
            kind: BlockKind::ToolCall,
            id: Some(id.into()),
            name: Some(name.into()),
        }
    }

    pub fn text(slot: u32, text: impl Into<String>) -> Self {
        RawEvent::BlockDelta {
            slot,
            fragment: Fragment::Text(text.into()),
        }
    }

    pub fn arguments(slot: u32, json: impl Into<String>) -> Self {
        RawEvent::BlockDelta {
            slot,
            fragment: Fragment::Arguments(json.into()),
        }
    }

    pub fn close(slot: u32) -> Self {
        RawEvent::BlockClose { slot }
    }

    pub fn complete(usage: Option<Value>) -> Self {
        RawEvent::TurnComplete { usage }
    }
}

/// What a streaming turn yields to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryUnit {
    TextDelta(String),
    /// Emitted once per tool call, with fully assembled arguments.
    CompletedToolCall(ToolCall),
    UsageReport(Usage),
}
