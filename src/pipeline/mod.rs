//! 流水线模块：把后端字节流解码为帧，再把原始事件聚合成交付单元。
//!
//! # Streaming Pipeline
//!
//! ```text
//! HTTP bytes ──► Decoder ──► driver event mapping ──► StreamAggregator ──► DeliveryUnit
//!                  │                 │                        │
//!              SSE / lines       RawEvent              TextDelta, CompletedToolCall,
//!                                                      UsageReport
//! ```
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`decode`] | Byte framing: [`decode::SseDecoder`], [`decode::LineDecoder`] |
//! | [`aggregate`] | [`aggregate::StreamAggregator`]: per-slot reassembly of tool calls |

pub mod aggregate;
pub mod decode;

pub use aggregate::{parse_arguments, StreamAggregator};
pub use decode::{LineDecoder, SseDecoder};
