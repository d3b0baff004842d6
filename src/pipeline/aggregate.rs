//! Stream aggregator: raw backend events -> delivery units.
//!
//! Text is forwarded as it arrives. Tool-call argument fragments are buffered per slot and
//! released as one [`DeliveryUnit::CompletedToolCall`] when the slot closes, so interleaved
//! tool calls never mix their arguments. Slots still open when the stream ends are discarded.
//!
//! The raw stream is owned by the aggregator's state and dropped exactly once: on end of
//! stream, on error, on cancellation, or when the caller drops the unit stream.

use crate::tokens::UsageExtractor;
use crate::types::{BlockKind, DeliveryUnit, Fragment, RawEvent, ToolCall};
use crate::{BoxStream, Error, Result};
use futures::{stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A tool call whose arguments are still arriving.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartialToolCall {
    pub slot: u32,
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl PartialToolCall {
    fn complete(self) -> ToolCall {
        let arguments = parse_arguments(&self.arguments).unwrap_or_else(|| {
            warn!(
                slot = self.slot,
                tool = %self.name,
                raw_len = self.arguments.len(),
                "tool call arguments are not a JSON object; using empty arguments"
            );
            Map::new()
        });
        ToolCall {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

/// Parses accumulated argument text. Empty text is an empty map; anything that is not a JSON
/// object is `None`.
pub fn parse_arguments(text: &str) -> Option<Map<String, Value>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Turns a [`RawEvent`] stream into a [`DeliveryUnit`] stream for one turn.
#[derive(Clone)]
pub struct StreamAggregator {
    extractor: Arc<dyn UsageExtractor>,
    model: String,
    backend: String,
    cancel: CancellationToken,
}

impl std::fmt::Debug for StreamAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAggregator")
            .field("model", &self.model)
            .field("backend", &self.backend)
            .finish()
    }
}

impl StreamAggregator {
    pub fn new(
        extractor: Arc<dyn UsageExtractor>,
        model: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            extractor,
            model: model.into(),
            backend: backend.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stops the unit stream (with [`Error::Cancelled`]) once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn aggregate(self, raw: BoxStream<'static, RawEvent>) -> BoxStream<'static, DeliveryUnit> {
        let state = AggregatorState {
            raw: Some(raw),
            partials: HashMap::new(),
            text_slots: HashSet::new(),
            config: self,
        };

        let units = stream::unfold(state, |mut st| async move {
            loop {
                let next = {
                    let raw = st.raw.as_mut()?;
                    tokio::select! {
                        biased;
                        _ = st.config.cancel.cancelled() => None,
                        item = raw.next() => Some(item),
                    }
                };

                let item = match next {
                    None => {
                        st.release("cancelled");
                        return Some((Err(Error::cancelled()), st));
                    }
                    Some(item) => item,
                };

                match item {
                    None => {
                        st.release("end of stream");
                        return None;
                    }
                    Some(Err(e)) => {
                        st.release("raw stream error");
                        return Some((Err(e), st));
                    }
                    Some(Ok(event)) => match st.handle(event) {
                        Ok(Step::Continue) => continue,
                        Ok(Step::Emit(unit)) => return Some((Ok(unit), st)),
                        Ok(Step::Finish(Some(unit))) => {
                            st.release("turn complete");
                            return Some((Ok(unit), st));
                        }
                        Ok(Step::Finish(None)) => {
                            st.release("turn complete");
                            return None;
                        }
                        Err(e) => {
                            st.release("protocol error");
                            return Some((Err(e), st));
                        }
                    },
                }
            }
        });

        Box::pin(units)
    }
}

enum Step {
    Continue,
    Emit(DeliveryUnit),
    /// Terminal event, optionally carrying one last unit.
    Finish(Option<DeliveryUnit>),
}

struct AggregatorState {
    /// `None` once the transport has been released.
    raw: Option<BoxStream<'static, RawEvent>>,
    partials: HashMap<u32, PartialToolCall>,
    text_slots: HashSet<u32>,
    config: StreamAggregator,
}

impl AggregatorState {
    fn handle(&mut self, event: RawEvent) -> Result<Step> {
        match event {
            RawEvent::BlockOpen {
                slot,
                kind,
                id,
                name,
            } => {
                if self.text_slots.contains(&slot) || self.partials.contains_key(&slot) {
                    return Err(Error::protocol_decode(format!(
                        "slot {} opened while still open",
                        slot
                    )));
                }
                match kind {
                    BlockKind::Text => {
                        self.text_slots.insert(slot);
                    }
                    BlockKind::ToolCall => {
                        self.partials.insert(
                            slot,
                            PartialToolCall {
                                slot,
                                id: id.unwrap_or_default(),
                                name: name.unwrap_or_default(),
                                arguments: String::new(),
                            },
                        );
                    }
                }
                Ok(Step::Continue)
            }
            RawEvent::BlockDelta { slot, fragment } => match fragment {
                Fragment::Text(text) => {
                    if !self.text_slots.contains(&slot) {
                        return Err(Error::protocol_decode(format!(
                            "text fragment for slot {} which is not an open text block",
                            slot
                        )));
                    }
                    if text.is_empty() {
                        Ok(Step::Continue)
                    } else {
                        Ok(Step::Emit(DeliveryUnit::TextDelta(text)))
                    }
                }
                Fragment::Arguments(json) => match self.partials.get_mut(&slot) {
                    Some(partial) => {
                        partial.arguments.push_str(&json);
                        Ok(Step::Continue)
                    }
                    None => Err(Error::protocol_decode(format!(
                        "argument fragment for slot {} which is not an open tool call",
                        slot
                    ))),
                },
            },
            RawEvent::BlockClose { slot } => {
                if let Some(partial) = self.partials.remove(&slot) {
                    return Ok(Step::Emit(DeliveryUnit::CompletedToolCall(partial.complete())));
                }
                if !self.text_slots.remove(&slot) {
                    debug!(slot, "close for unknown slot ignored");
                }
                Ok(Step::Continue)
            }
            RawEvent::TurnComplete { usage } => {
                let report = usage.and_then(|raw| {
                    self.config
                        .extractor
                        .extract(&raw, &self.config.model, &self.config.backend)
                });
                Ok(Step::Finish(report.map(DeliveryUnit::UsageReport)))
            }
        }
    }

    /// Drops the raw stream and discards any unfinished tool calls.
    fn release(&mut self, reason: &str) {
        if self.raw.take().is_none() {
            return;
        }
        for (slot, partial) in self.partials.drain() {
            debug!(slot, tool = %partial.name, "discarding unfinished tool call");
        }
        self.text_slots.clear();
        debug!(
            backend = %self.config.backend,
            reason,
            "stream released"
        );
    }
}
