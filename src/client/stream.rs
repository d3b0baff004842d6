//! Streaming turn state and the caller-facing [`ChatStream`].

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::client::session::{ChatResponse, ChatSession};
use crate::types::{DeliveryUnit, Message, ToolCall, Usage};
use crate::{BoxStream, Error, Result};

/// An opened streaming turn that has not been attached to its session yet.
pub(crate) struct StreamTurn {
    user: Message,
    units: BoxStream<'static, DeliveryUnit>,
    pending: Option<Result<DeliveryUnit>>,
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Option<Usage>,
    failed: bool,
    exhausted: bool,
    done: bool,
}

impl StreamTurn {
    pub(crate) fn new(user: Message, units: BoxStream<'static, DeliveryUnit>) -> Self {
        Self {
            user,
            units,
            pending: None,
            text: String::new(),
            tool_calls: Vec::new(),
            usage: None,
            failed: false,
            exhausted: false,
            done: false,
        }
    }

    /// Pulls the first unit ahead of time so a failure before any output can still be
    /// retried. The unit is replayed to the caller afterwards.
    pub(crate) async fn prime(&mut self) {
        if self.pending.is_some() || self.exhausted || self.done {
            return;
        }
        match self.units.next().await {
            Some(item) => self.pending = Some(item),
            None => self.exhausted = true,
        }
    }

    pub(crate) fn take_first_error(&mut self) -> Option<Error> {
        match self.pending.take() {
            Some(Err(e)) => Some(e),
            other => {
                self.pending = other;
                None
            }
        }
    }
}

/// Delivery units of one streaming turn.
///
/// Text deltas are yielded as they arrive; tool calls only once complete. The turn is added to
/// history when the stream is drained without error. Dropping it early, or a mid-stream
/// error, leaves history as it was before the send.
pub struct ChatStream<'s> {
    session: &'s mut ChatSession,
    turn: StreamTurn,
    committed: Option<Message>,
}

impl<'s> ChatStream<'s> {
    pub(crate) fn new(session: &'s mut ChatSession, turn: StreamTurn) -> Self {
        Self {
            session,
            turn,
            committed: None,
        }
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.turn.text
    }

    pub fn is_finished(&self) -> bool {
        self.turn.done
    }

    /// Drains the stream and returns the committed assistant message.
    pub async fn collect_response(mut self) -> Result<ChatResponse> {
        while let Some(item) = self.next().await {
            item?;
        }
        let message = self.committed.take().unwrap_or_else(|| {
            Message::with_blocks(crate::types::MessageRole::Assistant, Vec::new())
        });
        Ok(ChatResponse {
            message,
            usage: self.turn.usage.take(),
        })
    }

    fn observe(&mut self, item: &Result<DeliveryUnit>) {
        match item {
            Ok(DeliveryUnit::TextDelta(t)) => self.turn.text.push_str(t),
            Ok(DeliveryUnit::CompletedToolCall(call)) => self.turn.tool_calls.push(call.clone()),
            Ok(DeliveryUnit::UsageReport(u)) => {
                self.session.report_usage(u);
                self.turn.usage = Some(u.clone());
            }
            Err(e) => {
                debug!(session = %self.session.id(), error = %e, "streaming turn failed");
                self.turn.failed = true;
            }
        }
    }

    fn finish(&mut self) {
        self.turn.done = true;
        if self.turn.failed {
            return;
        }
        let user = self.turn.user.clone();
        let text = std::mem::take(&mut self.turn.text);
        let calls = std::mem::take(&mut self.turn.tool_calls);
        self.committed = Some(self.session.commit_stream(user, text.clone(), calls));
        self.turn.text = text;
    }
}

impl Stream for ChatStream<'_> {
    type Item = Result<DeliveryUnit>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.turn.done {
            return Poll::Ready(None);
        }
        if let Some(item) = this.turn.pending.take() {
            this.observe(&item);
            return Poll::Ready(Some(item));
        }
        if this.turn.exhausted {
            this.finish();
            return Poll::Ready(None);
        }
        match this.turn.units.poll_next_unpin(cx) {
            Poll::Ready(Some(item)) => {
                this.observe(&item);
                Poll::Ready(Some(item))
            }
            Poll::Ready(None) => {
                this.turn.exhausted = true;
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream<'_> {
    fn drop(&mut self) {
        if !self.turn.done {
            debug!(session = %self.session.id(), "streaming turn abandoned; history unchanged");
        }
    }
}
