//! Exponential backoff around a [`ChatSession`].
//!
//! Retries are a caller decision: a session never repeats a backend call by itself. Wrapping
//! it in a [`RetryingSession`] repeats failed turns while [`Error::is_retryable`] holds and
//! attempts remain. Rollback makes a repeated sync turn indistinguishable from a first try.
//!
//! Streaming turns are retried only until the first delivery unit: once output has reached
//! the caller a repeat would duplicate it.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{ChatResponse, ChatSession, ChatStream};
use crate::config::duration_ms;
use crate::types::Contents;
use crate::{Error, ErrorContext, Result};

/// Decision for how to proceed after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,
    pub multiplier: f64,
    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,
    /// Scales every delay by a random factor in (0, 1].
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: String| Error::Configuration {
            message: msg,
            context: ErrorContext::new().with_details(format!("retry.{}", field)),
        };
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "max_attempts must be at least 1".into()));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(invalid(
                "multiplier",
                format!("multiplier must be a finite number >= 1, got {}", self.multiplier),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(invalid(
                "max_backoff_ms",
                "max_backoff must not be shorter than initial_backoff".into(),
            ));
        }
        Ok(())
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let max_nanos = self.max_backoff.as_nanos() as f64;
        let base = self.initial_backoff.as_nanos() as f64 * self.multiplier.powi(exponent);
        if !base.is_finite() {
            return self.max_backoff;
        }
        let capped = base.min(max_nanos);
        let nanos = if self.jitter {
            // random() is in [0, 1), so the factor is in (0, 1].
            capped * (1.0 - rand::rng().random::<f64>())
        } else {
            capped
        };
        Duration::from_nanos(nanos.round() as u64)
    }

    /// What to do after `attempt` (1-based) failed with `err`.
    pub fn decide(&self, attempt: u32, err: &Error) -> Decision {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return Decision::Fail;
        }
        let delay = match err.retry_after() {
            Some(hint) => hint.min(self.max_backoff),
            None => self.backoff_for(attempt),
        };
        Decision::Retry { delay }
    }

    pub fn wrap(self, session: ChatSession) -> RetryingSession {
        RetryingSession {
            policy: self,
            session,
        }
    }
}

/// A [`ChatSession`] whose turns are retried under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryingSession {
    policy: RetryPolicy,
    session: ChatSession,
}

impl RetryingSession {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    /// Direct access for calls that are not retried, such as `set_functions`.
    pub fn session_mut(&mut self) -> &mut ChatSession {
        &mut self.session
    }

    pub fn into_inner(self) -> ChatSession {
        self.session
    }

    pub async fn send(&mut self, content: impl Into<Contents>) -> Result<ChatResponse> {
        self.send_with_cancel(content, &CancellationToken::new()).await
    }

    pub async fn send_with_cancel(
        &mut self,
        content: impl Into<Contents>,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let contents = content.into();
        let mut attempt = 1;
        loop {
            let err = match self.session.send_with_cancel(contents.clone(), cancel).await {
                Ok(response) => {
                    if attempt > 1 {
                        info!(session = %self.session.id(), attempt, "send succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => e,
            };
            self.backoff("send", attempt, err, cancel).await?;
            attempt += 1;
        }
    }

    pub async fn send_streaming(&mut self, content: impl Into<Contents>) -> Result<ChatStream<'_>> {
        self.send_streaming_with_cancel(content, &CancellationToken::new())
            .await
    }

    /// Retries stream setup, and a stream whose very first item is an error. The stream
    /// returned has already produced at least one unit or ended cleanly.
    pub async fn send_streaming_with_cancel(
        &mut self,
        content: impl Into<Contents>,
        cancel: &CancellationToken,
    ) -> Result<ChatStream<'_>> {
        let contents = content.into();
        let mut attempt = 1;
        loop {
            let err = match self.session.begin_stream(contents.clone(), cancel).await {
                Ok(mut turn) => {
                    turn.prime().await;
                    match turn.take_first_error() {
                        None => return Ok(ChatStream::new(&mut self.session, turn)),
                        Some(e) => e,
                    }
                }
                Err(e) => e,
            };
            self.backoff("send_streaming", attempt, err, cancel).await?;
            attempt += 1;
        }
    }

    /// Sleeps before the next attempt, or returns the error when the policy gives up.
    async fn backoff(
        &self,
        operation: &str,
        attempt: u32,
        err: Error,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let delay = match self.policy.decide(attempt, &err) {
            Decision::Fail => {
                if err.is_retryable() {
                    warn!(
                        session = %self.session.id(),
                        operation,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                }
                return Err(err);
            }
            Decision::Retry { delay } => delay,
        };
        warn!(
            session = %self.session.id(),
            operation,
            attempt,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "retrying after transient error"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled {
                context: ErrorContext::new()
                    .with_backend(self.session.backend_name())
                    .with_model(self.session.model())
                    .with_operation(operation)
                    .with_details("cancelled during retry backoff"),
            }),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}
