//! 弹性模块：对会话调用进行指数退避重试。
//!
//! # Resilience
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`retry::RetryPolicy`] | attempts, backoff growth and cap, jitter |
//! | [`retry::RetryingSession`] | a session whose turns are retried under a policy |
//!
//! ```rust
//! use ai_chat_rust::resilience::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default()
//!     .with_max_attempts(4)
//!     .with_backoff(Duration::from_millis(200), Duration::from_secs(5));
//! assert!(policy.validate().is_ok());
//! ```

pub mod retry;

pub use retry::{Decision, RetryPolicy, RetryingSession};
