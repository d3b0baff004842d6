//! Normalized token usage for one backend call.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Usage of a single call. Built once by a [`crate::tokens::UsageExtractor`] and never merged
/// with other turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub input_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub backend: String,
    pub timestamp: SystemTime,
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

impl Usage {
    /// Token counts for `model` on `backend`; a missing total is computed from the parts.
    pub fn from_tokens(
        input_tokens: u64,
        output_tokens: u64,
        total_tokens: Option<u64>,
        model: &str,
        backend: &str,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: total_tokens.unwrap_or(input_tokens.saturating_add(output_tokens)),
            input_cost: None,
            output_cost: None,
            total_cost: None,
            model: model.to_string(),
            backend: backend.to_string(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.backend.is_empty()
    }
}
