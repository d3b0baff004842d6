//! 用量归一化模块：把各后端的原始用量数据转换为统一的 [`Usage`]。
//!
//! # Usage Normalization
//!
//! Backends report usage in whatever shape their API defines. A [`UsageExtractor`] turns that
//! raw value into a [`Usage`], or reports that it found nothing it recognizes. Absence is a
//! normal outcome, never an error: a turn without usage still succeeds.
//!
//! | Extractor | Recognizes |
//! |-----------|------------|
//! | [`TokenCountExtractor`] | `input_tokens`/`output_tokens`, `inputTokens`/`outputTokens`, `prompt_tokens`/`completion_tokens` |
//! | [`NoUsage`] | nothing |
//!
//! ```rust
//! use ai_chat_rust::tokens::{TokenCountExtractor, UsageExtractor};
//!
//! let raw = serde_json::json!({"input_tokens": 10, "output_tokens": 4});
//! let usage = TokenCountExtractor::new().extract(&raw, "model-a", "messages").unwrap();
//! assert_eq!(usage.total_tokens, 14);
//! ```

mod pricing;

pub use pricing::{pricing_for, ModelPricing};

use crate::types::Usage;
use serde_json::Value;

/// Converts a backend's raw usage value into a [`Usage`].
pub trait UsageExtractor: Send + Sync {
    fn extract(&self, raw: &Value, model: &str, backend: &str) -> Option<Usage>;
}

/// Field-name based extractor covering the common token-count layouts.
#[derive(Debug, Clone, Default)]
pub struct TokenCountExtractor {
    pricing: Vec<ModelPricing>,
}

const FIELD_LAYOUTS: &[(&str, &str, &str)] = &[
    ("input_tokens", "output_tokens", "total_tokens"),
    ("inputTokens", "outputTokens", "totalTokens"),
    ("prompt_tokens", "completion_tokens", "total_tokens"),
];

impl TokenCountExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills cost fields for models matching an entry of `pricing`.
    pub fn with_pricing(mut self, pricing: Vec<ModelPricing>) -> Self {
        self.pricing = pricing;
        self
    }
}

impl UsageExtractor for TokenCountExtractor {
    fn extract(&self, raw: &Value, model: &str, backend: &str) -> Option<Usage> {
        // Some backends nest the counts one level down.
        let obj = raw
            .get("usage")
            .filter(|u| u.is_object())
            .unwrap_or(raw)
            .as_object()?;

        for (input_key, output_key, total_key) in FIELD_LAYOUTS {
            let input = obj.get(*input_key).and_then(Value::as_u64);
            let output = obj.get(*output_key).and_then(Value::as_u64);
            if input.is_none() && output.is_none() {
                continue;
            }
            let total = obj.get(*total_key).and_then(Value::as_u64);
            let usage = Usage::from_tokens(
                input.unwrap_or(0),
                output.unwrap_or(0),
                total,
                model,
                backend,
            );
            return Some(match pricing_for(&self.pricing, model) {
                Some(p) => p.apply(usage),
                None => usage,
            });
        }
        None
    }
}

/// Extractor for backends that never report usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUsage;

impl UsageExtractor for NoUsage {
    fn extract(&self, _raw: &Value, _model: &str, _backend: &str) -> Option<Usage> {
        None
    }
}
