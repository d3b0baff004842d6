//! Optional per-model pricing used to fill the cost fields of [`Usage`].

use crate::types::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Substring matched case-insensitively against the model name.
    pub model: String,
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".into()
}

impl ModelPricing {
    pub fn new(model: &str, input: f64, output: f64) -> Self {
        Self {
            model: model.into(),
            input_cost_per_1k: input,
            output_cost_per_1k: output,
            currency: default_currency(),
        }
    }

    pub fn matches(&self, model: &str) -> bool {
        model.to_lowercase().contains(&self.model.to_lowercase())
    }

    /// Returns `usage` with its cost fields computed from the token counts.
    pub fn apply(&self, mut usage: Usage) -> Usage {
        let ic = (usage.input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let oc = (usage.output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        usage.input_cost = Some(ic);
        usage.output_cost = Some(oc);
        usage.total_cost = Some(ic + oc);
        usage
    }
}

/// Picks the first entry whose pattern matches `model`.
pub fn pricing_for<'a>(table: &'a [ModelPricing], model: &str) -> Option<&'a ModelPricing> {
    table.iter().find(|p| p.matches(model))
}
