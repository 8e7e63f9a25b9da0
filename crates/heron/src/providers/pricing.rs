use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-token prices for one model, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
}

/// Price table keyed by model id. Ships with defaults for the commonly
/// used models and can be replaced or amended at runtime, so price changes
/// never require a code change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn empty() -> Self {
        Self {
            models: HashMap::new(),
        }
    }

    pub fn set<S: Into<String>>(&mut self, model: S, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        self.models.get(model).copied()
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.set(
            "gpt-4o",
            ModelPricing {
                input_cost_per_token: 2.5 / 1_000_000.0,
                output_cost_per_token: 10.0 / 1_000_000.0,
            },
        );
        table.set(
            "gpt-4o-mini",
            ModelPricing {
                input_cost_per_token: 0.15 / 1_000_000.0,
                output_cost_per_token: 0.6 / 1_000_000.0,
            },
        );
        table.set(
            "claude-3-7-sonnet-latest",
            ModelPricing {
                input_cost_per_token: 3.0 / 1_000_000.0,
                output_cost_per_token: 15.0 / 1_000_000.0,
            },
        );
        table.set(
            "claude-3-5-haiku-latest",
            ModelPricing {
                input_cost_per_token: 0.8 / 1_000_000.0,
                output_cost_per_token: 4.0 / 1_000_000.0,
            },
        );
        table
    }
}
