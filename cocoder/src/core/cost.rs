//! Estimated request cost, keyed by model name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::types::SessionStats;

/// Price in USD per input and output token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelCost {
    pub input: f64,
    pub output: f64,
}

/// Mapping from model name to per-token prices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct CostTable(BTreeMap<String, ModelCost>);

impl Default for CostTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(
            "gpt-4o".to_string(),
            ModelCost {
                input: 5.0 / 1_000_000.0,
                output: 15.0 / 1_000_000.0,
            },
        );
        table.insert(
            "gpt-4-turbo".to_string(),
            ModelCost {
                input: 10.0 / 1_000_000.0,
                output: 30.0 / 1_000_000.0,
            },
        );
        table.insert(
            "gpt-3.5-turbo-0125".to_string(),
            ModelCost {
                input: 0.5 / 1_000_000.0,
                output: 1.5 / 1_000_000.0,
            },
        );
        Self(table)
    }
}

impl CostTable {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, model: impl Into<String>, cost: ModelCost) {
        self.0.insert(model.into(), cost);
    }

    pub fn get(&self, model: &str) -> Option<ModelCost> {
        self.0.get(model).copied()
    }

    /// Estimated USD cost of a session, rounded to 6 decimal places.
    ///
    /// Returns `None` for models missing from the table.
    pub fn estimate(&self, model: &str, stats: &SessionStats) -> Option<f64> {
        let cost = self.get(model)?;
        let value = cost.input * stats.session_input_tokens as f64
            + cost.output * stats.session_output_tokens as f64;
        Some((value * 1_000_000.0).round() / 1_000_000.0)
    }
}
