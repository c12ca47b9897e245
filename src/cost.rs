//! Cost Accountant: a pure reducer over final results. Enabled
//! iff the engine was constructed with a pricing table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::DimensionResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    pub models: HashMap<String, ModelPricing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionCost {
    pub cost: f64,
    pub tokens: u64,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCost {
    pub cost: f64,
    pub tokens: u64,
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Costs {
    pub total_cost: f64,
    pub total_tokens: u64,
    pub currency: &'static str,
    pub by_dimension: HashMap<String, DimensionCost>,
    pub by_provider: HashMap<String, ProviderCost>,
}

/// Walks every `(dimension, Result)` pair and aggregates cost/tokens. Errors and skip
/// markers contribute nothing; unknown models warn and contribute zero cost; missing
/// token metadata contributes zero.
pub fn compute<'a>(
    pricing: &PricingTable,
    results: impl IntoIterator<Item = (&'a str, &'a DimensionResult)>,
) -> Costs {
    let mut total_cost = 0.0;
    let mut total_tokens = 0u64;
    let mut by_dimension = HashMap::new();
    let mut by_provider: HashMap<String, ProviderCost> = HashMap::new();

    for (dimension, result) in results {
        if result.is_error() || result.is_skipped() {
            continue;
        }
        let metadata = result.metadata();
        let Some(tokens) = metadata.tokens else {
            continue;
        };
        let Some(model) = metadata.model.as_ref() else {
            continue;
        };
        let Some(model_pricing) = pricing.models.get(model) else {
            tracing::warn!(model, dimension, "unknown model in pricing table; cost contribution is zero");
            continue;
        };

        let cost = (tokens.input_tokens as f64 * model_pricing.input_per_million
            + tokens.output_tokens as f64 * model_pricing.output_per_million)
            / 1_000_000.0;

        total_cost += cost;
        total_tokens += tokens.total_tokens;

        // Section dimensions recur once per section under the same name; accumulate
        // rather than overwrite so a multi-section run's byDimension bucket reflects
        // every instance.
        let entry = by_dimension.entry(dimension.to_string()).or_insert_with(|| DimensionCost {
            cost: 0.0,
            tokens: 0,
            model: model.clone(),
            provider: metadata.provider.clone(),
        });
        entry.cost += cost;
        entry.tokens += tokens.total_tokens;

        if let Some(provider) = metadata.provider.as_ref() {
            let entry = by_provider.entry(provider.clone()).or_insert_with(|| ProviderCost {
                cost: 0.0,
                tokens: 0,
                models: Vec::new(),
            });
            entry.cost += cost;
            entry.tokens += tokens.total_tokens;
            if !entry.models.contains(model) {
                entry.models.push(model.clone());
            }
        }
    }

    Costs {
        total_cost,
        total_tokens,
        currency: "USD",
        by_dimension,
        by_provider,
    }
}
