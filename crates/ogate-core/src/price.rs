use std::collections::HashMap;

use ogate_common::TokenUsage;

/// Per-model pricing in dollars per million tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cached_per_million: f64,
}

impl ModelPrice {
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let uncached_prompt = (usage.prompt_tokens - usage.cached_tokens).max(0);
        let prompt = uncached_prompt as f64 * self.input_per_million;
        let cached = usage.cached_tokens as f64 * self.cached_per_million;
        let completion = usage.completion_tokens as f64 * self.output_per_million;
        (prompt + cached + completion) / 1_000_000.0
    }
}

pub trait PriceRegistry: Send + Sync {
    fn get_price(&self, model: &str) -> Option<ModelPrice>;
}

/// Fixed price table, typically loaded from config.
#[derive(Debug, Default)]
pub struct StaticPrices {
    prices: HashMap<String, ModelPrice>,
}

impl StaticPrices {
    pub fn new(prices: HashMap<String, ModelPrice>) -> Self {
        Self { prices }
    }
}

impl PriceRegistry for StaticPrices {
    fn get_price(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).copied()
    }
}
