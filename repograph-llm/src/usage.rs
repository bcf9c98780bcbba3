// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Token usage and cost accounting per model.
//!
//! Accounting is a side effect of successful calls; nothing reads it to
//! make decisions.

use crate::client::TokenUsage;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-token prices in USD
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    #[serde(default)]
    pub cached_input_cost_per_token: Option<f64>,
}

impl ModelPricing {
    fn per_million(input: f64, output: f64, cached: f64) -> Self {
        Self {
            input_cost_per_token: input / 1_000_000.0,
            output_cost_per_token: output / 1_000_000.0,
            cached_input_cost_per_token: Some(cached / 1_000_000.0),
        }
    }

    /// Cached input tokens are billed at the cached rate when one exists
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let cached = usage.cached_tokens.min(usage.input_tokens) as f64;
        let uncached = usage.input_tokens as f64 - cached;
        let cached_rate = self
            .cached_input_cost_per_token
            .unwrap_or(self.input_cost_per_token);
        uncached * self.input_cost_per_token
            + cached * cached_rate
            + usage.output_tokens as f64 * self.output_cost_per_token
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub cost_usd: f64,
}

pub struct UsageTracker {
    pricing: HashMap<String, ModelPricing>,
    usage: DashMap<String, ModelUsage>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::with_pricing(builtin_pricing())
    }

    pub fn with_pricing(pricing: HashMap<String, ModelPricing>) -> Self {
        Self {
            pricing,
            usage: DashMap::new(),
        }
    }

    /// Exact match, then the name without its provider prefix
    pub fn pricing_for(&self, model: &str) -> Option<&ModelPricing> {
        self.pricing.get(model).or_else(|| {
            model
                .rsplit('/')
                .next()
                .and_then(|stripped| self.pricing.get(stripped))
        })
    }

    pub fn record(&self, model: &str, usage: &TokenUsage) {
        let cost = self
            .pricing_for(model)
            .map(|p| p.calculate_cost(usage))
            .unwrap_or(0.0);
        let mut entry = self.usage.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens += usage.input_tokens as u64;
        entry.output_tokens += usage.output_tokens as u64;
        entry.cached_tokens += usage.cached_tokens as u64;
        entry.cost_usd += cost;

        if usage.cached_tokens > 0 {
            tracing::debug!(
                model,
                cached_tokens = usage.cached_tokens,
                input_tokens = usage.input_tokens,
                "Prompt cache hit"
            );
        }
    }

    pub fn usage(&self, model: &str) -> Option<ModelUsage> {
        self.usage.get(model).map(|u| u.clone())
    }

    /// Usage per model, sorted by model id
    pub fn snapshot(&self) -> Vec<(String, ModelUsage)> {
        let mut all: Vec<(String, ModelUsage)> = self
            .usage
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn total_cost(&self) -> f64 {
        self.usage.iter().map(|e| e.value().cost_usd).sum()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn builtin_pricing() -> HashMap<String, ModelPricing> {
    [
        ("gpt-4.1", ModelPricing::per_million(2.00, 8.00, 0.50)),
        ("gpt-4.1-mini", ModelPricing::per_million(0.40, 1.60, 0.10)),
        ("gpt-4.1-nano", ModelPricing::per_million(0.10, 0.40, 0.025)),
        ("gpt-4o", ModelPricing::per_million(2.50, 10.00, 1.25)),
        ("gpt-4o-mini", ModelPricing::per_million(0.15, 0.60, 0.075)),
        ("text-embedding-3-small", ModelPricing::per_million(0.02, 0.0, 0.02)),
        ("text-embedding-3-large", ModelPricing::per_million(0.13, 0.0, 0.13)),
    ]
    .into_iter()
    .map(|(name, pricing)| (name.to_string(), pricing))
    .collect()
}
