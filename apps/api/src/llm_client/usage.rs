use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Serialize;

use super::Usage;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Per-model token prices. Unknown models are priced at the default model's rate.
#[derive(Debug, Clone)]
pub struct PricingTable {
    rates: BTreeMap<String, ModelRate>,
    default_model: String,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut rates = BTreeMap::new();
        rates.insert(
            "gpt-4o-mini".to_string(),
            ModelRate {
                input_per_1k: 0.000_15,
                output_per_1k: 0.000_6,
            },
        );
        rates.insert(
            "gpt-4o".to_string(),
            ModelRate {
                input_per_1k: 0.002_5,
                output_per_1k: 0.01,
            },
        );
        Self {
            rates,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }
}

impl PricingTable {
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Resolves dated model names (`gpt-4o-mini-2024-07-18`) to the longest known prefix.
    pub fn rate_for(&self, model: &str) -> ModelRate {
        self.rates
            .iter()
            .filter(|(name, _)| model.starts_with(name.as_str()))
            .max_by_key(|(name, _)| name.len())
            .map(|(_, rate)| *rate)
            .or_else(|| self.rates.get(&self.default_model).copied())
            .unwrap_or(ModelRate {
                input_per_1k: 0.0,
                output_per_1k: 0.0,
            })
    }

    pub fn cost(&self, model: &str, usage: Usage) -> f64 {
        let rate = self.rate_for(model);
        f64::from(usage.prompt_tokens) / 1000.0 * rate.input_per_1k
            + f64::from(usage.completion_tokens) / 1000.0 * rate.output_per_1k
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub total_calls: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub estimated_cost: f64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

/// Process-wide token accounting.
pub trait UsageSink: Send + Sync {
    /// Records one call's usage and returns its estimated cost.
    fn record_usage(&self, model: &str, usage: Usage) -> f64;
    fn totals(&self) -> UsageTotals;
}

#[derive(Debug, Default)]
pub struct TokenTracker {
    pricing: PricingTable,
    totals: Mutex<UsageTotals>,
}

impl TokenTracker {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            pricing,
            totals: Mutex::new(UsageTotals::default()),
        }
    }
}

impl UsageSink for TokenTracker {
    fn record_usage(&self, model: &str, usage: Usage) -> f64 {
        let cost = self.pricing.cost(model, usage);
        let mut totals = self.totals.lock().unwrap_or_else(|e| e.into_inner());
        totals.total_calls += 1;
        totals.total_input_tokens += u64::from(usage.prompt_tokens);
        totals.total_output_tokens += u64::from(usage.completion_tokens);
        totals.estimated_cost += cost;

        let entry = totals.by_model.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.input_tokens += u64::from(usage.prompt_tokens);
        entry.output_tokens += u64::from(usage.completion_tokens);
        entry.estimated_cost += cost;
        cost
    }

    fn totals(&self) -> UsageTotals {
        self.totals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_cost_is_linear_in_tokens() {
        let pricing = PricingTable::default();
        let cost = pricing.cost("gpt-4o-mini", usage(2000, 1000));
        assert!((cost - (2.0 * 0.000_15 + 0.000_6)).abs() < 1e-12);
    }

    #[test]
    fn test_dated_model_matches_longest_prefix() {
        let pricing = PricingTable::default();
        assert_eq!(
            pricing.rate_for("gpt-4o-mini-2024-07-18"),
            pricing.rate_for("gpt-4o-mini")
        );
        assert_eq!(pricing.rate_for("gpt-4o-2024-08-06").output_per_1k, 0.01);
    }

    #[test]
    fn test_unknown_model_uses_default_rate() {
        let pricing = PricingTable::default();
        assert_eq!(pricing.rate_for("mystery-model"), pricing.rate_for("gpt-4o-mini"));
        let pricing = pricing.with_default_model("gpt-4o");
        assert_eq!(pricing.rate_for("mystery-model").input_per_1k, 0.002_5);
    }

    #[test]
    fn test_tracker_accumulates_per_model() {
        let tracker = TokenTracker::default();
        tracker.record_usage("gpt-4o-mini", usage(100, 50));
        tracker.record_usage("gpt-4o-mini", usage(200, 25));
        tracker.record_usage("gpt-4o", usage(10, 10));
        let totals = tracker.totals();
        assert_eq!(totals.total_calls, 3);
        assert_eq!(totals.total_input_tokens, 310);
        assert_eq!(totals.total_output_tokens, 85);
        assert_eq!(totals.by_model["gpt-4o-mini"].calls, 2);
        assert!(totals.estimated_cost > 0.0);
    }
}
