//! Model pricing
//!
//! Prices are USD per million tokens. Lookup is exact match, then family
//! prefix, then a mid-tier default.

use super::model::TokenUsage;

/// Computes the cost of a usage bucket for a model
pub trait PricingModel: Send + Sync {
    fn cost(&self, model: &str, usage: &TokenUsage) -> f64;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTier {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_write_multiplier: f64,
    pub cache_read_multiplier: f64,
}

impl PricingTier {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
            cache_write_multiplier: 1.25,
            cache_read_multiplier: 0.1,
        }
    }

    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        let per_token_in = self.input_per_million / 1_000_000.0;
        let per_token_out = self.output_per_million / 1_000_000.0;

        usage.input_tokens as f64 * per_token_in
            + usage.cache_creation_tokens as f64 * per_token_in * self.cache_write_multiplier
            + usage.cache_read_tokens as f64 * per_token_in * self.cache_read_multiplier
            + usage.output_tokens as f64 * per_token_out
    }
}

const DEFAULT_TIER: PricingTier = PricingTier::new(3.0, 15.0);

/// Built-in price table
#[derive(Debug, Clone, Default)]
pub struct ModelPricing {
    overrides: Vec<(String, PricingTier)>,
}

impl ModelPricing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an exact-match price, taking precedence over the table
    pub fn with_price(mut self, model: impl Into<String>, tier: PricingTier) -> Self {
        self.overrides.push((model.into(), tier));
        self
    }

    pub fn tier(&self, model: &str) -> PricingTier {
        if let Some((_, tier)) = self.overrides.iter().find(|(m, _)| m == model) {
            return *tier;
        }

        let m = model.to_ascii_lowercase();
        if m.contains("opus-4-5") || m.contains("opus-4-6") {
            PricingTier::new(5.0, 25.0)
        } else if m.contains("opus") {
            PricingTier::new(15.0, 75.0)
        } else if m.contains("haiku-4") {
            PricingTier::new(1.0, 5.0)
        } else if m.contains("haiku") {
            PricingTier::new(0.8, 4.0)
        } else if m.contains("sonnet") {
            PricingTier::new(3.0, 15.0)
        } else {
            DEFAULT_TIER
        }
    }
}

impl PricingModel for ModelPricing {
    fn cost(&self, model: &str, usage: &TokenUsage) -> f64 {
        self.tier(model).cost(usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sonnet_cost() {
        let pricing = ModelPricing::new();
        let usage = TokenUsage::new(1_000_000, 1_000_000);
        let cost = pricing.cost("claude-sonnet-4-5", &usage);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_multipliers() {
        let tier = PricingTier::new(10.0, 0.0);
        let usage = TokenUsage {
            cache_creation_tokens: 1_000_000,
            cache_read_tokens: 1_000_000,
            ..TokenUsage::default()
        };
        assert!((tier.cost(&usage) - 13.5).abs() < 1e-9);
    }

    #[test]
    fn test_override_wins() {
        let pricing = ModelPricing::new().with_price("test-model", PricingTier::new(1.0, 1.0));
        let cost = pricing.cost("test-model", &TokenUsage::new(500_000, 500_000));
        assert!((cost - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_model_uses_default() {
        let pricing = ModelPricing::new();
        assert_eq!(pricing.tier("mystery"), DEFAULT_TIER);
    }
}
