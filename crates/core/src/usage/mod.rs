//! Token usage and model pricing

mod model;
mod pricing;

pub use model::TokenUsage;
pub use pricing::{ModelPricing, PricingModel, PricingTier};
