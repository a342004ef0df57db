//! Cost and budget tracking
//!
//! Per-agent buckets hold the cumulative usage an event source reports, so
//! they are replaced on each report. A separate global bucket accumulates
//! deltas for flows that only ever see increments (restores, imports).
//! Costs are computed per bucket with that bucket's model, then summed.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hub_core::agent::BudgetConfig;
use hub_core::usage::{ModelPricing, PricingModel, TokenUsage};

/// Snapshot of tracked usage against the configured ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub usage: TokenUsage,
    pub total_tokens: u64,
    pub cost: f64,
    pub budget: BudgetConfig,
    /// Tokens left before the token ceiling, when one is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_tokens: Option<u64>,
    /// Cost left before the cost ceiling, when one is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_cost: Option<f64>,
    pub over_budget: bool,
}

#[derive(Debug, Clone, Default)]
struct Bucket {
    model: String,
    usage: TokenUsage,
}

/// Usage bookkeeping for one tracking window
pub struct CostTracker {
    pricing: Arc<dyn PricingModel>,
    agents: HashMap<String, Bucket>,
    global: Option<Bucket>,
    budget: BudgetConfig,
    call_count: u64,
    over_budget: bool,
}

impl std::fmt::Debug for CostTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CostTracker")
            .field("agents", &self.agents.len())
            .field("budget", &self.budget)
            .field("call_count", &self.call_count)
            .field("over_budget", &self.over_budget)
            .finish()
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new(BudgetConfig::default())
    }
}

impl CostTracker {
    /// Tracker using the built-in price table
    pub fn new(budget: BudgetConfig) -> Self {
        Self::with_pricing(budget, Arc::new(ModelPricing::new()))
    }

    pub fn with_pricing(budget: BudgetConfig, pricing: Arc<dyn PricingModel>) -> Self {
        Self {
            pricing,
            agents: HashMap::new(),
            global: None,
            budget,
            call_count: 0,
            over_budget: false,
        }
    }

    pub fn budget(&self) -> BudgetConfig {
        self.budget
    }

    pub fn set_budget(&mut self, budget: BudgetConfig) {
        self.budget = budget;
    }

    /// Number of usage reports received since the last full reset
    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Replace an agent's bucket with a cumulative report
    pub fn record_usage(&mut self, agent_id: &str, model: &str, usage: TokenUsage) {
        self.agents.insert(
            agent_id.to_string(),
            Bucket {
                model: model.to_string(),
                usage,
            },
        );
        self.call_count += 1;
        self.refresh_over_budget();
    }

    /// Accumulate a delta into the global bucket
    pub fn add_usage(&mut self, model: &str, usage: TokenUsage) {
        let bucket = self.global.get_or_insert_with(|| Bucket {
            model: model.to_string(),
            usage: TokenUsage::default(),
        });
        bucket.model = model.to_string();
        bucket.usage.accumulate(&usage);
        self.call_count += 1;
        self.refresh_over_budget();
    }

    fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.agents.values().chain(self.global.iter())
    }

    pub fn total_usage(&self) -> TokenUsage {
        self.buckets()
            .fold(TokenUsage::default(), |total, bucket| total + bucket.usage)
    }

    pub fn total_cost(&self) -> f64 {
        self.buckets()
            .map(|bucket| self.pricing.cost(&bucket.model, &bucket.usage))
            .sum()
    }

    /// Usage recorded for one agent
    pub fn agent_usage(&self, agent_id: &str) -> Option<TokenUsage> {
        self.agents.get(agent_id).map(|bucket| bucket.usage)
    }

    /// True once either configured ceiling has been met. Stays true until
    /// [`reset`](Self::reset), even if buckets shrink.
    pub fn is_over_budget(&self) -> bool {
        self.over_budget || self.ceiling_reached()
    }

    fn ceiling_reached(&self) -> bool {
        let token_hit = self
            .budget
            .max_tokens
            .is_some_and(|max| self.total_usage().total_tokens() >= max);
        let cost_hit = self
            .budget
            .max_cost
            .is_some_and(|max| self.total_cost() >= max);
        token_hit || cost_hit
    }

    fn refresh_over_budget(&mut self) {
        if !self.over_budget && self.ceiling_reached() {
            self.over_budget = true;
        }
    }

    pub fn budget_status(&self) -> BudgetStatus {
        let usage = self.total_usage();
        let total_tokens = usage.total_tokens();
        let cost = self.total_cost();

        BudgetStatus {
            usage,
            total_tokens,
            cost,
            budget: self.budget,
            remaining_tokens: self
                .budget
                .max_tokens
                .map(|max| max.saturating_sub(total_tokens)),
            remaining_cost: self.budget.max_cost.map(|max| (max - cost).max(0.0)),
            over_budget: self.is_over_budget(),
        }
    }

    /// Drop one agent's bucket, leaving the others and the latch alone
    pub fn reset_agent(&mut self, agent_id: &str) {
        self.agents.remove(agent_id);
    }

    /// Clear usage, budget and call count
    pub fn reset(&mut self) {
        self.agents.clear();
        self.global = None;
        self.budget = BudgetConfig::default();
        self.call_count = 0;
        self.over_budget = false;
    }
}
