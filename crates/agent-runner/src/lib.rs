//! Agent Runner - hub-side agent runtime
//!
//! This crate turns a provider's event stream into normalized agent events,
//! gates every tool call through static tiers and declarative hooks,
//! dispatches it locally or to a remote execution surface, tracks token
//! usage against a budget, and checkpoints each agent atomically to disk.

mod client;
mod cost;
mod error;
mod event;
mod executor;
pub mod parser;
mod persistence;
mod policy;
mod runner;
mod tools;

#[cfg(test)]
mod testing;

pub use client::{AnthropicClient, ByteStream, ProviderClient, ProviderRequest};
pub use cost::{BudgetStatus, CostTracker};
pub use error::{Result, RunnerError};
pub use event::{AgentEvent, CompletionReason, RunEvent};
pub use executor::{AgentExecutor, SpawnRequest};
pub use parser::{EventNormalizer, EventStreamDecoder, SseRecord};
pub use persistence::{AgentStore, StateSnapshot, StoredAgentRecord, StoredAgentSummary};
pub use policy::{
    Decision, HookAction, HookConfig, HookPhase, HookRule, HookRuleConfig, PolicyDecision,
    PolicyEvaluator,
};
pub use runner::{AgentCommand, AgentRunner, AgentStatus, RunnerConfig, RunnerContext};
pub use tools::{
    surface_tool_specs, CurrentTimeTool, EchoTool, LocalTool, LocalToolOutput, RemoteToolDispatch,
    RouteOutcome, ToolRegistry,
};
