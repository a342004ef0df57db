//! Agent runner - the per-agent turn loop
//!
//! One runner owns one [`AgentSession`]. It streams a provider response,
//! decodes and normalizes it, gates and dispatches every tool call, tracks
//! usage against the budget and checkpoints to the store at each turn
//! boundary and on each state transition.
//!
//! Control commands arrive on an mpsc channel and events leave on another.
//! Pause takes effect at the next turn boundary. Stop also interrupts an
//! in-flight provider stream, discarding the partial turn, or an in-flight
//! tool batch, answering the abandoned calls with error results.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use hub_core::agent::{AgentSession, ContentBlock, Message, MessageRole};
use hub_core::run::RunState;
use hub_core::tool::{ToolCall, ToolLocation, ToolOrigin, ToolResult, ToolTier};
use hub_core::usage::{ModelPricing, PricingModel, TokenUsage};

use crate::client::{ByteStream, ProviderClient, ProviderRequest};
use crate::cost::{BudgetStatus, CostTracker};
use crate::error::{Result, RunnerError};
use crate::event::{AgentEvent, CompletionReason, RunEvent};
use crate::parser::EventStreamDecoder;
use crate::persistence::{AgentStore, StateSnapshot};
use crate::policy::PolicyEvaluator;
use crate::tools::ToolRegistry;

const BUDGET_SKIP_MESSAGE: &str = "skipped: budget exceeded";
const STOP_SKIP_MESSAGE: &str = "skipped: agent stopped";
const STOP_INTERRUPT_MESSAGE: &str = "interrupted: agent stopped";

/// Control commands accepted by a running agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCommand {
    Pause,
    Resume,
    Stop,
}

/// Runner limits
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Turn ceiling per agent
    pub max_turns: u32,
    /// Deadline for routed tool calls
    pub route_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            route_timeout: Duration::from_secs(30),
        }
    }
}

/// Collaborators shared by every runner in a hub
#[derive(Clone)]
pub struct RunnerContext {
    pub provider: Arc<dyn ProviderClient>,
    pub tools: Arc<ToolRegistry>,
    pub policy: Arc<PolicyEvaluator>,
    pub store: AgentStore,
    pub pricing: Arc<dyn PricingModel>,
    pub config: RunnerConfig,
}

impl RunnerContext {
    pub fn new(provider: Arc<dyn ProviderClient>, tools: ToolRegistry, store: AgentStore) -> Self {
        Self {
            provider,
            tools: Arc::new(tools),
            policy: Arc::new(PolicyEvaluator::empty()),
            store,
            pricing: Arc::new(ModelPricing::new()),
            config: RunnerConfig::default(),
        }
    }

    pub fn with_policy(mut self, policy: PolicyEvaluator) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingModel>) -> Self {
        self.pricing = pricing;
        self
    }
}

/// Live view of a runner, readable while it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    pub agent_id: String,
    pub model: String,
    pub state: RunState,
    pub turn_count: u32,
    pub budget: BudgetStatus,
}

/// What one turn produced from the provider
#[derive(Debug, Default)]
struct TurnOutput {
    content: Vec<ContentBlock>,
    tool_calls: Vec<(String, String, serde_json::Value)>,
    usage: TokenUsage,
    ended: bool,
}

enum StreamStep {
    Chunk(Result<Bytes>),
    End,
    Stop,
}

enum TurnOutcome {
    Continue,
    Complete(CompletionReason),
}

/// Pause and stop requests not yet acted on
#[derive(Debug, Default)]
struct Controls {
    pause_requested: bool,
    stop_requested: bool,
}

impl Controls {
    fn note(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::Pause => self.pause_requested = true,
            AgentCommand::Resume => self.pause_requested = false,
            AgentCommand::Stop => {
                self.pause_requested = false;
                self.stop_requested = true;
            }
        }
    }
}

pub struct AgentRunner {
    ctx: RunnerContext,
    session: AgentSession,
    state: RunState,
    tracker: CostTracker,
    commands: mpsc::Receiver<AgentCommand>,
    commands_open: bool,
    controls: Controls,
    events: mpsc::Sender<RunEvent>,
    status: Arc<RwLock<AgentStatus>>,
    turn: u32,
}

impl AgentRunner {
    /// Create a runner for a new or restored session. Restored usage seeds
    /// the tracker so budgets carry across restarts.
    pub fn new(
        ctx: RunnerContext,
        session: AgentSession,
        commands: mpsc::Receiver<AgentCommand>,
        events: mpsc::Sender<RunEvent>,
    ) -> Self {
        let mut tracker = CostTracker::with_pricing(session.config.budget, ctx.pricing.clone());
        if !session.usage.is_empty() {
            tracker.record_usage(&session.id, &session.config.model, session.usage);
        }

        let status = Arc::new(RwLock::new(AgentStatus {
            agent_id: session.id.clone(),
            model: session.config.model.clone(),
            state: RunState::Pending,
            turn_count: session.turn_count,
            budget: tracker.budget_status(),
        }));

        Self {
            ctx,
            turn: session.turn_count,
            session,
            state: RunState::Pending,
            tracker,
            commands,
            commands_open: true,
            controls: Controls::default(),
            events,
            status,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.session.id
    }

    /// Shared status handle, updated on every transition and turn
    pub fn status_handle(&self) -> Arc<RwLock<AgentStatus>> {
        Arc::clone(&self.status)
    }

    /// Drive the agent to a terminal state
    pub async fn run(mut self) -> RunState {
        info!(agent_id = %self.session.id, "Starting agent runner");

        let result = match self.transition(RunState::Running).await {
            Ok(()) => self.drive().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reason) => {
                info!(agent_id = %self.session.id, ?reason, turns = self.session.turn_count, "Agent loop complete");
                self.emit(AgentEvent::LoopComplete {
                    turns: self.session.turn_count,
                    reason,
                })
                .await;
                if !self.state.is_terminal() {
                    if let Err(e) = self.transition(RunState::Stopped).await {
                        error!(agent_id = %self.session.id, "Failed to checkpoint stop: {}", e);
                        self.emit(AgentEvent::fatal(e.to_string())).await;
                    }
                }
            }
            Err(e) => {
                error!(agent_id = %self.session.id, "Agent failed: {}", e);
                self.emit(AgentEvent::fatal(e.to_string())).await;
                self.fail().await;
            }
        }

        self.state
    }

    async fn drive(&mut self) -> Result<CompletionReason> {
        loop {
            self.poll_commands();
            if let Some(reason) = self.settle_commands().await? {
                return Ok(reason);
            }

            if self.tracker.is_over_budget() {
                return Ok(self.budget_exceeded().await);
            }
            if self.session.turn_count >= self.ctx.config.max_turns {
                return Ok(CompletionReason::MaxTurns);
            }
            if self.session.awaits_user() {
                return Ok(CompletionReason::EndTurn);
            }

            match self.run_turn().await? {
                TurnOutcome::Continue => {}
                TurnOutcome::Complete(reason) => return Ok(reason),
            }
        }
    }

    /// Drain queued commands without waiting
    fn poll_commands(&mut self) {
        while self.commands_open {
            match self.commands.try_recv() {
                Ok(command) => self.note_command(command),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => self.commands_open = false,
            }
        }
    }

    fn note_command(&mut self, command: AgentCommand) {
        debug!(agent_id = %self.session.id, ?command, "Received command");
        self.controls.note(command);
    }

    /// Apply a pending pause or stop at a turn boundary
    async fn settle_commands(&mut self) -> Result<Option<CompletionReason>> {
        if self.controls.stop_requested {
            return Ok(Some(CompletionReason::Stopped));
        }
        if !self.controls.pause_requested {
            return Ok(None);
        }

        self.controls.pause_requested = false;
        self.transition(RunState::Paused).await?;

        loop {
            let command = if self.commands_open {
                self.commands.recv().await
            } else {
                None
            };
            match command {
                Some(AgentCommand::Resume) => {
                    self.transition(RunState::Running).await?;
                    return Ok(None);
                }
                Some(AgentCommand::Pause) => {}
                Some(AgentCommand::Stop) => return Ok(Some(CompletionReason::Stopped)),
                None => {
                    // nobody is left to resume a paused agent
                    self.commands_open = false;
                    return Ok(Some(CompletionReason::Stopped));
                }
            }
        }
    }

    async fn run_turn(&mut self) -> Result<TurnOutcome> {
        self.turn = self.session.turn_count + 1;
        debug!(agent_id = %self.session.id, turn = self.turn, "Starting turn");

        let config = &self.session.config;
        let request = ProviderRequest {
            model: config.model.clone(),
            system: config.system_prompt.clone(),
            messages: self.session.messages.clone(),
            tools: self.ctx.tools.offered(|name| config.allows_tool(name)),
            max_tokens: config.max_output_tokens,
        };

        let mut stream = self.ctx.provider.stream(request).await?;
        let Some(output) = self.consume_stream(&mut stream).await? else {
            info!(agent_id = %self.session.id, turn = self.turn, "Stopped mid-stream; discarding partial turn");
            return Ok(TurnOutcome::Complete(CompletionReason::Stopped));
        };

        if !output.ended {
            return Err(RunnerError::provider("Provider stream ended before the turn finished"));
        }

        if !output.content.is_empty() {
            self.session.push(Message::assistant(output.content));
        }

        if output.tool_calls.is_empty() {
            self.finish_turn(output.usage).await?;
            return Ok(TurnOutcome::Complete(CompletionReason::EndTurn));
        }

        let mut results = Vec::with_capacity(output.tool_calls.len());
        let mut budget_hit = false;
        for (id, name, input) in output.tool_calls {
            self.refresh_usage(output.usage);
            budget_hit = budget_hit || self.tracker.is_over_budget();
            self.poll_commands();

            let (result, origin) = if self.controls.stop_requested {
                (ToolResult::error(&id, STOP_SKIP_MESSAGE), None)
            } else if budget_hit {
                (ToolResult::error(&id, BUDGET_SKIP_MESSAGE), None)
            } else {
                match self.dispatch_watched(&id, &name, input).await {
                    Some(dispatched) => dispatched,
                    None => (ToolResult::error(&id, STOP_INTERRUPT_MESSAGE), None),
                }
            };

            self.emit(AgentEvent::ToolResult {
                tool_use_id: result.tool_use_id.clone(),
                tool_name: name,
                content: result.content.clone(),
                is_error: result.is_error,
                origin,
            })
            .await;
            results.push(ContentBlock::from(result));
        }

        self.session.push(Message {
            role: MessageRole::User,
            content: results,
        });
        self.finish_turn(output.usage).await?;

        if self.controls.stop_requested {
            info!(agent_id = %self.session.id, turn = self.turn, "Stopped during tool batch");
            return Ok(TurnOutcome::Complete(CompletionReason::Stopped));
        }
        if budget_hit || self.tracker.is_over_budget() {
            return Ok(TurnOutcome::Complete(self.budget_exceeded().await));
        }
        Ok(TurnOutcome::Continue)
    }

    /// Read the provider stream to its end. `None` means a stop arrived.
    async fn consume_stream(&mut self, stream: &mut ByteStream) -> Result<Option<TurnOutput>> {
        let mut decoder = EventStreamDecoder::new();
        let mut normalizer = self.ctx.provider.normalizer();
        let mut output = TurnOutput::default();

        loop {
            let chunk = match self.next_step(stream).await {
                StreamStep::Chunk(chunk) => chunk?,
                StreamStep::End => break,
                StreamStep::Stop => return Ok(None),
            };

            for record in decoder.feed_bytes(&chunk) {
                for event in normalizer.normalize(&record) {
                    self.absorb(event, &mut output).await?;
                }
            }
        }

        if decoder.has_pending() {
            debug!(agent_id = %self.session.id, "Provider stream ended with a partial record");
        }
        Ok(Some(output))
    }

    async fn next_step(&mut self, stream: &mut ByteStream) -> StreamStep {
        loop {
            tokio::select! {
                chunk = stream.next() => {
                    return match chunk {
                        Some(chunk) => StreamStep::Chunk(chunk),
                        None => StreamStep::End,
                    };
                }
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        self.note_command(command);
                        if command == AgentCommand::Stop {
                            return StreamStep::Stop;
                        }
                    }
                    None => self.commands_open = false,
                }
            }
        }
    }

    /// Fold one normalized event into the turn and forward it
    async fn absorb(&mut self, event: AgentEvent, output: &mut TurnOutput) -> Result<()> {
        match event {
            AgentEvent::Usage { usage, .. } => {
                output.usage = usage;
                self.refresh_usage(usage);
                let status = self.tracker.budget_status();
                self.emit(AgentEvent::Usage {
                    usage: status.usage,
                    cost: status.cost,
                })
                .await;
                return Ok(());
            }
            AgentEvent::TextDone { ref text } => {
                if !text.is_empty() {
                    output.content.push(ContentBlock::Text { text: text.clone() });
                }
            }
            AgentEvent::ToolUseDone {
                ref id,
                ref name,
                ref input,
            } => {
                output.content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                output
                    .tool_calls
                    .push((id.clone(), name.clone(), input.clone()));
            }
            AgentEvent::TurnEnd { .. } => output.ended = true,
            AgentEvent::Error {
                ref message,
                recoverable: false,
            } => {
                return Err(RunnerError::provider(message.clone()));
            }
            _ => {}
        }
        self.emit(event).await;
        Ok(())
    }

    /// Report session-wide cumulative usage to the tracker
    fn refresh_usage(&mut self, turn_usage: TokenUsage) {
        let total = self.session.usage + turn_usage;
        self.tracker
            .record_usage(&self.session.id, &self.session.config.model, total);
    }

    /// Dispatch one call while listening for commands. `None` means a stop
    /// arrived and the call was abandoned.
    async fn dispatch_watched(
        &mut self,
        id: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Option<(ToolResult, Option<ToolOrigin>)> {
        let dispatch = dispatch_tool(&self.ctx, &self.session, id, name, input);
        tokio::pin!(dispatch);

        loop {
            tokio::select! {
                dispatched = &mut dispatch => return Some(dispatched),
                command = self.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        debug!(agent_id = %self.session.id, ?command, "Received command");
                        self.controls.note(command);
                        if command == AgentCommand::Stop {
                            info!(agent_id = %self.session.id, tool = name, "Abandoning tool call on stop");
                            return None;
                        }
                    }
                    None => self.commands_open = false,
                }
            }
        }
    }

    /// Commit the turn and checkpoint
    async fn finish_turn(&mut self, turn_usage: TokenUsage) -> Result<()> {
        self.session.usage.accumulate(&turn_usage);
        self.session.turn_count += 1;
        self.session.updated_at = chrono::Utc::now();
        self.refresh_usage(TokenUsage::default());
        self.publish_status().await;
        self.checkpoint().await
    }

    async fn budget_exceeded(&mut self) -> CompletionReason {
        let status = self.tracker.budget_status();
        warn!(
            agent_id = %self.session.id,
            tokens = status.total_tokens,
            cost = status.cost,
            "Budget exceeded"
        );
        self.emit(AgentEvent::BudgetExceeded { status }).await;
        CompletionReason::BudgetExceeded
    }

    async fn transition(&mut self, to: RunState) -> Result<()> {
        let from = self.state;
        self.state = from.transition(to)?;
        info!(agent_id = %self.session.id, %from, %to, "State change");
        let saved = self.checkpoint().await;
        self.publish_status().await;
        self.emit(AgentEvent::StateChange { from, to }).await;
        saved
    }

    /// Move to `Error`. A checkpoint failure here is only logged.
    async fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if let Err(e) = self.transition(RunState::Error).await {
            error!(agent_id = %self.session.id, "Failed to checkpoint error state: {}", e);
        }
    }

    async fn checkpoint(&self) -> Result<()> {
        let snapshot = StateSnapshot::new(
            self.state,
            self.tracker.total_usage().total_tokens(),
            self.tracker.total_cost(),
        );
        self.ctx
            .store
            .save(&self.session.id, &self.session, &snapshot)
            .await
    }

    async fn publish_status(&self) {
        let mut status = self.status.write().await;
        status.state = self.state;
        status.turn_count = self.session.turn_count;
        status.budget = self.tracker.budget_status();
    }

    async fn emit(&self, event: AgentEvent) {
        let event = RunEvent::new(&self.session.id, self.turn, event);
        if self.events.send(event).await.is_err() {
            debug!(agent_id = %self.session.id, "Event receiver dropped");
        }
    }
}

/// Gate and execute one tool call. Never fails; refusals are results.
async fn dispatch_tool(
    ctx: &RunnerContext,
    session: &AgentSession,
    id: &str,
    name: &str,
    input: serde_json::Value,
) -> (ToolResult, Option<ToolOrigin>) {
    if !session.config.allows_tool(name) {
        warn!(agent_id = %session.id, tool = name, "Tool not in allow-list");
        return (
            ToolResult::error(id, format!("tool {} is not allowed for this agent", name)),
            None,
        );
    }

    if ctx.tools.tier(name) == ToolTier::Blocked {
        warn!(agent_id = %session.id, tool = name, "Blocked tool requested");
        return (ToolResult::error(id, format!("tool {} is blocked", name)), None);
    }

    let decision = ctx.policy.evaluate_pre_tool_use(name, &input);
    if decision.is_deny() {
        let reason = decision
            .reason
            .unwrap_or_else(|| "denied by policy".to_string());
        info!(agent_id = %session.id, tool = name, %reason, "Tool denied by policy");
        return (ToolResult::error(id, reason), None);
    }

    let Some(location) = ctx.tools.location(name) else {
        return (ToolResult::error(id, format!("tool {} is not registered", name)), None);
    };

    let call = match ToolCall::new(id, name, input, ToolOrigin::from(location)) {
        Ok(call) => call,
        Err(e) => return (ToolResult::error(id, e.to_string()), None),
    };

    debug!(agent_id = %session.id, tool = name, origin = ?call.origin, "Dispatching tool");
    let result = match location {
        ToolLocation::Hub => {
            ctx.tools
                .execute_local(&call.id, &call.name, call.input.clone())
                .await
        }
        ToolLocation::Surface => ctx
            .tools
            .execute_remote(
                &session.id,
                &call.name,
                call.input.clone(),
                ctx.config.route_timeout,
            )
            .await
            .into_tool_result(&call.id),
    };

    ctx.policy
        .run_post_tool_use(&call.name, &call.input, result.is_error);
    (result, Some(call.origin))
}
