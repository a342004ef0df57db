//! Agent executor - owns the live runners of one hub

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hub_core::agent::{generate_agent_id, validate_agent_id, AgentConfig, AgentSession};
use hub_core::run::RunState;

use crate::cost::BudgetStatus;
use crate::error::{Result, RunnerError};
use crate::event::RunEvent;
use crate::persistence::AgentStore;
use crate::runner::{AgentCommand, AgentRunner, AgentStatus, RunnerContext};

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;

/// Request to start a new agent
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    /// Agent id; generated when absent
    pub agent_id: Option<String>,
    pub config: AgentConfig,
    /// First user message
    pub prompt: String,
}

struct AgentHandle {
    commands: mpsc::Sender<AgentCommand>,
    status: Arc<RwLock<AgentStatus>>,
    task: JoinHandle<RunState>,
}

impl AgentHandle {
    async fn state(&self) -> RunState {
        self.status.read().await.state
    }

    /// Finished, or already reporting a terminal state. A contended status
    /// lock counts as still running.
    fn is_done(&self) -> bool {
        self.task.is_finished()
            || self
                .status
                .try_read()
                .map(|status| status.state.is_terminal())
                .unwrap_or(false)
    }
}

/// Executor that manages agent runners
pub struct AgentExecutor {
    ctx: RunnerContext,
    /// Runners by agent id. Finished runners stay until the next launch prunes
    /// them; their final state is in the store.
    agents: Arc<RwLock<HashMap<String, AgentHandle>>>,
}

impl AgentExecutor {
    pub fn new(ctx: RunnerContext) -> Self {
        Self {
            ctx,
            agents: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &RunnerContext {
        &self.ctx
    }

    pub fn store(&self) -> &AgentStore {
        &self.ctx.store
    }

    /// Start a new agent
    ///
    /// Returns the agent id and a receiver for its events
    pub async fn spawn(&self, request: SpawnRequest) -> Result<(String, mpsc::Receiver<RunEvent>)> {
        let agent_id = match request.agent_id {
            Some(id) => validate_agent_id(&id)?.to_string(),
            None => generate_agent_id(),
        };

        self.ensure_not_live(&agent_id).await?;
        if self.ctx.store.load(&agent_id).await?.is_some() {
            return Err(RunnerError::AgentExists { agent_id });
        }

        let session = AgentSession::new(&agent_id, request.config, request.prompt);
        self.launch(session).await
    }

    /// Resume a stored agent from its last completed turn
    pub async fn restore(&self, agent_id: &str) -> Result<(String, mpsc::Receiver<RunEvent>)> {
        validate_agent_id(agent_id)?;
        self.ensure_not_live(agent_id).await?;

        let record = self
            .ctx
            .store
            .load(agent_id)
            .await?
            .ok_or_else(|| RunnerError::AgentNotFound {
                agent_id: agent_id.to_string(),
            })?;

        if record.state.state.is_terminal() {
            return Err(RunnerError::InvalidCommand {
                agent_id: agent_id.to_string(),
                from: record.state.state,
                to: RunState::Running,
            });
        }

        info!(
            agent_id,
            turns = record.session.turn_count,
            "Restoring agent from {}",
            record.state.state
        );
        self.launch(record.session).await
    }

    async fn ensure_not_live(&self, agent_id: &str) -> Result<()> {
        let agents = self.agents.read().await;
        if let Some(handle) = agents.get(agent_id) {
            if !handle.state().await.is_terminal() && !handle.task.is_finished() {
                return Err(RunnerError::AgentExists {
                    agent_id: agent_id.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn launch(&self, session: AgentSession) -> Result<(String, mpsc::Receiver<RunEvent>)> {
        let agent_id = session.id.clone();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let runner = AgentRunner::new(self.ctx.clone(), session, command_rx, event_tx);
        let status = runner.status_handle();

        let mut agents = self.agents.write().await;
        // re-check under the write lock
        if let Some(handle) = agents.get(&agent_id) {
            if !handle.state().await.is_terminal() && !handle.task.is_finished() {
                return Err(RunnerError::AgentExists { agent_id });
            }
        }

        let before = agents.len();
        agents.retain(|_, handle| !handle.is_done());
        if agents.len() < before {
            debug!(pruned = before - agents.len(), "Pruned finished runners");
        }

        let task_agent_id = agent_id.clone();
        let task = tokio::spawn(async move {
            let state = runner.run().await;
            info!(agent_id = %task_agent_id, %state, "Agent runner finished");
            state
        });

        agents.insert(
            agent_id.clone(),
            AgentHandle {
                commands: command_tx,
                status,
                task,
            },
        );

        Ok((agent_id, event_rx))
    }

    /// Pause at the next turn boundary
    pub async fn pause(&self, agent_id: &str) -> Result<()> {
        let applies = |state: RunState| matches!(state, RunState::Pending | RunState::Running);
        self.command(agent_id, AgentCommand::Pause, applies, RunState::Paused)
            .await
    }

    pub async fn resume(&self, agent_id: &str) -> Result<()> {
        let applies = |state: RunState| state == RunState::Paused;
        self.command(agent_id, AgentCommand::Resume, applies, RunState::Running)
            .await
    }

    pub async fn stop(&self, agent_id: &str) -> Result<()> {
        let applies = |state: RunState| !state.is_terminal();
        self.command(agent_id, AgentCommand::Stop, applies, RunState::Stopped)
            .await
    }

    async fn command(
        &self,
        agent_id: &str,
        command: AgentCommand,
        applies: impl Fn(RunState) -> bool,
        target: RunState,
    ) -> Result<()> {
        let agents = self.agents.read().await;
        let handle = agents.get(agent_id).ok_or_else(|| RunnerError::AgentNotFound {
            agent_id: agent_id.to_string(),
        })?;

        let state = handle.state().await;
        if !applies(state) {
            return Err(RunnerError::InvalidCommand {
                agent_id: agent_id.to_string(),
                from: state,
                to: target,
            });
        }

        handle
            .commands
            .send(command)
            .await
            .map_err(|_| RunnerError::ChannelClosed)
    }

    /// Live status of a runner, finished ones included
    pub async fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        let agents = self.agents.read().await;
        match agents.get(agent_id) {
            Some(handle) => Some(handle.status.read().await.clone()),
            None => None,
        }
    }

    pub async fn budget(&self, agent_id: &str) -> Option<BudgetStatus> {
        self.status(agent_id).await.map(|status| status.budget)
    }

    /// Status of every known runner, sorted by agent id
    pub async fn list(&self) -> Vec<AgentStatus> {
        let agents = self.agents.read().await;
        let mut result = Vec::with_capacity(agents.len());
        for handle in agents.values() {
            result.push(handle.status.read().await.clone());
        }
        result.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        result
    }

    /// Number of runners not yet in a terminal state
    pub async fn live_count(&self) -> usize {
        let agents = self.agents.read().await;
        let mut count = 0;
        for handle in agents.values() {
            if !handle.task.is_finished() && !handle.state().await.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Stop the agent if it is live, wait for it, then delete its snapshot
    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        validate_agent_id(agent_id)?;

        let handle = self.agents.write().await.remove(agent_id);
        if let Some(handle) = handle {
            if !handle.task.is_finished() {
                let _ = handle.commands.send(AgentCommand::Stop).await;
            }
            if let Err(e) = handle.task.await {
                warn!(agent_id, "Agent task ended abnormally: {}", e);
            }
        }

        self.ctx.store.delete(agent_id).await
    }
}
