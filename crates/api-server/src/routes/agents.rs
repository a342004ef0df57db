//! Agent API endpoints
//!
//! Start, inspect, control and delete agents. Live runners are owned by the
//! executor; stored agents come from the durable store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use agent_runner::{
    AgentStatus, BudgetStatus, RunnerError, SpawnRequest, StateSnapshot, StoredAgentSummary,
};
use hub_core::agent::{validate_agent_id, AgentConfig, AgentSession};
use hub_core::run::RunState;

use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    pub config: AgentConfig,
    pub prompt: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStartedResponse {
    pub agent_id: String,
    pub state: RunState,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentListResponse {
    /// Agents in the store, newest first
    pub agents: Vec<StoredAgentSummary>,
    /// Runners known to this process
    pub live: Vec<AgentStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDetailResponse {
    pub session: AgentSession,
    pub state: StateSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<AgentStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub agent_id: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type RouteError = (StatusCode, Json<ErrorResponse>);

fn error_status(err: &RunnerError) -> StatusCode {
    match err {
        RunnerError::Core(core) => match core {
            hub_core::Error::InvalidAgentId(_)
            | hub_core::Error::InvalidInput(_)
            | hub_core::Error::MissingToolField(_) => StatusCode::BAD_REQUEST,
            hub_core::Error::InvalidTransition { .. } => StatusCode::CONFLICT,
            hub_core::Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        RunnerError::AgentNotFound { .. } => StatusCode::NOT_FOUND,
        RunnerError::AgentExists { .. } | RunnerError::InvalidCommand { .. } => {
            StatusCode::CONFLICT
        }
        RunnerError::StoreIo { .. }
        | RunnerError::Serialization(_)
        | RunnerError::Provider { .. }
        | RunnerError::PolicyConfig { .. }
        | RunnerError::ChannelClosed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn route_error(err: RunnerError) -> RouteError {
    let status = error_status(&err);
    if status.is_server_error() {
        tracing::error!("Agent request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn not_found(agent_id: &str) -> RouteError {
    route_error(RunnerError::AgentNotFound {
        agent_id: agent_id.to_string(),
    })
}

fn checked_id(agent_id: &str) -> Result<(), RouteError> {
    validate_agent_id(agent_id)
        .map(|_| ())
        .map_err(|e| route_error(e.into()))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/agents - Start a new agent
async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<AgentStartedResponse>), RouteError> {
    tracing::info!(
        "Create agent request: agent_id={:?}, model={}",
        req.agent_id,
        req.config.model
    );

    let (agent_id, events) = state
        .executor()
        .spawn(SpawnRequest {
            agent_id: req.agent_id,
            config: req.config,
            prompt: req.prompt,
        })
        .await
        .map_err(route_error)?;
    state.watch_events(agent_id.clone(), events);

    Ok((
        StatusCode::CREATED,
        Json(AgentStartedResponse {
            agent_id,
            state: RunState::Pending,
        }),
    ))
}

/// GET /api/agents - Stored agents plus live runners
async fn list_agents(State(state): State<AppState>) -> Result<Json<AgentListResponse>, RouteError> {
    let agents = state
        .executor()
        .store()
        .list()
        .await
        .map_err(route_error)?;
    let live = state.executor().list().await;
    Ok(Json(AgentListResponse { agents, live }))
}

/// GET /api/agents/{id} - Stored record of one agent
async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentDetailResponse>, RouteError> {
    checked_id(&agent_id)?;

    let live = state.executor().status(&agent_id).await;
    let record = state
        .executor()
        .store()
        .load(&agent_id)
        .await
        .map_err(route_error)?
        .ok_or_else(|| not_found(&agent_id))?;

    Ok(Json(AgentDetailResponse {
        session: record.session,
        state: record.state,
        live,
    }))
}

/// DELETE /api/agents/{id} - Stop if live, then delete the stored record
async fn delete_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<StatusCode, RouteError> {
    checked_id(&agent_id)?;

    let live = state.executor().status(&agent_id).await.is_some();
    let stored = state
        .executor()
        .store()
        .load(&agent_id)
        .await
        .map_err(route_error)?
        .is_some();
    if !live && !stored {
        return Err(not_found(&agent_id));
    }

    state
        .executor()
        .delete(&agent_id)
        .await
        .map_err(route_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/agents/{id}/pause
async fn pause_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<CommandResponse>, RouteError> {
    checked_id(&agent_id)?;
    state
        .executor()
        .pause(&agent_id)
        .await
        .map_err(route_error)?;
    Ok(Json(CommandResponse {
        agent_id,
        accepted: true,
    }))
}

/// POST /api/agents/{id}/resume
async fn resume_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<CommandResponse>, RouteError> {
    checked_id(&agent_id)?;
    state
        .executor()
        .resume(&agent_id)
        .await
        .map_err(route_error)?;
    Ok(Json(CommandResponse {
        agent_id,
        accepted: true,
    }))
}

/// POST /api/agents/{id}/stop
async fn stop_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<CommandResponse>, RouteError> {
    checked_id(&agent_id)?;
    state
        .executor()
        .stop(&agent_id)
        .await
        .map_err(route_error)?;
    Ok(Json(CommandResponse {
        agent_id,
        accepted: true,
    }))
}

/// POST /api/agents/{id}/restore - Resume a stored agent from its last turn
async fn restore_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<AgentStartedResponse>, RouteError> {
    checked_id(&agent_id)?;

    let (agent_id, events) = state
        .executor()
        .restore(&agent_id)
        .await
        .map_err(route_error)?;
    state.watch_events(agent_id.clone(), events);

    Ok(Json(AgentStartedResponse {
        agent_id,
        state: RunState::Running,
    }))
}

/// GET /api/agents/{id}/budget - Budget status of a live agent
async fn agent_budget(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<BudgetStatus>, RouteError> {
    checked_id(&agent_id)?;
    state
        .executor()
        .budget(&agent_id)
        .await
        .map(Json)
        .ok_or_else(|| not_found(&agent_id))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/agents", post(create_agent).get(list_agents))
        .route("/api/agents/{id}", get(get_agent).delete(delete_agent))
        .route("/api/agents/{id}/pause", post(pause_agent))
        .route("/api/agents/{id}/resume", post(resume_agent))
        .route("/api/agents/{id}/stop", post(stop_agent))
        .route("/api/agents/{id}/restore", post(restore_agent))
        .route("/api/agents/{id}/budget", get(agent_budget))
}
