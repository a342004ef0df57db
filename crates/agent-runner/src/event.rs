//! Event types for agent execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hub_core::run::RunState;
use hub_core::tool::ToolOrigin;
use hub_core::usage::TokenUsage;

use crate::cost::BudgetStatus;

/// Why a run loop finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// Model ended its turn without requesting tools
    EndTurn,
    /// Turn ceiling reached
    MaxTurns,
    /// Budget ceiling reached
    BudgetExceeded,
    /// Explicit stop command
    Stopped,
}

/// Normalized events produced while an agent runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Provider started a response message
    MessageStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },

    /// Streamed text fragment
    TextDelta { text: String },

    /// A text block finished
    TextDone { text: String },

    /// The model began a tool call
    ToolUseStart { id: String, name: String },

    /// Partial JSON of a tool call's input
    ToolUseInputDelta { id: String, partial_json: String },

    /// A tool call is fully specified
    ToolUseDone {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// A tool call produced a result (or was denied)
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin: Option<ToolOrigin>,
    },

    /// Provider finished the response
    TurnEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stop_reason: Option<String>,
    },

    /// Token usage. Straight from the normalizer this is the turn's running
    /// total with zero cost; the runner re-emits it as session totals.
    Usage { usage: TokenUsage, cost: f64 },

    /// Something went wrong
    Error { message: String, recoverable: bool },

    /// Run state transition
    StateChange { from: RunState, to: RunState },

    /// A budget ceiling was reached
    BudgetExceeded { status: BudgetStatus },

    /// The loop finished
    LoopComplete {
        turns: u32,
        reason: CompletionReason,
    },
}

impl AgentEvent {
    /// Create a recoverable error event
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            recoverable: true,
        }
    }

    /// Create a fatal error event
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            recoverable: false,
        }
    }

    /// Short tag for logging and filtering
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::TextDelta { .. } => "text_delta",
            Self::TextDone { .. } => "text_done",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolUseInputDelta { .. } => "tool_use_input_delta",
            Self::ToolUseDone { .. } => "tool_use_done",
            Self::ToolResult { .. } => "tool_result",
            Self::TurnEnd { .. } => "turn_end",
            Self::Usage { .. } => "usage",
            Self::Error { .. } => "error",
            Self::StateChange { .. } => "state_change",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::LoopComplete { .. } => "loop_complete",
        }
    }
}

/// Agent event with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Agent this event belongs to
    pub agent_id: String,

    /// Turn the event was produced in (0 before the first turn)
    pub turn: u32,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// The event payload
    pub event: AgentEvent,
}

impl RunEvent {
    /// Create a new run event
    pub fn new(agent_id: impl Into<String>, turn: u32, event: AgentEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id: agent_id.into(),
            turn,
            timestamp: Utc::now(),
            event,
        }
    }
}
