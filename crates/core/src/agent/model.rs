//! Agent session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::usage::TokenUsage;

/// Budget ceilings for one agent. Absent ceilings never trigger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost: Option<f64>,
}

impl BudgetConfig {
    pub fn is_unbounded(&self) -> bool {
        self.max_tokens.is_none() && self.max_cost.is_none()
    }
}

/// Agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Provider model identifier
    pub model: String,

    /// System prompt sent with every turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Tool allow-list. Empty means every catalog tool is offered.
    #[serde(default)]
    pub tools: Vec<String>,

    #[serde(default)]
    pub budget: BudgetConfig,

    /// Maximum output tokens requested per provider call
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

fn default_max_output_tokens() -> u32 {
    4096
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            tools: Vec::new(),
            budget: BudgetConfig::default(),
            max_output_tokens: default_max_output_tokens(),
        }
    }

    /// Whether the allow-list admits `tool_name`.
    pub fn allows_tool(&self, tool_name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool_name)
    }
}

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// One block of message content, in the provider's content-block shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a user text message
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Create an assistant message from content blocks
    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content,
        }
    }

    /// Tool-use blocks carried by this message, in order.
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        self.content.iter().filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }
}

/// Session state owned by one agent's runner.
///
/// The store only ever receives a borrowed snapshot of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSession {
    pub id: String,
    pub config: AgentConfig,
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Completed turns
    #[serde(default)]
    pub turn_count: u32,
    /// Cumulative usage of completed turns
    #[serde(default)]
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    /// Create a new session with an initial user prompt
    pub fn new(id: impl Into<String>, config: AgentConfig, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            config,
            messages: vec![Message::user(prompt)],
            turn_count: 0,
            usage: TokenUsage::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message and bump `updated_at`
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// Whether the last message is an assistant turn awaiting no tool results
    pub fn awaits_user(&self) -> bool {
        matches!(
            self.messages.last(),
            Some(m) if m.role == MessageRole::Assistant && m.tool_uses().next().is_none()
        )
    }
}
