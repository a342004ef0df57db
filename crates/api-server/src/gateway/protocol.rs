//! Wire protocol between the hub and remote execution surfaces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agent_runner::RunEvent;

/// Messages sent by a surface peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerToHubMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { agent_id: String },

    #[serde(rename_all = "camelCase")]
    Unsubscribe { agent_id: String },

    /// Answer to a routed `tool_request`; `id` must match the request
    #[serde(rename_all = "camelCase")]
    ToolResult {
        id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },

    Heartbeat {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
}

/// Messages sent by the hub to a surface peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubToPeerMessage {
    #[serde(rename_all = "camelCase")]
    ToolRequest {
        id: String,
        agent_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    Subscribed { agent_id: String },

    #[serde(rename_all = "camelCase")]
    AgentEvent { agent_id: String, event: RunEvent },
}

/// Connected peer as reported by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatus {
    pub peer_id: String,
    pub subscriptions: Vec<String>,
    pub connected_at: DateTime<Utc>,
    /// Seconds since the peer was last heard from
    pub last_seen_secs: u64,
}
