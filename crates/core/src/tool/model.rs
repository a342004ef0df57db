//! Tool model definitions

use serde::{Deserialize, Serialize};

use crate::agent::ContentBlock;
use crate::{Error, Result};

/// Static gating class of a tool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// Runs without a human in the loop
    Immediate,
    /// Would need confirmation on an interactive surface
    Prompted,
    /// Never runs. Unknown tools land here.
    #[default]
    Blocked,
}

/// Where a tool executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolLocation {
    /// Hub-resident, executed in-process
    Hub,
    /// Only the remote execution surface can run it
    Surface,
}

/// A tool as offered to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub tier: ToolTier,
    pub location: ToolLocation,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, tier: ToolTier, location: ToolLocation) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: empty_object_schema(),
            tier,
            location,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }
}

/// Dispatch decision for a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    Local,
    Remote,
}

impl From<ToolLocation> for ToolOrigin {
    fn from(location: ToolLocation) -> Self {
        match location {
            ToolLocation::Hub => Self::Local,
            ToolLocation::Surface => Self::Remote,
        }
    }
}

/// A single tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub origin: ToolOrigin,
}

impl ToolCall {
    /// Build a call, rejecting empty ids or names
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
        origin: ToolOrigin,
    ) -> Result<Self> {
        let id = id.into();
        let name = name.into();
        if id.is_empty() {
            return Err(Error::MissingToolField("id"));
        }
        if name.is_empty() {
            return Err(Error::MissingToolField("name"));
        }
        Ok(Self {
            id,
            name,
            input,
            origin,
        })
    }
}

/// Outcome of a tool call. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(tool_use_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            content: message.into(),
            is_error: true,
        }
    }
}

impl From<ToolResult> for ContentBlock {
    fn from(result: ToolResult) -> Self {
        ContentBlock::ToolResult {
            tool_use_id: result.tool_use_id,
            content: result.content,
            is_error: result.is_error,
        }
    }
}
