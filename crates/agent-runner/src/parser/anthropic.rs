//! Normalizer for Anthropic Messages streams

use std::collections::HashMap;

use serde::Deserialize;
use tracing::{debug, warn};

use hub_core::usage::TokenUsage;

use super::{EventNormalizer, SseRecord};
use crate::event::AgentEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart {
        message: MessageInfo,
    },
    ContentBlockStart {
        index: u64,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: u64,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: u64,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<TokenUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Deserialize)]
struct MessageInfo {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockStart {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug)]
enum Block {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        initial_input: serde_json::Value,
        json: String,
    },
    Ignored,
}

/// Normalizer for one Anthropic response at a time
#[derive(Debug, Default)]
pub struct AnthropicNormalizer {
    blocks: HashMap<u64, Block>,
    usage: TokenUsage,
    stop_reason: Option<String>,
}

impl AnthropicNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn usage_event(&self) -> AgentEvent {
        AgentEvent::Usage {
            usage: self.usage,
            cost: 0.0,
        }
    }

    fn handle(&mut self, payload: StreamPayload) -> Vec<AgentEvent> {
        match payload {
            StreamPayload::MessageStart { message } => {
                let mut events = vec![AgentEvent::MessageStart {
                    message_id: message.id,
                    model: message.model,
                }];
                if let Some(usage) = message.usage {
                    self.usage.merge_cumulative(&usage);
                    events.push(self.usage_event());
                }
                events
            }

            StreamPayload::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                BlockStart::Text { text } => {
                    let events = if text.is_empty() {
                        Vec::new()
                    } else {
                        vec![AgentEvent::TextDelta { text: text.clone() }]
                    };
                    self.blocks.insert(index, Block::Text(text));
                    events
                }
                BlockStart::ToolUse { id, name, input } => {
                    if id.is_empty() || name.is_empty() {
                        warn!(index, "Tool use block without id or name");
                        self.blocks.insert(index, Block::Ignored);
                        return vec![AgentEvent::recoverable(
                            "Dropped tool call: missing id or name",
                        )];
                    }
                    let event = AgentEvent::ToolUseStart {
                        id: id.clone(),
                        name: name.clone(),
                    };
                    self.blocks.insert(
                        index,
                        Block::ToolUse {
                            id,
                            name,
                            initial_input: input,
                            json: String::new(),
                        },
                    );
                    vec![event]
                }
                BlockStart::Other => {
                    self.blocks.insert(index, Block::Ignored);
                    Vec::new()
                }
            },

            StreamPayload::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(&index), delta) {
                    (Some(Block::Text(text)), BlockDelta::TextDelta { text: delta }) => {
                        text.push_str(&delta);
                        vec![AgentEvent::TextDelta { text: delta }]
                    }
                    (
                        Some(Block::ToolUse { id, json, .. }),
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => {
                        json.push_str(&partial_json);
                        vec![AgentEvent::ToolUseInputDelta {
                            id: id.clone(),
                            partial_json,
                        }]
                    }
                    (None, _) => {
                        debug!(index, "Delta for unknown content block");
                        Vec::new()
                    }
                    _ => Vec::new(),
                }
            }

            StreamPayload::ContentBlockStop { index } => match self.blocks.remove(&index) {
                Some(Block::Text(text)) => vec![AgentEvent::TextDone { text }],
                Some(Block::ToolUse {
                    id,
                    name,
                    initial_input,
                    json,
                }) => {
                    let input = if json.trim().is_empty() {
                        if initial_input.is_null() {
                            serde_json::json!({})
                        } else {
                            initial_input
                        }
                    } else {
                        match serde_json::from_str(&json) {
                            Ok(input) => input,
                            Err(e) => {
                                warn!(tool = %name, "Tool input is not valid JSON: {}", e);
                                return vec![AgentEvent::recoverable(format!(
                                    "Dropped tool call {}: invalid input JSON",
                                    id
                                ))];
                            }
                        }
                    };
                    vec![AgentEvent::ToolUseDone { id, name, input }]
                }
                Some(Block::Ignored) | None => Vec::new(),
            },

            StreamPayload::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.stop_reason = delta.stop_reason;
                }
                match usage {
                    Some(usage) => {
                        self.usage.merge_cumulative(&usage);
                        vec![self.usage_event()]
                    }
                    None => Vec::new(),
                }
            }

            StreamPayload::MessageStop => vec![AgentEvent::TurnEnd {
                stop_reason: self.stop_reason.clone(),
            }],

            StreamPayload::Ping => Vec::new(),

            StreamPayload::Error { error } => {
                let kind = error.kind.unwrap_or_else(|| "error".to_string());
                vec![AgentEvent::fatal(format!("{}: {}", kind, error.message))]
            }
        }
    }
}

impl EventNormalizer for AnthropicNormalizer {
    fn normalize(&mut self, record: &SseRecord) -> Vec<AgentEvent> {
        let value: serde_json::Value = match serde_json::from_str(&record.data) {
            Ok(value) => value,
            Err(e) => {
                warn!(event = ?record.event, "Dropping malformed stream record: {}", e);
                return Vec::new();
            }
        };

        match serde_json::from_value::<StreamPayload>(value) {
            Ok(payload) => self.handle(payload),
            Err(e) => {
                // Unknown event types are expected as the API grows
                debug!(event = ?record.event, "Skipping unrecognized stream record: {}", e);
                Vec::new()
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}
