//! Provider client
//!
//! Opens one streamed model response per turn. The runner owns decoding, so
//! a client only hands back raw bytes plus a fresh normalizer for its wire
//! dialect.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use hub_core::agent::Message;
use hub_core::tool::ToolSpec;

use crate::error::{Result, RunnerError};
use crate::parser::anthropic::AnthropicNormalizer;
use crate::parser::EventNormalizer;

/// Raw response body chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Everything needed for one provider call
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub max_tokens: u32,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Start a streamed response
    async fn stream(&self, request: ProviderRequest) -> Result<ByteStream>;

    /// Normalizer for this provider's event dialect
    fn normalizer(&self) -> Box<dyn EventNormalizer>;
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    stream: bool,
}

impl<'a> MessagesRequest<'a> {
    fn from_request(request: &'a ProviderRequest) -> Self {
        Self {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages: &request.messages,
            tools: request
                .tools
                .iter()
                .map(|spec| WireTool {
                    name: &spec.name,
                    description: &spec.description,
                    input_schema: &spec.input_schema,
                })
                .collect(),
            stream: true,
        }
    }
}

/// Anthropic Messages API client
#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

impl AnthropicClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: api_version.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

#[async_trait]
impl ProviderClient for AnthropicClient {
    async fn stream(&self, request: ProviderRequest) -> Result<ByteStream> {
        let body = MessagesRequest::from_request(&request);

        info!(
            model = %request.model,
            messages = request.messages.len(),
            tools = body.tools.len(),
            "Sending provider request"
        );

        let res = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.api_version)
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| RunnerError::provider(format!("Failed to reach provider: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let error_text = res.text().await.unwrap_or_default();
            return Err(RunnerError::provider(format!(
                "Provider returned {}: {}",
                status, error_text
            )));
        }

        debug!(%status, "Provider stream opened");

        let stream = res.bytes_stream().map(|item| {
            item.map_err(|e| RunnerError::provider(format!("Stream error: {}", e)))
        });
        Ok(Box::pin(stream))
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(AnthropicNormalizer::new())
    }
}
