//! Scripted collaborators for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::sync::Notify;

use crate::client::{ByteStream, ProviderClient, ProviderRequest};
use crate::error::{Result, RunnerError};
use crate::parser::anthropic::AnthropicNormalizer;
use crate::parser::EventNormalizer;
use crate::tools::{RemoteToolDispatch, RouteOutcome};

pub(crate) enum Script {
    Reply(Vec<String>),
    Fail(String),
    /// A stream that never yields
    Hang,
}

/// Provider that plays back one script entry per call
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    responses: Mutex<VecDeque<Script>>,
    pub(crate) requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(responses: Vec<Vec<String>>) -> Arc<Self> {
        Self::scripted(responses.into_iter().map(Script::Reply).collect())
    }

    pub(crate) fn scripted(script: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::scripted(vec![Script::Fail("connection refused".to_string())])
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn stream(&self, request: ProviderRequest) -> Result<ByteStream> {
        self.requests.lock().unwrap().push(request);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::Fail("script exhausted".to_string()));

        match next {
            Script::Reply(chunks) => {
                let items: Vec<Result<Bytes>> =
                    chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Script::Fail(message) => Err(RunnerError::provider(message)),
            Script::Hang => Ok(Box::pin(futures::stream::pending::<Result<Bytes>>())),
        }
    }

    fn normalizer(&self) -> Box<dyn EventNormalizer> {
        Box::new(AnthropicNormalizer::new())
    }
}

/// Dispatcher that answers every routed call with `<tool> done`
pub(crate) struct FixedDispatch;

#[async_trait]
impl RemoteToolDispatch for FixedDispatch {
    async fn route_to_remote(
        &self,
        _agent_id: &str,
        tool_name: &str,
        _input: serde_json::Value,
        _timeout: Duration,
    ) -> RouteOutcome {
        RouteOutcome::Completed {
            content: format!("{} done", tool_name),
            is_error: false,
        }
    }
}

/// Dispatcher whose calls never finish on their own
#[derive(Default)]
pub(crate) struct StalledDispatch {
    pub(crate) calls: AtomicUsize,
    pub(crate) started: Notify,
}

impl StalledDispatch {
    pub(crate) fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteToolDispatch for StalledDispatch {
    async fn route_to_remote(
        &self,
        _agent_id: &str,
        _tool_name: &str,
        _input: serde_json::Value,
        _timeout: Duration,
    ) -> RouteOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        std::future::pending::<RouteOutcome>().await
    }
}

/// Frame payloads as an event stream, delivered in two pieces
pub(crate) fn sse(payloads: Vec<serde_json::Value>) -> Vec<String> {
    let text: String = payloads
        .iter()
        .map(|p| format!("event: {}\ndata: {}\n\n", p["type"].as_str().unwrap(), p))
        .collect();
    let (a, b) = text.split_at(text.len() / 2);
    vec![a.to_string(), b.to_string()]
}

pub(crate) fn text_reply(text: &str, input_tokens: u64, output_tokens: u64) -> Vec<String> {
    sse(vec![
        json!({"type": "message_start", "message": {"id": "msg", "model": "m", "usage": {"input_tokens": input_tokens, "output_tokens": 1}}}),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": text}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": output_tokens}}),
        json!({"type": "message_stop"}),
    ])
}

pub(crate) fn tool_reply(calls: &[(&str, &str, serde_json::Value)], input_tokens: u64) -> Vec<String> {
    let mut payloads = vec![
        json!({"type": "message_start", "message": {"usage": {"input_tokens": input_tokens}}}),
    ];
    for (index, (id, name, input)) in calls.iter().enumerate() {
        payloads.push(json!({"type": "content_block_start", "index": index, "content_block": {"type": "tool_use", "id": id, "name": name, "input": {}}}));
        payloads.push(json!({"type": "content_block_delta", "index": index, "delta": {"type": "input_json_delta", "partial_json": input.to_string()}}));
        payloads.push(json!({"type": "content_block_stop", "index": index}));
    }
    payloads.push(json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 5}}));
    payloads.push(json!({"type": "message_stop"}));
    sse(payloads)
}
