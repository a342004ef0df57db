//! Tool dispatch
//!
//! Hub-resident tools run in-process through [`LocalTool`]. Surface tools
//! are handed to a [`RemoteToolDispatch`] implementation, which never fails:
//! every outcome is a [`RouteOutcome`] that converts into a tool result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;

use hub_core::tool::{ToolCatalog, ToolLocation, ToolResult, ToolSpec, ToolTier};

/// Outcome of a routed tool call
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The peer answered
    Completed { content: String, is_error: bool },
    /// No connected peer is subscribed to the agent
    Unavailable,
    /// The peer did not answer in time
    TimedOut { after: Duration },
    /// The peer went away before answering
    PeerDisconnected,
}

impl RouteOutcome {
    pub fn is_error(&self) -> bool {
        match self {
            Self::Completed { is_error, .. } => *is_error,
            _ => true,
        }
    }

    /// Human-readable text for failures
    pub fn message(&self) -> String {
        match self {
            Self::Completed { content, .. } => content.clone(),
            Self::Unavailable => "no browser connected for this agent".to_string(),
            Self::TimedOut { after } => {
                format!("browser tool timed out after {} ms", after.as_millis())
            }
            Self::PeerDisconnected => "browser disconnected before responding".to_string(),
        }
    }

    pub fn into_tool_result(self, tool_use_id: impl Into<String>) -> ToolResult {
        let is_error = self.is_error();
        let content = match self {
            Self::Completed { content, .. } => content,
            other => other.message(),
        };
        ToolResult {
            tool_use_id: tool_use_id.into(),
            content,
            is_error,
        }
    }
}

/// Routes a tool call to a remote execution surface
#[async_trait]
pub trait RemoteToolDispatch: Send + Sync {
    async fn route_to_remote(
        &self,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
        timeout: Duration,
    ) -> RouteOutcome;
}

/// Outcome of a local tool
pub type LocalToolOutput = std::result::Result<String, String>;

/// A tool executed inside the hub process
#[async_trait]
pub trait LocalTool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    async fn execute(&self, input: serde_json::Value) -> LocalToolOutput;
}

/// Returns `input.text`
#[derive(Debug, Default)]
pub struct EchoTool;

#[async_trait]
impl LocalTool for EchoTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("echo", ToolTier::Immediate, ToolLocation::Hub)
            .with_description("Echo the given text back")
            .with_input_schema(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }))
    }

    async fn execute(&self, input: serde_json::Value) -> LocalToolOutput {
        match input.get("text").and_then(|v| v.as_str()) {
            Some(text) => Ok(text.to_string()),
            None => Err("missing string field: text".to_string()),
        }
    }
}

/// Returns the current UTC time in RFC 3339
#[derive(Debug, Default)]
pub struct CurrentTimeTool;

#[async_trait]
impl LocalTool for CurrentTimeTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("current_time", ToolTier::Immediate, ToolLocation::Hub)
            .with_description("Current UTC time in RFC 3339 format")
    }

    async fn execute(&self, _input: serde_json::Value) -> LocalToolOutput {
        Ok(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

/// Tools only a browser surface can run
pub fn surface_tool_specs() -> Vec<ToolSpec> {
    let string_prop = |name: &str| {
        json!({
            "type": "object",
            "properties": { name: { "type": "string" } },
            "required": [name]
        })
    };

    vec![
        ToolSpec::new("navigate", ToolTier::Prompted, ToolLocation::Surface)
            .with_description("Navigate the active tab to a URL")
            .with_input_schema(string_prop("url")),
        ToolSpec::new("dom_query", ToolTier::Immediate, ToolLocation::Surface)
            .with_description("Return elements matching a CSS selector")
            .with_input_schema(string_prop("selector")),
        ToolSpec::new("click", ToolTier::Prompted, ToolLocation::Surface)
            .with_description("Click the element matching a CSS selector")
            .with_input_schema(string_prop("selector")),
        ToolSpec::new("type_text", ToolTier::Prompted, ToolLocation::Surface)
            .with_description("Type text into the element matching a CSS selector")
            .with_input_schema(json!({
                "type": "object",
                "properties": {
                    "selector": { "type": "string" },
                    "text": { "type": "string" }
                },
                "required": ["selector", "text"]
            })),
        ToolSpec::new("screenshot", ToolTier::Immediate, ToolLocation::Surface)
            .with_description("Capture the visible part of the active tab"),
    ]
}

/// Catalog plus the executors behind it
#[derive(Clone, Default)]
pub struct ToolRegistry {
    catalog: ToolCatalog,
    local: HashMap<String, Arc<dyn LocalTool>>,
    remote: Option<Arc<dyn RemoteToolDispatch>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("catalog", &self.catalog)
            .field("local", &self.local.keys().collect::<Vec<_>>())
            .field("remote", &self.remote.is_some())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in hub tools plus the default surface tools
    pub fn with_defaults() -> Self {
        let mut registry = Self::new()
            .with_local(Arc::new(EchoTool))
            .with_local(Arc::new(CurrentTimeTool));
        for spec in surface_tool_specs() {
            registry.register_surface(spec);
        }
        registry
    }

    pub fn register_local(&mut self, tool: Arc<dyn LocalTool>) {
        let mut spec = tool.spec();
        spec.location = ToolLocation::Hub;
        self.local.insert(spec.name.clone(), tool);
        self.catalog.register(spec);
    }

    pub fn with_local(mut self, tool: Arc<dyn LocalTool>) -> Self {
        self.register_local(tool);
        self
    }

    pub fn register_surface(&mut self, mut spec: ToolSpec) {
        spec.location = ToolLocation::Surface;
        self.local.remove(&spec.name);
        self.catalog.register(spec);
    }

    pub fn with_remote(mut self, dispatch: Arc<dyn RemoteToolDispatch>) -> Self {
        self.remote = Some(dispatch);
        self
    }

    pub fn set_remote(&mut self, dispatch: Arc<dyn RemoteToolDispatch>) {
        self.remote = Some(dispatch);
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn tier(&self, name: &str) -> ToolTier {
        self.catalog.tier(name)
    }

    pub fn location(&self, name: &str) -> Option<ToolLocation> {
        self.catalog.location(name)
    }

    /// Specs offered to the model, filtered by an allow-list
    pub fn offered(&self, allow: impl Fn(&str) -> bool) -> Vec<ToolSpec> {
        self.catalog
            .specs()
            .filter(|spec| spec.tier != ToolTier::Blocked && allow(&spec.name))
            .cloned()
            .collect()
    }

    /// Run a hub-resident tool
    pub async fn execute_local(
        &self,
        tool_use_id: &str,
        name: &str,
        input: serde_json::Value,
    ) -> ToolResult {
        match self.local.get(name) {
            Some(tool) => match tool.execute(input).await {
                Ok(content) => ToolResult::success(tool_use_id, content),
                Err(message) => ToolResult::error(tool_use_id, message),
            },
            None => ToolResult::error(tool_use_id, format!("no local executor for tool {}", name)),
        }
    }

    /// Route a surface tool. Without a dispatcher this is `Unavailable`.
    pub async fn execute_remote(
        &self,
        agent_id: &str,
        name: &str,
        input: serde_json::Value,
        timeout: Duration,
    ) -> RouteOutcome {
        match &self.remote {
            Some(remote) => remote.route_to_remote(agent_id, name, input, timeout).await,
            None => RouteOutcome::Unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDispatch(RouteOutcome);

    #[async_trait]
    impl RemoteToolDispatch for FixedDispatch {
        async fn route_to_remote(
            &self,
            _agent_id: &str,
            _tool_name: &str,
            _input: serde_json::Value,
            _timeout: Duration,
        ) -> RouteOutcome {
            self.0.clone()
        }
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = RouteOutcome::Completed {
            content: "done".to_string(),
            is_error: false,
        }
        .into_tool_result("t1");
        assert_eq!(ok, ToolResult::success("t1", "done"));

        let missing = RouteOutcome::Unavailable.into_tool_result("t2");
        assert!(missing.is_error);
        assert!(missing.content.contains("no browser connected"));

        let late = RouteOutcome::TimedOut {
            after: Duration::from_millis(1500),
        }
        .into_tool_result("t3");
        assert!(late.is_error);
        assert!(late.content.contains("1500 ms"));

        assert!(RouteOutcome::PeerDisconnected.is_error());
    }

    #[test]
    fn test_defaults_are_static_per_name() {
        let registry = ToolRegistry::with_defaults();
        assert_eq!(registry.location("echo"), Some(ToolLocation::Hub));
        assert_eq!(registry.location("navigate"), Some(ToolLocation::Surface));
        assert_eq!(registry.tier("navigate"), ToolTier::Prompted);
        assert_eq!(registry.tier("bash"), ToolTier::Blocked);
        assert_eq!(registry.location("bash"), None);
    }

    #[test]
    fn test_offered_respects_allow_list() {
        let registry = ToolRegistry::with_defaults();
        let names: Vec<_> = registry
            .offered(|name| name == "echo" || name == "click")
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(names, vec!["echo".to_string(), "click".to_string()]);
    }

    #[tokio::test]
    async fn test_local_builtins() {
        let registry = ToolRegistry::with_defaults();

        let echoed = registry
            .execute_local("t1", "echo", json!({"text": "hi"}))
            .await;
        assert_eq!(echoed, ToolResult::success("t1", "hi"));

        let bad = registry.execute_local("t2", "echo", json!({})).await;
        assert!(bad.is_error);

        let now = registry
            .execute_local("t3", "current_time", json!({}))
            .await;
        assert!(!now.is_error);
        assert!(chrono::DateTime::parse_from_rfc3339(&now.content).is_ok());

        let unknown = registry.execute_local("t4", "navigate", json!({})).await;
        assert!(unknown.is_error);
    }

    #[tokio::test]
    async fn test_remote_without_dispatcher_is_unavailable() {
        let registry = ToolRegistry::with_defaults();
        let outcome = registry
            .execute_remote("a", "navigate", json!({}), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, RouteOutcome::Unavailable);

        let registry = registry.with_remote(Arc::new(FixedDispatch(RouteOutcome::PeerDisconnected)));
        let outcome = registry
            .execute_remote("a", "navigate", json!({}), Duration::from_secs(1))
            .await;
        assert_eq!(outcome, RouteOutcome::PeerDisconnected);
    }
}
