//! Agent hub server
//!
//! Serves the agent REST API and the WebSocket endpoint for remote execution
//! surfaces on a single port.

mod config;
mod gateway;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_runner::{
    AgentExecutor, AgentStore, AnthropicClient, HookPhase, PolicyEvaluator, RunnerConfig,
    RunnerContext, ToolRegistry,
};

use crate::config::HubConfig;
use crate::gateway::{start_heartbeat_checker, GatewayManager};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hub_server=debug,agent_runner=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = HubConfig::from_env().context("Failed to read configuration")?;
    tracing::info!("Using data directory: {:?}", config.data_dir);

    let policy = match &config.hooks_file {
        Some(path) => {
            let policy = PolicyEvaluator::from_file(path)
                .with_context(|| format!("Failed to load hook rules from {:?}", path))?;
            tracing::info!(
                "Loaded {} pre-tool and {} post-tool hook rules from {:?}",
                policy.rules(HookPhase::PreToolUse).len(),
                policy.rules(HookPhase::PostToolUse).len(),
                path
            );
            policy
        }
        None => PolicyEvaluator::empty(),
    };

    // Surface tools are routed through the gateway
    let gateway_manager = Arc::new(GatewayManager::new());
    start_heartbeat_checker(Arc::clone(&gateway_manager));
    tracing::info!("Gateway Manager initialized");

    let tools = ToolRegistry::with_defaults().with_remote(gateway_manager.clone());
    let provider = Arc::new(AnthropicClient::new(
        config.anthropic_base_url.clone(),
        config.anthropic_api_key.clone(),
        config.anthropic_version.clone(),
    ));
    let ctx = RunnerContext::new(provider, tools, AgentStore::new(&config.data_dir))
        .with_policy(policy)
        .with_config(RunnerConfig {
            max_turns: config.max_turns,
            route_timeout: config.route_timeout,
        });

    let app_state = AppState::new(
        AgentExecutor::new(ctx),
        Arc::clone(&gateway_manager),
        config.forward_events,
    );

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::agents::router())
        .merge(routes::gateway::router())
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!("Hub listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
