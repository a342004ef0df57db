//! Route handlers

pub mod agents;
pub mod gateway;
pub mod health;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Bytes;
    use tempfile::TempDir;

    use agent_runner::parser::anthropic::AnthropicNormalizer;
    use agent_runner::{
        AgentExecutor, AgentStore, ByteStream, EventNormalizer, ProviderClient, ProviderRequest,
        RunnerContext, ToolRegistry,
    };

    use crate::gateway::GatewayManager;
    use crate::state::AppState;

    /// Provider whose stream never yields, keeping agents mid-turn
    pub(crate) struct HangingProvider;

    #[async_trait]
    impl ProviderClient for HangingProvider {
        async fn stream(&self, _request: ProviderRequest) -> agent_runner::Result<ByteStream> {
            Ok(Box::pin(futures::stream::pending::<agent_runner::Result<Bytes>>()))
        }

        fn normalizer(&self) -> Box<dyn EventNormalizer> {
            Box::new(AnthropicNormalizer::new())
        }
    }

    pub(crate) fn build_state() -> (AppState, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let gateway = Arc::new(GatewayManager::new());
        let tools = ToolRegistry::with_defaults().with_remote(gateway.clone());
        let ctx = RunnerContext::new(
            Arc::new(HangingProvider),
            tools,
            AgentStore::new(temp_dir.path()),
        );
        let state = AppState::new(AgentExecutor::new(ctx), gateway, true);
        (state, temp_dir)
    }
}
