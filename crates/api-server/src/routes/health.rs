//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: String,
    version: String,
    data_dir: String,
    live_agents: usize,
    peers: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let data_dir = state
        .executor()
        .store()
        .base_dir()
        .to_string_lossy()
        .to_string();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        data_dir,
        live_agents: state.executor().live_count().await,
        peers: state.gateway().peer_count().await,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use agent_runner::{AgentEvent, SpawnRequest};
    use hub_core::agent::AgentConfig;
    use hub_core::run::RunState;

    use crate::routes::test_support::build_state;
    use crate::state::AppState;

    async fn health_body(state: AppState) -> Value {
        let response = super::router()
            .with_state(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (state, _tmp) = build_state();
        let response = super::router()
            .with_state(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["liveAgents"], 0);
        assert_eq!(body["peers"], 0);
    }

    #[tokio::test]
    async fn stopped_agents_are_not_counted_live() {
        let (state, _tmp) = build_state();
        let (agent_id, mut events) = state
            .executor()
            .spawn(SpawnRequest {
                agent_id: Some("h1".to_string()),
                config: AgentConfig::new("m"),
                prompt: "hello".to_string(),
            })
            .await
            .unwrap();

        while let Some(event) = events.recv().await {
            if matches!(event.event, AgentEvent::StateChange { to: RunState::Running, .. }) {
                break;
            }
        }
        assert_eq!(health_body(state.clone()).await["liveAgents"], 1);

        state.executor().stop(&agent_id).await.unwrap();
        while events.recv().await.is_some() {}
        assert_eq!(health_body(state).await["liveAgents"], 0);
    }
}
