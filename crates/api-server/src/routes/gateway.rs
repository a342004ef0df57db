//! Gateway routes for remote execution surfaces

use axum::{extract::State, routing::get, Json, Router};

use crate::gateway::{surface_ws_handler, PeerStatus};
use crate::state::AppState;

/// GET /api/peers - Connected surfaces and their subscriptions
async fn list_peers(State(state): State<AppState>) -> Json<Vec<PeerStatus>> {
    Json(state.gateway().list_peers().await)
}

/// Create router for gateway endpoints
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/surface/ws", get(surface_ws_handler))
        .route("/api/peers", get(list_peers))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::routes::test_support::build_state;

    #[tokio::test]
    async fn peers_endpoint_lists_subscriptions() {
        let (state, _tmp) = build_state();
        let (tx, _rx) = tokio::sync::mpsc::channel(4);
        state.gateway().register_peer("peer-1", tx).await;
        state.gateway().subscribe("peer-1", "agent-1").await;

        let response = super::router()
            .with_state(state)
            .oneshot(
                Request::builder()
                    .uri("/api/peers")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body[0]["peerId"], "peer-1");
        assert_eq!(body[0]["subscriptions"][0], "agent-1");
    }
}
