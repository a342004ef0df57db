//! WebSocket handler for remote execution surfaces

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use hub_core::agent::is_valid_agent_id;

use super::manager::GatewayManager;
use super::protocol::{HubToPeerMessage, PeerToHubMessage};
use crate::state::AppState;

const PEER_BUFFER: usize = 100;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);

/// Query parameters for WebSocket connection
#[derive(Debug, serde::Deserialize)]
pub struct WsQuery {
    #[serde(rename = "peerId")]
    pub peer_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn surface_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let peer_id = match query.peer_id {
        Some(id) if is_valid_agent_id(&id) => id,
        Some(id) => {
            warn!("Rejected surface connection with invalid peer id {:?}", id);
            return (StatusCode::BAD_REQUEST, "Invalid peerId").into_response();
        }
        None => format!("peer-{}", uuid::Uuid::new_v4()),
    };

    info!("New surface connection peer={}", peer_id);
    let manager = state.gateway_arc();
    ws.on_upgrade(move |socket| handle_peer_socket(socket, peer_id, manager))
        .into_response()
}

/// Handle an individual surface WebSocket connection
async fn handle_peer_socket(socket: WebSocket, peer_id: String, manager: Arc<GatewayManager>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for sending messages to this peer; the registry owns the sender
    let (tx, mut rx) = mpsc::channel::<HubToPeerMessage>(PEER_BUFFER);
    let connection_id = manager.register_peer(&peer_id, tx).await;

    // Ends when the registry drops the peer, which also closes the socket
    let mut send_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        let _ = ws_sender.close().await;
    });

    let recv_manager = Arc::clone(&manager);
    let recv_peer_id = peer_id.clone();
    let mut recv_task: JoinHandle<()> = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    recv_manager.touch(&recv_peer_id).await;
                    match serde_json::from_str::<PeerToHubMessage>(&text) {
                        Ok(msg) => handle_peer_message(&recv_manager, &recv_peer_id, msg).await,
                        Err(e) => {
                            warn!("Failed to parse message from {}: {}", recv_peer_id, e);
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("Peer {} sent close frame", recv_peer_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    recv_manager.touch(&recv_peer_id).await;
                }
                Ok(Message::Binary(_)) => {
                    warn!("Unexpected binary message from {}", recv_peer_id);
                }
                Err(e) => {
                    error!("WebSocket error from {}: {}", recv_peer_id, e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Peer {} disconnected", peer_id);
    manager.disconnect(&peer_id, connection_id).await;
}

/// Handle a single message from a peer
async fn handle_peer_message(manager: &GatewayManager, peer_id: &str, msg: PeerToHubMessage) {
    match msg {
        PeerToHubMessage::Subscribe { agent_id } => {
            manager.subscribe(peer_id, &agent_id).await;
        }
        PeerToHubMessage::Unsubscribe { agent_id } => {
            manager.unsubscribe(peer_id, &agent_id).await;
        }
        PeerToHubMessage::ToolResult {
            id,
            content,
            is_error,
        } => {
            manager
                .handle_tool_result(peer_id, &id, content, is_error)
                .await;
        }
        PeerToHubMessage::Heartbeat { .. } => {
            debug!("Heartbeat from {}", peer_id);
        }
    }
}

/// Start the heartbeat checker background task
pub fn start_heartbeat_checker(manager: Arc<GatewayManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            interval.tick().await;
            manager.sweep_stale(HEARTBEAT_TIMEOUT).await;
        }
    })
}
