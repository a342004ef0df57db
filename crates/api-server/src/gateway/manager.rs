//! Gateway Manager - surface peer registry and remote tool router

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agent_runner::{RemoteToolDispatch, RouteOutcome, RunEvent};
use hub_core::agent::is_valid_agent_id;

use super::protocol::{HubToPeerMessage, PeerStatus};

/// One live surface connection
pub struct PeerConnection {
    pub peer_id: String,
    /// Distinguishes a reconnect under the same peer id
    pub connection_id: Uuid,
    tx: mpsc::Sender<HubToPeerMessage>,
    subscriptions: HashSet<String>,
    last_seen: Instant,
    connected_at: DateTime<Utc>,
}

impl PeerConnection {
    pub fn is_subscribed(&self, agent_id: &str) -> bool {
        self.subscriptions.contains(agent_id)
    }
}

#[derive(Default)]
struct Registry {
    peers: HashMap<String, PeerConnection>,
    /// agent id -> most recently active peer id
    last_active: HashMap<String, String>,
}

impl Registry {
    fn select_peer(&self, agent_id: &str) -> Option<&PeerConnection> {
        let preferred = self
            .last_active
            .get(agent_id)
            .and_then(|peer_id| self.peers.get(peer_id))
            .filter(|peer| peer.is_subscribed(agent_id));

        preferred.or_else(|| {
            let mut candidates: Vec<&PeerConnection> = self
                .peers
                .values()
                .filter(|peer| peer.is_subscribed(agent_id))
                .collect();
            candidates.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
            candidates.into_iter().next()
        })
    }

    fn forget_peer(&mut self, peer_id: &str) -> Option<PeerConnection> {
        self.last_active.retain(|_, active| active != peer_id);
        self.peers.remove(peer_id)
    }
}

struct PendingRoute {
    agent_id: String,
    peer_id: String,
    tx: oneshot::Sender<RouteOutcome>,
}

/// Gateway Manager - central hub for surface connections
///
/// Peers and the last-active table share one async lock. The pending table
/// sits behind a plain mutex that is never held across an await; whoever
/// removes a pending entry is the one that resolves it.
pub struct GatewayManager {
    registry: RwLock<Registry>,
    pending: Mutex<HashMap<String, PendingRoute>>,
}

impl GatewayManager {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, PendingRoute>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a peer connection, replacing any previous one with the same id
    pub async fn register_peer(
        &self,
        peer_id: &str,
        tx: mpsc::Sender<HubToPeerMessage>,
    ) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut registry = self.registry.write().await;

        if registry.forget_peer(peer_id).is_some() {
            warn!("Peer {} already registered, replacing connection", peer_id);
            self.fail_pending_for(peer_id);
        }

        info!("Registering peer {}", peer_id);
        registry.peers.insert(
            peer_id.to_string(),
            PeerConnection {
                peer_id: peer_id.to_string(),
                connection_id,
                tx,
                subscriptions: HashSet::new(),
                last_seen: Instant::now(),
                connected_at: Utc::now(),
            },
        );

        connection_id
    }

    /// Remove a peer connection
    ///
    /// Clears its last-active associations and resolves every route still
    /// waiting on it. A stale `connection_id` from a replaced connection is
    /// ignored.
    pub async fn disconnect(&self, peer_id: &str, connection_id: Uuid) {
        let mut registry = self.registry.write().await;
        match registry.peers.get(peer_id) {
            Some(conn) if conn.connection_id == connection_id => {}
            _ => return,
        }

        registry.forget_peer(peer_id);
        let failed = self.fail_pending_for(peer_id);
        info!(peer_id, failed_routes = failed, "Peer disconnected");
    }

    fn fail_pending_for(&self, peer_id: &str) -> usize {
        let mut pending = self.pending();
        let ids: Vec<String> = pending
            .iter()
            .filter(|(_, route)| route.peer_id == peer_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(route) = pending.remove(id) {
                let _ = route.tx.send(RouteOutcome::PeerDisconnected);
            }
        }
        ids.len()
    }

    /// Record that a peer was heard from
    pub async fn touch(&self, peer_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(conn) = registry.peers.get_mut(peer_id) {
            conn.last_seen = Instant::now();
        }
    }

    /// Subscribe a peer to an agent and make it the agent's active peer
    pub async fn subscribe(&self, peer_id: &str, agent_id: &str) -> bool {
        if !is_valid_agent_id(agent_id) {
            warn!(peer_id, "Ignoring subscribe for invalid agent id {:?}", agent_id);
            return false;
        }

        let tx = {
            let mut registry = self.registry.write().await;
            let Some(conn) = registry.peers.get_mut(peer_id) else {
                return false;
            };
            conn.subscriptions.insert(agent_id.to_string());
            conn.last_seen = Instant::now();
            let tx = conn.tx.clone();
            registry
                .last_active
                .insert(agent_id.to_string(), peer_id.to_string());
            tx
        };

        debug!(peer_id, agent_id, "Peer subscribed");
        if let Err(e) = tx.try_send(HubToPeerMessage::Subscribed {
            agent_id: agent_id.to_string(),
        }) {
            warn!(peer_id, agent_id, "Could not acknowledge subscribe: {}", e);
        }
        true
    }

    pub async fn unsubscribe(&self, peer_id: &str, agent_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(conn) = registry.peers.get_mut(peer_id) {
            conn.subscriptions.remove(agent_id);
        }
        if registry.last_active.get(agent_id).map(String::as_str) == Some(peer_id) {
            registry.last_active.remove(agent_id);
        }
        debug!(peer_id, agent_id, "Peer unsubscribed");
    }

    /// Resolve a routed call with the peer's answer
    ///
    /// Unknown ids, late answers and answers from a peer the call was not
    /// addressed to are dropped.
    pub async fn handle_tool_result(
        &self,
        peer_id: &str,
        id: &str,
        content: String,
        is_error: bool,
    ) {
        let agent_id = {
            let mut pending = self.pending();
            match pending.get(id) {
                Some(route) if route.peer_id == peer_id => {}
                Some(route) => {
                    warn!(
                        id,
                        peer_id,
                        expected = %route.peer_id,
                        "Dropping tool result from unexpected peer"
                    );
                    return;
                }
                None => {
                    debug!(id, peer_id, "Dropping tool result for unknown request");
                    return;
                }
            }
            let Some(route) = pending.remove(id) else {
                return;
            };
            let _ = route.tx.send(RouteOutcome::Completed { content, is_error });
            route.agent_id
        };

        let mut registry = self.registry.write().await;
        if registry.peers.contains_key(peer_id) {
            registry.last_active.insert(agent_id, peer_id.to_string());
        }
    }

    /// Push an agent event to every peer subscribed to its agent
    pub async fn forward_event(&self, event: &RunEvent) -> usize {
        let registry = self.registry.read().await;
        let mut delivered = 0;
        for conn in registry.peers.values() {
            if !conn.is_subscribed(&event.agent_id) {
                continue;
            }
            let msg = HubToPeerMessage::AgentEvent {
                agent_id: event.agent_id.clone(),
                event: event.clone(),
            };
            match conn.tx.try_send(msg) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(peer_id = %conn.peer_id, "Dropping agent event: {}", e),
            }
        }
        delivered
    }

    /// Connected peers, sorted by id
    pub async fn list_peers(&self) -> Vec<PeerStatus> {
        let registry = self.registry.read().await;
        let now = Instant::now();

        let mut peers: Vec<PeerStatus> = registry
            .peers
            .values()
            .map(|conn| {
                let mut subscriptions: Vec<String> = conn.subscriptions.iter().cloned().collect();
                subscriptions.sort();
                PeerStatus {
                    peer_id: conn.peer_id.clone(),
                    subscriptions,
                    connected_at: conn.connected_at,
                    last_seen_secs: now.duration_since(conn.last_seen).as_secs(),
                }
            })
            .collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    /// Disconnect peers not heard from within `timeout`
    pub async fn sweep_stale(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<(String, Uuid)> = {
            let registry = self.registry.read().await;
            registry
                .peers
                .values()
                .filter(|conn| now.duration_since(conn.last_seen) > timeout)
                .map(|conn| (conn.peer_id.clone(), conn.connection_id))
                .collect()
        };

        for (peer_id, connection_id) in &stale {
            warn!("Peer {} heartbeat timeout, removing", peer_id);
            self.disconnect(peer_id, *connection_id).await;
        }
        stale.len()
    }

    pub async fn peer_count(&self) -> usize {
        self.registry.read().await.peers.len()
    }

    /// Routes still waiting for an answer
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    /// Resolve a pending route if it is still unresolved
    fn resolve(&self, id: &str, outcome: RouteOutcome) -> bool {
        match self.pending().remove(id) {
            Some(route) => {
                let _ = route.tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

/// Drops the pending entry if the routing future is abandoned
struct PendingGuard<'a> {
    manager: &'a GatewayManager,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.manager.pending().remove(self.id);
    }
}

impl Default for GatewayManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteToolDispatch for GatewayManager {
    async fn route_to_remote(
        &self,
        agent_id: &str,
        tool_name: &str,
        input: serde_json::Value,
        timeout: Duration,
    ) -> RouteOutcome {
        let id = Uuid::new_v4().to_string();
        let (tx, mut rx) = oneshot::channel();

        // Register under the registry lock so a disconnect cannot slip in
        // between selecting the peer and recording the pending entry.
        let (peer_id, sender) = {
            let registry = self.registry.read().await;
            let Some(peer) = registry.select_peer(agent_id) else {
                debug!(agent_id, tool_name, "No subscribed peer for routed call");
                return RouteOutcome::Unavailable;
            };
            self.pending().insert(
                id.clone(),
                PendingRoute {
                    agent_id: agent_id.to_string(),
                    peer_id: peer.peer_id.clone(),
                    tx,
                },
            );
            (peer.peer_id.clone(), peer.tx.clone())
        };

        debug!(agent_id, tool_name, %peer_id, request_id = %id, "Routing tool call");
        let request = HubToPeerMessage::ToolRequest {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
        };
        // One deadline covers queueing the request and waiting for the answer
        let deadline = Instant::now() + timeout;
        let _guard = PendingGuard {
            manager: self,
            id: &id,
        };
        match tokio::time::timeout_at(deadline, sender.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                self.resolve(&id, RouteOutcome::PeerDisconnected);
            }
            Err(_) => {
                if self.resolve(&id, RouteOutcome::TimedOut { after: timeout }) {
                    warn!(agent_id, tool_name, %peer_id, "Peer queue full until the deadline");
                }
            }
        }

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => RouteOutcome::PeerDisconnected,
            Err(_) => {
                if self.resolve(&id, RouteOutcome::TimedOut { after: timeout }) {
                    warn!(agent_id, tool_name, %peer_id, "Routed tool call timed out");
                }
                rx.try_recv()
                    .unwrap_or(RouteOutcome::TimedOut { after: timeout })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    async fn peer(
        manager: &GatewayManager,
        peer_id: &str,
        agent_id: &str,
    ) -> (Uuid, mpsc::Receiver<HubToPeerMessage>) {
        let (tx, mut rx) = mpsc::channel(16);
        let connection_id = manager.register_peer(peer_id, tx).await;
        assert!(manager.subscribe(peer_id, agent_id).await);
        assert!(matches!(
            rx.recv().await,
            Some(HubToPeerMessage::Subscribed { .. })
        ));
        (connection_id, rx)
    }

    async fn next_request(rx: &mut mpsc::Receiver<HubToPeerMessage>) -> (String, String) {
        match rx.recv().await {
            Some(HubToPeerMessage::ToolRequest { id, tool_name, .. }) => (id, tool_name),
            other => panic!("expected tool request, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_peer_resolves_immediately() {
        let manager = GatewayManager::new();
        let outcome = manager
            .route_to_remote("agent-1", "navigate", json!({}), Duration::from_secs(30))
            .await;

        assert_eq!(outcome, RouteOutcome::Unavailable);
        assert!(outcome.message().contains("no browser connected"));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribed_peer_is_not_selected() {
        let manager = GatewayManager::new();
        let (_conn, _rx) = peer(&manager, "peer-1", "agent-other").await;

        let outcome = manager
            .route_to_remote("agent-1", "navigate", json!({}), Duration::from_secs(30))
            .await;
        assert_eq!(outcome, RouteOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_result_resolves_exactly_once() {
        let manager = Arc::new(GatewayManager::new());
        let (_conn, mut rx) = peer(&manager, "peer-1", "agent-1").await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote(
                    "agent-1",
                    "navigate",
                    json!({"url": "https://example.com"}),
                    Duration::from_secs(30),
                )
                .await
        });

        let (id, tool_name) = next_request(&mut rx).await;
        assert_eq!(tool_name, "navigate");
        assert_eq!(manager.pending_count(), 1);

        manager
            .handle_tool_result("peer-1", &id, "loaded".to_string(), false)
            .await;
        // a duplicate answer is dropped
        manager
            .handle_tool_result("peer-1", &id, "again".to_string(), true)
            .await;

        let outcome = call.await.unwrap();
        assert_eq!(
            outcome,
            RouteOutcome::Completed {
                content: "loaded".to_string(),
                is_error: false
            }
        );
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_result_is_dropped() {
        let manager = GatewayManager::new();
        let (_conn, _rx) = peer(&manager, "peer-1", "agent-1").await;
        manager
            .handle_tool_result("peer-1", "missing", "x".to_string(), false)
            .await;
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_clears_pending_entry() {
        let manager = Arc::new(GatewayManager::new());
        let (_conn, mut rx) = peer(&manager, "peer-1", "agent-1").await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = router
                .route_to_remote("agent-1", "click", json!({}), Duration::from_millis(500))
                .await;
            (outcome, started.elapsed())
        });

        let (id, _) = next_request(&mut rx).await;
        let (outcome, elapsed) = call.await.unwrap();
        assert!(elapsed >= Duration::from_millis(500), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(505), "{:?}", elapsed);
        assert_eq!(
            outcome,
            RouteOutcome::TimedOut {
                after: Duration::from_millis(500)
            }
        );
        assert!(outcome.message().contains("timed out after 500 ms"));
        assert_eq!(manager.pending_count(), 0);

        // a late answer changes nothing
        manager
            .handle_tool_result("peer-1", &id, "late".to_string(), false)
            .await;
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_peer_queue_still_times_out() {
        let manager = GatewayManager::new();
        // the subscribe acknowledgement fills the only slot and is never read
        let (tx, _rx) = mpsc::channel(1);
        manager.register_peer("peer-1", tx).await;
        assert!(manager.subscribe("peer-1", "agent-1").await);

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_secs(60),
            manager.route_to_remote("agent-1", "click", json!({}), Duration::from_millis(500)),
        )
        .await
        .expect("route must resolve by its own deadline");

        assert_eq!(
            outcome,
            RouteOutcome::TimedOut {
                after: Duration::from_millis(500)
            }
        );
        assert!(started.elapsed() < Duration::from_millis(505));
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_route_leaves_no_pending_entry() {
        let manager = Arc::new(GatewayManager::new());
        let (_conn, mut rx) = peer(&manager, "peer-1", "agent-1").await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote("agent-1", "click", json!({}), Duration::from_secs(30))
                .await
        });
        let _ = next_request(&mut rx).await;
        assert_eq!(manager.pending_count(), 1);

        call.abort();
        let _ = call.await;
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_resolves_pending_and_clears_last_active() {
        let manager = Arc::new(GatewayManager::new());
        let (conn, mut rx) = peer(&manager, "peer-1", "agent-1").await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote("agent-1", "screenshot", json!({}), Duration::from_secs(30))
                .await
        });
        let _ = next_request(&mut rx).await;

        manager.disconnect("peer-1", conn).await;
        assert_eq!(call.await.unwrap(), RouteOutcome::PeerDisconnected);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.peer_count().await, 0);
        assert!(manager.registry.read().await.last_active.is_empty());

        let outcome = manager
            .route_to_remote("agent-1", "screenshot", json!({}), Duration::from_secs(30))
            .await;
        assert_eq!(outcome, RouteOutcome::Unavailable);
    }

    #[tokio::test]
    async fn test_stale_connection_id_does_not_remove_replacement() {
        let manager = GatewayManager::new();
        let (old, _old_rx) = peer(&manager, "peer-1", "agent-1").await;
        let (_new, _new_rx) = peer(&manager, "peer-1", "agent-1").await;

        manager.disconnect("peer-1", old).await;
        assert_eq!(manager.peer_count().await, 1);
    }

    #[tokio::test]
    async fn test_prefers_last_active_peer() {
        let manager = Arc::new(GatewayManager::new());
        let (_a, mut rx_a) = peer(&manager, "peer-a", "agent-1").await;
        let (_b, mut rx_b) = peer(&manager, "peer-b", "agent-1").await;

        // peer-b subscribed last, so it is active
        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote("agent-1", "navigate", json!({}), Duration::from_secs(30))
                .await
        });
        let (id, _) = next_request(&mut rx_b).await;
        manager
            .handle_tool_result("peer-b", &id, "b".to_string(), false)
            .await;
        call.await.unwrap();
        assert!(rx_a.try_recv().is_err());

        // re-subscribing moves the preference back to peer-a
        assert!(manager.subscribe("peer-a", "agent-1").await);
        let _ = rx_a.recv().await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote("agent-1", "navigate", json!({}), Duration::from_secs(30))
                .await
        });
        let (id, _) = next_request(&mut rx_a).await;
        manager
            .handle_tool_result("peer-a", &id, "a".to_string(), false)
            .await;
        assert_eq!(
            call.await.unwrap(),
            RouteOutcome::Completed {
                content: "a".to_string(),
                is_error: false
            }
        );
    }

    #[tokio::test]
    async fn test_result_from_other_peer_is_ignored() {
        let manager = Arc::new(GatewayManager::new());
        let (_a, mut rx_a) = peer(&manager, "peer-a", "agent-1").await;
        let (_b, _rx_b) = peer(&manager, "peer-b", "agent-2").await;

        let router = Arc::clone(&manager);
        let call = tokio::spawn(async move {
            router
                .route_to_remote("agent-1", "navigate", json!({}), Duration::from_secs(30))
                .await
        });
        let (id, _) = next_request(&mut rx_a).await;

        manager
            .handle_tool_result("peer-b", &id, "spoofed".to_string(), false)
            .await;
        assert_eq!(manager.pending_count(), 1);

        manager
            .handle_tool_result("peer-a", &id, "real".to_string(), false)
            .await;
        assert_eq!(
            call.await.unwrap(),
            RouteOutcome::Completed {
                content: "real".to_string(),
                is_error: false
            }
        );
    }

    #[tokio::test]
    async fn test_forward_event_reaches_subscribers_only() {
        let manager = GatewayManager::new();
        let (_a, mut rx_a) = peer(&manager, "peer-a", "agent-1").await;
        let (_b, mut rx_b) = peer(&manager, "peer-b", "agent-2").await;

        let event = RunEvent::new("agent-1", 1, agent_runner::AgentEvent::recoverable("x"));
        assert_eq!(manager.forward_event(&event).await, 1);

        match rx_a.try_recv() {
            Ok(HubToPeerMessage::AgentEvent { agent_id, event: forwarded }) => {
                assert_eq!(agent_id, "agent-1");
                assert_eq!(forwarded.id, event.id);
            }
            other => panic!("expected agent event, got {:?}", other),
        }
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_silent_peers() {
        let manager = GatewayManager::new();
        let (_a, _rx_a) = peer(&manager, "peer-a", "agent-1").await;

        tokio::time::advance(Duration::from_secs(60)).await;
        let (_b, _rx_b) = peer(&manager, "peer-b", "agent-1").await;
        tokio::time::advance(Duration::from_secs(40)).await;

        assert_eq!(manager.sweep_stale(Duration::from_secs(90)).await, 1);
        let peers = manager.list_peers().await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, "peer-b");
        assert_eq!(peers[0].subscriptions, vec!["agent-1".to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_rejects_invalid_agent_id() {
        let manager = GatewayManager::new();
        let (tx, _rx) = mpsc::channel(4);
        manager.register_peer("peer-1", tx).await;
        assert!(!manager.subscribe("peer-1", "../etc").await);
        assert!(!manager.subscribe("missing", "agent-1").await);
    }
}
