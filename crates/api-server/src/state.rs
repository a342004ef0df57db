//! Application state

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use agent_runner::{AgentExecutor, RunEvent};

use crate::gateway::GatewayManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    executor: AgentExecutor,
    gateway: Arc<GatewayManager>,
    forward_events: bool,
}

impl AppState {
    /// `executor` should already route surface tools through `gateway`
    pub fn new(executor: AgentExecutor, gateway: Arc<GatewayManager>, forward_events: bool) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                executor,
                gateway,
                forward_events,
            }),
        }
    }

    pub fn executor(&self) -> &AgentExecutor {
        &self.inner.executor
    }

    pub fn gateway(&self) -> &GatewayManager {
        &self.inner.gateway
    }

    pub fn gateway_arc(&self) -> Arc<GatewayManager> {
        Arc::clone(&self.inner.gateway)
    }

    /// Drain an agent's events, forwarding them to subscribed peers
    ///
    /// The receiver must be drained either way so the runner never blocks on
    /// a full event channel.
    pub fn watch_events(&self, agent_id: String, mut events: mpsc::Receiver<RunEvent>) -> JoinHandle<()> {
        let gateway = self.gateway_arc();
        let forward = self.inner.forward_events;
        tokio::spawn(async move {
            let mut count = 0usize;
            while let Some(event) = events.recv().await {
                count += 1;
                if forward {
                    gateway.forward_event(&event).await;
                }
            }
            debug!(agent_id = %agent_id, events = count, "Agent event stream closed");
        })
    }
}
