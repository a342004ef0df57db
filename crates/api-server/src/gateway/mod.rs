//! Gateway module for remote execution surfaces
//!
//! Surfaces (browser extensions and the like) connect over WebSocket,
//! subscribe to agents, execute routed tool calls and receive agent events.

pub mod handler;
pub mod manager;
pub mod protocol;

pub use handler::{start_heartbeat_checker, surface_ws_handler};
pub use manager::GatewayManager;
pub use protocol::*;
