//! Agent module
//!
//! Identifiers, configuration and the session snapshot owned by a runner.

mod id;
mod model;

pub use id::{generate_agent_id, is_valid_agent_id, validate_agent_id};
pub use model::*;
