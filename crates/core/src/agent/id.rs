//! Agent identifier validation
//!
//! Agent ids end up as directory names under the store root, so they are
//! checked against `^[A-Za-z0-9_-]+$` before any path is built from them.

use uuid::Uuid;

use crate::{Error, Result};

/// Check whether `id` only uses the agent id charset.
pub fn is_valid_agent_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Validate an externally supplied agent id.
pub fn validate_agent_id(id: &str) -> Result<&str> {
    if is_valid_agent_id(id) {
        Ok(id)
    } else {
        Err(Error::InvalidAgentId(id.to_string()))
    }
}

/// Generate a fresh, charset-valid agent id.
pub fn generate_agent_id() -> String {
    format!("agent-{}", Uuid::new_v4().simple())
}
