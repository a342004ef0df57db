//! Error types for the core library

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid agent id: {0:?}")]
    InvalidAgentId(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: crate::run::RunState,
        to: crate::run::RunState,
    },

    #[error("Missing tool call field: {0}")]
    MissingToolField(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
