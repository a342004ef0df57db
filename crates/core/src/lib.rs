//! Core library for the agent hub
//!
//! This crate contains the shared domain model, including:
//! - Agent identifiers, configuration and sessions
//! - The tool catalog and tool tiers
//! - The run state machine
//! - Token usage and model pricing

pub mod agent;
pub mod error;
pub mod run;
pub mod tool;
pub mod usage;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
