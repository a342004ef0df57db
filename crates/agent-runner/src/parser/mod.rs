//! Provider stream parsing
//!
//! [`sse::EventStreamDecoder`] frames raw bytes into records; an
//! [`EventNormalizer`] turns provider-specific records into [`AgentEvent`]s.

use crate::event::AgentEvent;

pub mod anthropic;
pub mod sse;

pub use sse::{EventStreamDecoder, SseRecord};

/// Turns decoded records of one provider into normalized agent events
pub trait EventNormalizer: Send {
    /// Normalize a record. Malformed records yield no events.
    fn normalize(&mut self, record: &SseRecord) -> Vec<AgentEvent>;

    /// Forget per-response state before the next response
    fn reset(&mut self);
}
