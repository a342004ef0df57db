//! Tool module
//!
//! Tool specs, the static tier/location catalog, and call/result records.

mod catalog;
mod model;

pub use catalog::ToolCatalog;
pub use model::*;
