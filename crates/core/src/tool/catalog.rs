//! Static tool catalog
//!
//! Tier and location are fixed per tool name at registration time; nothing
//! about dispatch is decided at runtime.

use std::collections::HashMap;

use super::model::{ToolLocation, ToolSpec, ToolTier};

#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    specs: HashMap<String, ToolSpec>,
    order: Vec<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a tool spec
    pub fn register(&mut self, spec: ToolSpec) {
        if !self.specs.contains_key(&spec.name) {
            self.order.push(spec.name.clone());
        }
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn with(mut self, spec: ToolSpec) -> Self {
        self.register(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.specs.get(name)
    }

    /// Tier of `name`; unregistered tools are blocked
    pub fn tier(&self, name: &str) -> ToolTier {
        self.specs.get(name).map(|s| s.tier).unwrap_or_default()
    }

    pub fn location(&self, name: &str) -> Option<ToolLocation> {
        self.specs.get(name).map(|s| s.location)
    }

    /// Specs in registration order
    pub fn specs(&self) -> impl Iterator<Item = &ToolSpec> {
        self.order.iter().filter_map(|name| self.specs.get(name))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_is_blocked() {
        let catalog = ToolCatalog::new().with(ToolSpec::new(
            "echo",
            ToolTier::Immediate,
            ToolLocation::Hub,
        ));

        assert_eq!(catalog.tier("echo"), ToolTier::Immediate);
        assert_eq!(catalog.tier("rm_rf"), ToolTier::Blocked);
        assert_eq!(catalog.location("rm_rf"), None);
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut catalog = ToolCatalog::new();
        catalog.register(ToolSpec::new("b", ToolTier::Immediate, ToolLocation::Hub));
        catalog.register(ToolSpec::new("a", ToolTier::Prompted, ToolLocation::Surface));
        catalog.register(ToolSpec::new("b", ToolTier::Blocked, ToolLocation::Hub));

        let names: Vec<_> = catalog.specs().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert_eq!(catalog.tier("b"), ToolTier::Blocked);
        assert_eq!(catalog.len(), 2);
    }
}
