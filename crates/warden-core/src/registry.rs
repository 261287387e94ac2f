//! The set of tools an agent loop may call.

use std::collections::BTreeMap;
use std::sync::Arc;

use warden_contracts::tool::ToolDescriptor;

use crate::traits::Tool;

/// Tools keyed by name.
///
/// Registries are cheap to clone. A child's registry is derived from its
/// parent's with `restricted_to`, so a sub-agent can only ever see a subset
/// of the tools (and risk tiers) its parent had.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `tool` under its descriptor name, replacing any previous
    /// tool with that name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.descriptor().name.clone(), tool);
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor().clone()).collect()
    }

    /// The subset of this registry named in `names`. Unknown names are
    /// ignored; an empty list keeps every tool.
    pub fn restricted_to(&self, names: &[String]) -> Self {
        if names.is_empty() {
            return self.clone();
        }
        Self {
            tools: self
                .tools
                .iter()
                .filter(|(name, _)| names.contains(name))
                .map(|(name, tool)| (name.clone(), tool.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.tools.keys()).finish()
    }
}
