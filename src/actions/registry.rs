//! Immutable-after-boot registry mapping action-type names to
//! implementations.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{Action, ParamSchema};

/// Everything the engine knows about one registered action type.
#[derive(Clone)]
pub struct ActionDescriptor {
    pub action: Arc<dyn Action>,
    pub schema: Option<ParamSchema>,
    /// Context keys this action reads, for documentation and dependency
    /// inspection.
    pub context_inputs: Vec<String>,
    /// Context keys this action writes.
    pub context_outputs: Vec<String>,
    pub supports_checkpoint: bool,
}

impl ActionDescriptor {
    #[must_use]
    pub fn new(action: Arc<dyn Action>) -> Self {
        Self {
            action,
            schema: None,
            context_inputs: Vec::new(),
            context_outputs: Vec::new(),
            supports_checkpoint: true,
        }
    }

    #[must_use]
    pub fn with_schema(mut self, schema: ParamSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn without_checkpoint(mut self) -> Self {
        self.supports_checkpoint = false;
        self
    }
}

/// Builder for [`ActionRegistry`]; registration happens at boot, after
/// which the registry is immutable.
#[derive(Default)]
pub struct ActionRegistryBuilder {
    entries: FxHashMap<String, ActionDescriptor>,
}

impl ActionRegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action under its upper-snake-case type name. Later
    /// registrations of the same name win; boot code decides ordering.
    #[must_use]
    pub fn register(mut self, action_type: impl Into<String>, descriptor: ActionDescriptor) -> Self {
        self.entries.insert(action_type.into(), descriptor);
        self
    }

    #[must_use]
    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            entries: self.entries,
        }
    }
}

/// Process-wide action lookup. Construct once via
/// [`ActionRegistryBuilder`] and share behind an `Arc`.
pub struct ActionRegistry {
    entries: FxHashMap<String, ActionDescriptor>,
}

impl ActionRegistry {
    #[must_use]
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::new()
    }

    #[must_use]
    pub fn get(&self, action_type: &str) -> Option<&ActionDescriptor> {
        self.entries.get(action_type)
    }

    #[must_use]
    pub fn contains(&self, action_type: &str) -> bool {
        self.entries.contains_key(action_type)
    }

    #[must_use]
    pub fn action_types(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
