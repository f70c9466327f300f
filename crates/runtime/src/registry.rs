//! Agent registry: maps agent ids to their drain callbacks.
//!
//! The registry never stores agent state, only a callback closing over it.
//! Every access goes through one lock, so register, unregister and lookup
//! never race. Callbacks are cloned out and run after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use agentry_core::AgentId;
use parking_lot::Mutex;
use tracing::debug;

/// Zero-argument "drain one action" callback.
pub type DrainFn = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub struct AgentRegistry {
    entries: Mutex<HashMap<AgentId, DrainFn>>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the drain callback for an agent.
    pub fn register(&self, id: AgentId, callback: DrainFn) {
        self.entries.lock().insert(id, callback);
        debug!(agent_id = %id, "Registered agent");
    }

    /// Remove an agent. Returns whether it was present.
    pub fn unregister(&self, id: AgentId) -> bool {
        let removed = self.entries.lock().remove(&id).is_some();
        if removed {
            debug!(agent_id = %id, "Unregistered agent");
        }
        removed
    }

    pub fn lookup(&self, id: AgentId) -> Option<DrainFn> {
        self.entries.lock().get(&id).cloned()
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.len())
            .finish()
    }
}
