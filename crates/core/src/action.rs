//! Actions, validators and watches: the functions an agent is driven by.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Where the drain of an action executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendKind {
    /// On a fresh, single-use lane. For actions that may block.
    Solo,
    /// On one of the shared pool lanes.
    Pooled,
}

impl std::fmt::Display for SendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendKind::Solo => write!(f, "solo"),
            SendKind::Pooled => write!(f, "pooled"),
        }
    }
}

/// Predicate a candidate state must pass before it is committed.
pub type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Observer invoked with every committed state.
pub type Watch<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by `add_watch`, used to remove the watch again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatchId(pub u64);

/// A pending update, tagged with the lane kind it must run on.
///
/// Immutable once enqueued; consumed by exactly one drain.
pub struct Action<T> {
    kind: SendKind,
    apply: Box<dyn FnOnce(T) -> T + Send>,
}

impl<T> Action<T> {
    pub fn new(kind: SendKind, apply: impl FnOnce(T) -> T + Send + 'static) -> Self {
        Self {
            kind,
            apply: Box::new(apply),
        }
    }

    pub fn pooled(apply: impl FnOnce(T) -> T + Send + 'static) -> Self {
        Self::new(SendKind::Pooled, apply)
    }

    pub fn solo(apply: impl FnOnce(T) -> T + Send + 'static) -> Self {
        Self::new(SendKind::Solo, apply)
    }

    pub fn kind(&self) -> SendKind {
        self.kind
    }

    /// Consume the action, producing the candidate next state.
    pub fn apply(self, state: T) -> T {
        (self.apply)(state)
    }
}

impl<T> std::fmt::Debug for Action<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("kind", &self.kind).finish_non_exhaustive()
    }
}
