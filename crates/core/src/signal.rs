//! The wake primitive between producers and the dispatcher.
//!
//! Any blocking multi-producer, single-consumer signal satisfies this
//! contract: a condition variable, a semaphore, a platform event queue.
//! Implementations may coalesce posts, so callers must treat each wake as a
//! hint to check for work rather than as a unit of work.

use crate::id::AgentId;

/// Blocking, possibly coalescing, event source keyed by agent id.
pub trait EventChannel: Send + Sync {
    /// Signal that `token` may have work. Never blocks the caller.
    fn post(&self, token: AgentId);

    /// Block until a token is available.
    ///
    /// Returns `None` once the channel is closed and nothing is left queued.
    fn wait(&self) -> Option<AgentId>;

    /// Stop accepting posts and release the waiter once the queue is empty.
    fn close(&self);
}
