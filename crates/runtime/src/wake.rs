//! Condition-variable backed [`EventChannel`].
//!
//! A post for an agent that is already queued (and not yet handed to the
//! dispatcher) is coalesced into the pending wake. The dispatcher therefore
//! sees at least one wake per burst of posts, never one per post.

use std::collections::{HashSet, VecDeque};

use agentry_core::{AgentId, EventChannel};
use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct WakeQueue {
    order: VecDeque<AgentId>,
    queued: HashSet<AgentId>,
    closed: bool,
}

/// The default wake primitive used by [`AgentManager`](crate::AgentManager).
#[derive(Default)]
pub struct WakeChannel {
    queue: Mutex<WakeQueue>,
    ready: Condvar,
}

impl WakeChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens waiting to be delivered.
    pub fn queued(&self) -> usize {
        self.queue.lock().order.len()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.lock().closed
    }
}

impl EventChannel for WakeChannel {
    fn post(&self, token: AgentId) {
        let mut queue = self.queue.lock();
        if queue.closed || !queue.queued.insert(token) {
            return;
        }
        queue.order.push_back(token);
        drop(queue);
        self.ready.notify_one();
    }

    fn wait(&self) -> Option<AgentId> {
        let mut queue = self.queue.lock();
        loop {
            if let Some(token) = queue.order.pop_front() {
                queue.queued.remove(&token);
                return Some(token);
            }
            if queue.closed {
                return None;
            }
            self.ready.wait(&mut queue);
        }
    }

    fn close(&self) {
        self.queue.lock().closed = true;
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn posts_for_same_agent_coalesce() {
        let channel = WakeChannel::new();
        let id = AgentId::new();
        channel.post(id);
        channel.post(id);
        channel.post(id);
        assert_eq!(channel.queued(), 1);
        assert_eq!(channel.wait(), Some(id));
    }

    #[test]
    fn agent_can_be_posted_again_after_delivery() {
        let channel = WakeChannel::new();
        let id = AgentId::new();
        channel.post(id);
        assert_eq!(channel.wait(), Some(id));
        channel.post(id);
        assert_eq!(channel.queued(), 1);
    }

    #[test]
    fn distinct_agents_all_delivered() {
        let channel = WakeChannel::new();
        let ids: Vec<AgentId> = (0..5).map(|_| AgentId::new()).collect();
        for id in &ids {
            channel.post(*id);
        }
        let mut seen: Vec<AgentId> = (0..5).filter_map(|_| channel.wait()).collect();
        let mut expected = ids.clone();
        seen.sort_by_key(|id| *id.as_uuid());
        expected.sort_by_key(|id| *id.as_uuid());
        assert_eq!(seen, expected);
    }

    #[test]
    fn wait_blocks_until_post() {
        let channel = Arc::new(WakeChannel::new());
        let id = AgentId::new();

        let waiter = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || channel.wait())
        };
        thread::sleep(Duration::from_millis(20));
        channel.post(id);

        assert_eq!(waiter.join().unwrap(), Some(id));
    }

    #[test]
    fn close_releases_waiter_after_draining() {
        let channel = Arc::new(WakeChannel::new());
        let id = AgentId::new();
        channel.post(id);
        channel.close();

        // Queued tokens survive close; new posts do not.
        channel.post(AgentId::new());
        assert!(channel.is_closed());
        assert_eq!(channel.wait(), Some(id));
        assert_eq!(channel.wait(), None);

        let idle = Arc::new(WakeChannel::new());
        let waiter = {
            let idle = Arc::clone(&idle);
            thread::spawn(move || idle.wait())
        };
        thread::sleep(Duration::from_millis(20));
        idle.close();
        assert_eq!(waiter.join().unwrap(), None);
    }
}
