//! `Agent<T>`: a value mutated only by queued, serialized actions.
//!
//! Producers append to the agent's private inbox and post its id to the wake
//! channel; nothing else happens on the caller's thread. The dispatcher hands
//! the registry callback to a pool lane, which claims the inbox (the
//! `draining` flag) and runs one action. While the flag is held no other
//! drain can start for this agent. After each action the chain re-arms
//! itself with the next pending action, so ordering survives coalesced
//! wakes. The flag is released only when the inbox is empty.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use agentry_core::{
    Action, AgentEvent, AgentId, Error, Result, SendKind, Validator, Watch, WatchId,
};
use chrono::Utc;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, trace, warn};

use crate::manager::{AgentManager, Shared};
use crate::pool::Job;

struct Inbox<T> {
    pending: VecDeque<Action<T>>,
    draining: bool,
    active: bool,
}

impl<T> Inbox<T> {
    fn is_idle(&self) -> bool {
        !self.draining && self.pending.is_empty()
    }
}

struct AgentCell<T> {
    id: AgentId,
    state: RwLock<Arc<T>>,
    validator: Option<Validator<T>>,
    watches: RwLock<Vec<(WatchId, Watch<T>)>>,
    next_watch: AtomicU64,
    inbox: Mutex<Inbox<T>>,
    idle: Condvar,
    shared: Arc<Shared>,
}

impl<T> AgentCell<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn enqueue(&self, action: Action<T>) -> Result<()> {
        {
            let mut inbox = self.inbox.lock();
            if !inbox.active {
                return Err(Error::AgentDestroyed { agent_id: self.id });
            }
            inbox.pending.push_back(action);
        }
        self.shared.channel.post(self.id);
        Ok(())
    }

    /// The registry callback. Runs on a pool lane.
    fn wake(self: &Arc<Self>) {
        let action = {
            let mut inbox = self.inbox.lock();
            if inbox.draining {
                return;
            }
            let Some(action) = inbox.pending.pop_front() else {
                return;
            };
            inbox.draining = true;
            action
        };

        match action.kind() {
            SendKind::Pooled => self.run(action),
            SendKind::Solo => self.schedule(action),
        }
    }

    fn run(self: &Arc<Self>, action: Action<T>) {
        self.apply(action);
        self.rearm();
    }

    fn schedule(self: &Arc<Self>, action: Action<T>) {
        let kind = action.kind();
        let job = Box::new(Drain {
            cell: Arc::clone(self),
            action,
        });

        let submitted = match kind {
            SendKind::Pooled => self.shared.pool.submit_job(job).map(|_| ()),
            SendKind::Solo => self.shared.pool.submit_solo_job(job),
        };

        if let Err(err) = submitted {
            self.stall(err);
        }
    }

    fn apply(&self, action: Action<T>) {
        let kind = action.kind();
        let current = T::clone(&self.state.read());
        let next = action.apply(current);

        if let Some(validator) = &self.validator {
            if !validator(&next) {
                debug!(agent_id = %self.id, %kind, "Validator rejected new state");
                self.shared.events.publish(AgentEvent::ActionRejected {
                    agent_id: self.id,
                    kind,
                    timestamp: Utc::now(),
                });
                return;
            }
        }

        let next = Arc::new(next);
        *self.state.write() = Arc::clone(&next);
        trace!(agent_id = %self.id, %kind, "State committed");

        // Snapshot so a watch may add or remove watches on this agent.
        let watches: Vec<Watch<T>> = self
            .watches
            .read()
            .iter()
            .map(|(_, watch)| Arc::clone(watch))
            .collect();
        for watch in &watches {
            watch(&next);
        }
    }

    fn rearm(self: &Arc<Self>) {
        let next = {
            let mut inbox = self.inbox.lock();
            match inbox.pending.pop_front() {
                Some(action) => action,
                None => {
                    inbox.draining = false;
                    if !inbox.active {
                        self.retire();
                    }
                    self.idle.notify_all();
                    return;
                }
            }
        };
        self.schedule(next);
    }

    /// The lane a popped action was queued on died before running it. Put
    /// the action back at the head of the queue and release the claim, so
    /// the next wake picks it up on a live lane.
    fn hand_back(&self, action: Action<T>) {
        warn!(
            agent_id = %self.id,
            kind = %action.kind(),
            "Lane died under a queued action, re-queueing it"
        );
        {
            let mut inbox = self.inbox.lock();
            inbox.pending.push_front(action);
            inbox.draining = false;
        }
        self.shared.channel.post(self.id);
    }

    /// The popped action could not be handed to any lane and is gone.
    fn stall(&self, err: Error) {
        error!(agent_id = %self.id, error = %err, "Failed to schedule drain, action dropped");
        self.shared.events.publish(AgentEvent::ScheduleFailed {
            agent_id: self.id,
            reason: err.to_string(),
            timestamp: Utc::now(),
        });

        let mut inbox = self.inbox.lock();
        inbox.draining = false;
        if !inbox.pending.is_empty() {
            // Leave a wake outstanding for what is still queued.
            self.shared.channel.post(self.id);
        } else if !inbox.active {
            self.retire();
        }
        self.idle.notify_all();
    }

    fn destroy(&self) {
        let mut inbox = self.inbox.lock();
        if !inbox.active {
            return;
        }
        inbox.active = false;

        let pending = inbox.pending.len();
        info!(agent_id = %self.id, pending, "Agent destroyed");
        self.shared.events.publish(AgentEvent::Destroyed {
            agent_id: self.id,
            pending,
            timestamp: Utc::now(),
        });

        if inbox.is_idle() {
            self.retire();
        }
    }

    /// Called with the inbox lock held, so idleness and unregistration are
    /// observed together. Lock order is always inbox, then registry.
    fn retire(&self) {
        if self.shared.registry.unregister(self.id) {
            self.shared.events.publish(AgentEvent::Unregistered {
                agent_id: self.id,
                timestamp: Utc::now(),
            });
        }
    }
}

/// One popped action bound for a lane, with the claim on its agent's inbox.
struct Drain<T> {
    cell: Arc<AgentCell<T>>,
    action: Action<T>,
}

impl<T> Job for Drain<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn run(self: Box<Self>) {
        let Drain { cell, action } = *self;
        cell.run(action);
    }

    fn orphaned(self: Box<Self>) {
        let Drain { cell, action } = *self;
        cell.hand_back(action);
    }
}

/// A handle to an agent's state and queue.
///
/// Dropping the handle destroys the agent: actions already queued still run,
/// then its registry entry is removed.
pub struct Agent<T>
where
    T: Clone + Send + Sync + 'static,
{
    cell: Arc<AgentCell<T>>,
    manager: AgentManager,
}

impl<T> Agent<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an agent on the global manager.
    pub fn new(initial: T) -> Result<Self> {
        AgentBuilder::new(initial).build()
    }

    pub fn builder(initial: T) -> AgentBuilder<T> {
        AgentBuilder::new(initial)
    }

    pub fn id(&self) -> AgentId {
        self.cell.id
    }

    /// Queue `f` to run on a shared pool lane.
    ///
    /// Returns as soon as the action is queued. Fails only if the agent has
    /// been destroyed.
    pub fn send(&self, f: impl FnOnce(T) -> T + Send + 'static) -> Result<()> {
        self.cell.enqueue(Action::pooled(f))
    }

    /// Queue `f` to run on its own thread. For actions that block.
    pub fn send_off(&self, f: impl FnOnce(T) -> T + Send + 'static) -> Result<()> {
        self.cell.enqueue(Action::solo(f))
    }

    /// Register an observer of every committed state, in registration order.
    pub fn add_watch(&self, watch: impl Fn(&T) + Send + Sync + 'static) -> WatchId {
        let id = WatchId(self.cell.next_watch.fetch_add(1, Ordering::Relaxed));
        self.cell.watches.write().push((id, Arc::new(watch)));
        id
    }

    /// Returns whether the watch was registered.
    pub fn remove_watch(&self, id: WatchId) -> bool {
        let mut watches = self.cell.watches.write();
        let before = watches.len();
        watches.retain(|(watch_id, _)| *watch_id != id);
        watches.len() != before
    }

    /// The last committed state.
    pub fn value(&self) -> T {
        T::clone(&self.cell.state.read())
    }

    /// The last committed state without cloning `T`.
    pub fn snapshot(&self) -> Arc<T> {
        Arc::clone(&self.cell.state.read())
    }

    /// Actions queued and not yet started.
    pub fn pending(&self) -> usize {
        self.cell.inbox.lock().pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.cell.inbox.lock().active
    }

    /// Block until every queued action has run, or `timeout` elapses.
    /// Returns `true` if the agent went idle.
    ///
    /// Called from one of this agent's own actions or watches it can only
    /// time out.
    pub fn await_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inbox = self.cell.inbox.lock();
        while !inbox.is_idle() {
            if self.cell.idle.wait_until(&mut inbox, deadline).timed_out() {
                return inbox.is_idle();
            }
        }
        true
    }

    /// Stop accepting actions. Idempotent.
    pub fn destroy(&self) {
        self.cell.destroy();
    }

    pub fn manager(&self) -> &AgentManager {
        &self.manager
    }
}

impl<T> Drop for Agent<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.cell.destroy();
    }
}

impl<T> std::fmt::Debug for Agent<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.cell.id)
            .field("value", &*self.snapshot())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Builds an [`Agent`], optionally with a validator.
pub struct AgentBuilder<T> {
    initial: T,
    validator: Option<Validator<T>>,
}

impl<T> AgentBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        Self {
            initial,
            validator: None,
        }
    }

    /// States for which `validator` returns false are silently discarded.
    pub fn validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    /// Build on the global manager.
    pub fn build(self) -> Result<Agent<T>> {
        Ok(self.build_in(AgentManager::global()?))
    }

    /// Build on `manager` and register the agent's drain callback.
    pub fn build_in(self, manager: &AgentManager) -> Agent<T> {
        let shared = Arc::clone(manager.shared());
        let cell = Arc::new(AgentCell {
            id: AgentId::new(),
            state: RwLock::new(Arc::new(self.initial)),
            validator: self.validator,
            watches: RwLock::new(Vec::new()),
            next_watch: AtomicU64::new(0),
            inbox: Mutex::new(Inbox {
                pending: VecDeque::new(),
                draining: false,
                active: true,
            }),
            idle: Condvar::new(),
            shared,
        });

        let drain = Arc::clone(&cell);
        cell.shared
            .registry
            .register(cell.id, Arc::new(move || drain.wake()));
        cell.shared.events.publish(AgentEvent::Registered {
            agent_id: cell.id,
            timestamp: Utc::now(),
        });

        Agent {
            cell,
            manager: manager.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentry_config::RuntimeConfig;

    const SETTLE: Duration = Duration::from_secs(5);

    fn manager() -> AgentManager {
        AgentManager::new(&RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn initial_value_is_visible() {
        let manager = manager();
        let agent = manager.agent(String::from("hello"));
        assert_eq!(agent.value(), "hello");
        assert_eq!(*agent.snapshot(), "hello");
        assert!(agent.is_active());
        assert_eq!(agent.pending(), 0);
    }

    #[test]
    fn send_applies_action() {
        let manager = manager();
        let agent = manager.agent(1_u64);
        agent.send(|x| x * 10).unwrap();
        assert!(agent.await_for(SETTLE));
        assert_eq!(agent.value(), 10);
    }

    #[test]
    fn send_off_applies_action_on_solo_lane() {
        let manager = manager();
        let agent = manager.agent(Vec::<String>::new());
        agent
            .send_off(|mut names| {
                names.push(std::thread::current().name().unwrap_or("").to_string());
                names
            })
            .unwrap();
        assert!(agent.await_for(SETTLE));
        let names = agent.value();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("agentry-solo-"));
    }

    #[test]
    fn mixed_kinds_keep_fifo_order() {
        let manager = manager();
        let agent = manager.agent(Vec::<u32>::new());
        for i in 0..20 {
            let push = move |mut v: Vec<u32>| {
                v.push(i);
                v
            };
            if i % 3 == 0 {
                agent.send_off(push).unwrap();
            } else {
                agent.send(push).unwrap();
            }
        }
        assert!(agent.await_for(SETTLE));
        assert_eq!(agent.value(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn watch_sees_committed_values() {
        let manager = manager();
        let agent = manager.agent(0_i32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            agent.add_watch(move |v| seen.lock().push(*v));
        }
        agent.send(|x| x + 2).unwrap();
        agent.send(|x| x * 5).unwrap();
        assert!(agent.await_for(SETTLE));
        assert_eq!(*seen.lock(), vec![2, 10]);
    }

    #[test]
    fn removed_watch_is_not_called() {
        let manager = manager();
        let agent = manager.agent(0_i32);
        let calls = Arc::new(AtomicU64::new(0));
        let id = {
            let calls = Arc::clone(&calls);
            agent.add_watch(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        agent.send(|x| x + 1).unwrap();
        assert!(agent.await_for(SETTLE));

        assert!(agent.remove_watch(id));
        assert!(!agent.remove_watch(id));
        agent.send(|x| x + 1).unwrap();
        assert!(agent.await_for(SETTLE));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(agent.value(), 2);
    }

    #[test]
    fn watch_ids_are_distinct() {
        let manager = manager();
        let agent = manager.agent(());
        let a = agent.add_watch(|_| {});
        let b = agent.add_watch(|_| {});
        assert_ne!(a, b);
    }

    #[test]
    fn orphaned_drain_puts_its_action_back_first() {
        let manager = manager();
        let agent = manager.agent(Vec::<u32>::new());

        // Claim the inbox the way a drain does once it has popped an action.
        agent.cell.inbox.lock().draining = true;
        agent
            .send(|mut v| {
                v.push(2);
                v
            })
            .unwrap();

        let job = Box::new(Drain {
            cell: Arc::clone(&agent.cell),
            action: Action::pooled(|mut v: Vec<u32>| {
                v.push(1);
                v
            }),
        });
        job.orphaned();

        assert!(agent.await_for(SETTLE));
        assert_eq!(agent.value(), vec![1, 2]);
    }

    #[test]
    fn stall_leaves_a_wake_for_queued_actions() {
        let manager = manager();
        let agent = manager.agent(0_i32);
        let mut events = manager.events().subscribe();
        {
            let mut inbox = agent.cell.inbox.lock();
            inbox.draining = true;
            inbox.pending.push_back(Action::pooled(|x| x + 1));
        }

        agent.cell.stall(Error::PoolExhausted);

        assert!(agent.await_for(SETTLE));
        assert_eq!(agent.value(), 1);
        let event = events.try_recv().unwrap();
        assert!(matches!(
            event.as_ref(),
            AgentEvent::ScheduleFailed { agent_id, .. } if *agent_id == agent.id()
        ));
    }

    #[test]
    fn destroy_is_idempotent() {
        let manager = manager();
        let agent = manager.agent(0_i32);
        let id = agent.id();
        agent.destroy();
        agent.destroy();
        assert!(!agent.is_active());
        let err = agent.send(|x| x + 1).unwrap_err();
        assert!(matches!(err, Error::AgentDestroyed { agent_id } if agent_id == id));
        assert!(agent.send_off(|x| x + 1).unwrap_err().is_destroyed());
        assert_eq!(manager.registered_agents(), 0);
    }

    #[test]
    fn await_for_returns_immediately_when_idle() {
        let manager = manager();
        let agent = manager.agent(0_i32);
        assert!(agent.await_for(Duration::ZERO));
    }

    #[test]
    fn debug_shows_value() {
        let manager = manager();
        let agent = manager.agent(42_i32);
        let rendered = format!("{agent:?}");
        assert!(rendered.contains("42"));
        assert!(rendered.contains(&agent.id().to_string()));
    }
}
