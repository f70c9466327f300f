//! Agent manager: the context object every agent is scheduled through.
//!
//! A manager owns the wake channel, the registry, the worker pool, the event
//! bus and the dispatcher thread. Agents built from the same manager share
//! its pool; managers never share anything with each other, so tests build
//! isolated instances with [`AgentManager::new`]. The process-wide instance
//! behind [`AgentManager::global`] is created on first use and lives until the
//! process exits.

use std::sync::Arc;

use agentry_config::RuntimeConfig;
use agentry_core::{EventBus, EventChannel, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::info;

use crate::agent::{Agent, AgentBuilder};
use crate::dispatcher::{Dispatcher, DispatcherStats};
use crate::pool::{PoolStats, WorkerPool};
use crate::registry::AgentRegistry;
use crate::wake::WakeChannel;

static GLOBAL: OnceCell<AgentManager> = OnceCell::new();

/// The parts of a manager that agents hold on to while they drain.
pub(crate) struct Shared {
    pub(crate) channel: Arc<dyn EventChannel>,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) pool: Arc<WorkerPool>,
    pub(crate) events: EventBus,
}

struct ManagerInner {
    shared: Arc<Shared>,
    dispatcher: Mutex<Dispatcher>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shared.channel.close();
        self.dispatcher.get_mut().join();
        info!(agents = self.shared.registry.len(), "Agent manager stopped");
    }
}

/// Cheaply cloneable handle to a running manager.
#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<ManagerInner>,
}

impl AgentManager {
    /// Start a manager with the default [`WakeChannel`].
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        Self::with_channel(config, Arc::new(WakeChannel::new()))
    }

    /// Start a manager on a caller-supplied wake primitive.
    pub fn with_channel(config: &RuntimeConfig, channel: Arc<dyn EventChannel>) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(WorkerPool::new(&config.pool)?);
        let registry = Arc::new(AgentRegistry::new());
        let events = if config.events.enabled {
            EventBus::new(config.events.capacity)
        } else {
            EventBus::disabled()
        };

        let dispatcher = Dispatcher::spawn(
            Arc::clone(&channel),
            Arc::clone(&registry),
            Arc::clone(&pool),
            &config.dispatcher,
        )?;

        info!(
            lanes = pool.lanes(),
            events = events.is_enabled(),
            "Agent manager started"
        );

        Ok(Self {
            inner: Arc::new(ManagerInner {
                shared: Arc::new(Shared {
                    channel,
                    registry,
                    pool,
                    events,
                }),
                dispatcher: Mutex::new(dispatcher),
            }),
        })
    }

    /// The process-wide manager, configured by [`RuntimeConfig::load`] the
    /// first time it is requested.
    pub fn global() -> Result<&'static AgentManager> {
        GLOBAL.get_or_try_init(|| {
            let config = RuntimeConfig::load()?;
            Self::new(&config)
        })
    }

    /// Create an agent without a validator.
    pub fn agent<T>(&self, initial: T) -> Agent<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        AgentBuilder::new(initial).build_in(self)
    }

    /// Create an agent whose committed states must satisfy `validator`.
    pub fn agent_with_validator<T>(
        &self,
        initial: T,
        validator: impl Fn(&T) -> bool + Send + Sync + 'static,
    ) -> Agent<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        AgentBuilder::new(initial).validator(validator).build_in(self)
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.shared.events
    }

    /// Agents currently holding a registry entry.
    pub fn registered_agents(&self) -> usize {
        self.inner.shared.registry.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.shared.pool.stats()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.inner.dispatcher.lock().stats()
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.inner.shared
    }
}

impl std::fmt::Debug for AgentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentManager")
            .field("pool", &self.inner.shared.pool)
            .field("registry", &self.inner.shared.registry)
            .field("events", &self.inner.shared.events)
            .finish()
    }
}
