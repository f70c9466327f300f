//! Dispatcher: the single thread that turns wakes into pool work.
//!
//! It sleeps on the [`EventChannel`], resolves the woken agent's drain
//! callback and hands it to a pool lane. It never runs agent code itself, so
//! one slow agent cannot stall the delivery of wakes for the others.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use agentry_config::DispatcherConfig;
use agentry_core::{AgentId, Error, EventChannel, Result};
use serde::Serialize;
use tracing::{debug, error, trace};

use crate::pool::{Job, WorkerPool};
use crate::registry::{AgentRegistry, DrainFn};

/// Counters kept by the dispatch loop.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatcherStats {
    /// Wakes received from the channel
    pub wakes: u64,
    /// Wakes for agents no longer in the registry
    pub stale_wakes: u64,
}

#[derive(Default)]
struct Counters {
    wakes: AtomicU64,
    stale_wakes: AtomicU64,
}

pub struct Dispatcher {
    handle: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Start the dispatch thread. It runs until `channel` is closed.
    pub fn spawn(
        channel: Arc<dyn EventChannel>,
        registry: Arc<AgentRegistry>,
        pool: Arc<WorkerPool>,
        config: &DispatcherConfig,
    ) -> Result<Self> {
        let counters = Arc::new(Counters::default());
        let loop_counters = Arc::clone(&counters);

        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run(&channel, &registry, &pool, &loop_counters))
            .map_err(|e| Error::ThreadSpawn {
                name: config.thread_name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            handle: Some(handle),
            counters,
        })
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            wakes: self.counters.wakes.load(Ordering::Relaxed),
            stale_wakes: self.counters.stale_wakes.load(Ordering::Relaxed),
        }
    }

    /// Wait for the loop to exit. Only returns once the channel is closed.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Dispatcher thread panicked");
            }
        }
    }
}

/// A drain callback on its way to a lane. If the lane dies before running
/// it, the wake is posted again so the agent is not left with work and no
/// wake outstanding.
struct Wake {
    agent_id: AgentId,
    drain: DrainFn,
    channel: Arc<dyn EventChannel>,
}

impl Job for Wake {
    fn run(self: Box<Self>) {
        (self.drain)()
    }

    fn orphaned(self: Box<Self>) {
        debug!(agent_id = %self.agent_id, "Wake lost its lane, posting again");
        self.channel.post(self.agent_id);
    }
}

fn run(
    channel: &Arc<dyn EventChannel>,
    registry: &AgentRegistry,
    pool: &WorkerPool,
    counters: &Counters,
) {
    debug!("Dispatcher started");

    while let Some(agent_id) = channel.wait() {
        counters.wakes.fetch_add(1, Ordering::Relaxed);

        let Some(drain) = registry.lookup(agent_id) else {
            counters.stale_wakes.fetch_add(1, Ordering::Relaxed);
            trace!(agent_id = %agent_id, "Wake for unregistered agent ignored");
            continue;
        };

        let wake = Box::new(Wake {
            agent_id,
            drain,
            channel: Arc::clone(channel),
        });
        match pool.submit_job(wake) {
            Ok(lane) => trace!(agent_id = %agent_id, lane, "Drain dispatched"),
            Err(e) => error!(agent_id = %agent_id, error = %e, "Failed to dispatch drain"),
        }
    }

    debug!("Dispatcher channel closed, exiting");
}
