//! # Agentry Runtime
//!
//! Agents wrap a single value that only changes through queued actions.
//! Actions for one agent run strictly one at a time, in submission order;
//! actions for different agents run in parallel on a shared pool.
//!
//! ```text
//!  producers ──send──▶ agent inbox ──post──▶ WakeChannel
//!                                                │ wait
//!                                           Dispatcher ──lookup──▶ AgentRegistry
//!                                                │ submit
//!                                 WorkerPool lane / solo lane ──▶ drain ─┐
//!                                                ▲                      │
//!                                                └──────── re-arm ──────┘
//! ```
//!
//! ```no_run
//! use agentry_runtime::{AgentManager, RuntimeConfig};
//! use std::time::Duration;
//!
//! let manager = AgentManager::new(&RuntimeConfig::default())?;
//! let counter = manager.agent_with_validator(0_i64, |v| *v >= 0);
//! counter.add_watch(|v| println!("now {v}"));
//! counter.send(|v| v + 1)?;
//! counter.await_for(Duration::from_secs(1));
//! assert_eq!(counter.value(), 1);
//! # Ok::<(), agentry_runtime::Error>(())
//! ```

pub mod agent;
pub mod dispatcher;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod wake;

pub use agent::{Agent, AgentBuilder};
pub use dispatcher::{Dispatcher, DispatcherStats};
pub use manager::AgentManager;
pub use pool::{Job, LaneStats, PoolStats, WorkerPool};
pub use registry::{AgentRegistry, DrainFn};
pub use wake::WakeChannel;

pub use agentry_config::RuntimeConfig;
pub use agentry_core::{
    AgentEvent, AgentId, Error, EventBus, EventChannel, Result, SendKind, WatchId,
};
