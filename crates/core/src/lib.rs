//! # Agentry Core
//!
//! Domain types, traits, and error definitions for the Agentry agent runtime.
//! This crate carries no threads and no scheduling. It defines the vocabulary
//! that the runtime crate implements against.
//!
//! ## Design Philosophy
//!
//! The seams of the runtime are defined here:
//! - [`EventChannel`] is the blocking wake primitive the dispatcher sleeps on
//! - [`Action`] is the tagged unit of work an agent drains
//! - [`EventBus`] carries lifecycle events to anyone who subscribes

pub mod action;
pub mod error;
pub mod event;
pub mod id;
pub mod signal;

// Re-export key types at crate root for ergonomics
pub use action::{Action, SendKind, Validator, Watch, WatchId};
pub use error::{Error, Result};
pub use event::{AgentEvent, EventBus};
pub use id::AgentId;
pub use signal::EventChannel;
