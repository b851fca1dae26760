//! # configdata agent
//!
//! The consumer side of configdata: everything that turns stored
//! `ConfigResource`s into a process environment and a mounted file tree.
//!
//! | Module | Role |
//! |---|---|
//! | [`binding`] | What a consumer declares: env bindings and volume bindings |
//! | [`resolver`] | Ordered, last-writer-wins environment resolution |
//! | [`projection`] | Atomic publication of a file tree into a mount |
//! | [`agent`] | Per-mount sync loop (poll and/or watch) |
//! | [`consumer`] | Start a consumer: resolve env, set up volumes, spawn agents |
//! | [`flags`] | Global flags for the runtime binary a consumer is launched with |
//! | [`config`] | `AgentConfig` from JSON plus environment overrides |
//! | [`lifecycle`] | In-process registry wiring, shutdown, tracing setup |
//!
//! The demo binary in `main.rs` walks through the whole flow.

pub mod agent;
pub mod binding;
pub mod config;
pub mod consumer;
pub mod error;
pub mod flags;
pub mod lifecycle;
pub mod projection;
pub mod resolver;

pub use agent::{Backoff, ProjectionSyncAgent, SyncOutcome, SyncReport, SyncSettings, SyncTrigger};
pub use binding::{EnvBinding, VolumeBinding, VolumeItem};
pub use config::AgentConfig;
pub use consumer::{ConsumerSpec, RunningConsumer};
pub use error::{AgentError, MissingPart, MissingReference, ProjectionError};
pub use flags::{build_flags, RuntimeCli, RuntimeCliConfig};
pub use lifecycle::ConfigSystem;
pub use projection::{AtomicWriter, Payload};
pub use resolver::{resolve_env, EnvResolution};
