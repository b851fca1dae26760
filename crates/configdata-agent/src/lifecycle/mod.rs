//! # System Lifecycle
//!
//! Wiring and teardown for an in-process deployment.
//!
//! [`ConfigSystem`] builds the store, the registry and its server, spawns the
//! server and hands out the client. Consumers started against that client
//! hold clones of it, so shutdown goes in this order:
//!
//! 1. Tear down every [`RunningConsumer`](crate::consumer::RunningConsumer).
//!    This stops the sync agents and drops their clients.
//! 2. Call [`ConfigSystem::shutdown`]. This drops the last client, which
//!    closes the request channel. The server then drains in-flight requests
//!    and exits.
//!
//! [`setup_tracing`] installs the log subscriber once per process.
//!
//! ```bash
//! RUST_LOG=info cargo run      # Compact logs
//! RUST_LOG=debug cargo run     # Request payloads and sync decisions
//! ```

pub mod system;
pub mod tracing;

pub use self::tracing::setup_tracing;
pub use system::ConfigSystem;
