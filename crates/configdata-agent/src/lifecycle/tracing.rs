//! # Tracing Setup
//!
//! Structured logging for the registry and the agents. Every registry call
//! logs at `debug!` on entry and at `info!` (success) or `warn!` (failure) on
//! exit with `namespace`, `name` and `resource_version` fields. Sync agents log
//! with a `mount` field. Missing references in steady state are `warn!`.
//!
//! With `RUST_LOG=info`:
//!
//! ```text
//! INFO Created namespace="default" name="cfg1" resource_version="1"
//! INFO Volume set up mount=/tmp/demo/mnt files=1
//! INFO Updated namespace="default" name="cfg1" resource_version="2"
//! INFO Volume updated mount=/tmp/demo/mnt files=1
//! WARN Keeping stale content mount=/tmp/demo/mnt missing=configresource "cfg1" not found
//! ```

/// Installs a compact subscriber filtered by `RUST_LOG`.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
