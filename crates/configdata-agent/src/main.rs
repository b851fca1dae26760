//! # configdata demo
//!
//! Starts an in-memory registry, creates a resource, starts a consumer that
//! reads it through an env binding and a volume, then changes and deletes the
//! resource while the volume follows along.
//!
//! ```bash
//! RUST_LOG=info cargo run -p configdata-agent [config.json]
//! ```

use configdata_agent::consumer::{self, ConsumerSpec};
use configdata_agent::flags::RuntimeCli;
use configdata_agent::lifecycle::{setup_tracing, ConfigSystem};
use configdata_agent::{AgentConfig, EnvBinding, VolumeBinding};
use configdata_registry::ConfigResource;
use std::collections::BTreeMap;
use tracing::{info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => AgentConfig::load(path).map_err(|e| e.to_string())?,
        None => AgentConfig::default(),
    };
    info!(namespace = %config.namespace, trigger = ?config.trigger, "Starting configdata demo");

    let system = ConfigSystem::new(&config.registry);
    let configs = system.config_datas(config.namespace.clone());

    let span = tracing::info_span!("publish");
    let created = async {
        info!("Creating cfg1");
        configs
            .create(
                ConfigResource::new(config.namespace.clone(), "cfg1")
                    .with_entry("k1", "v1")
                    .with_entry("LOG_LEVEL", "info"),
            )
            .await
            .map_err(|e| e.to_string())
    }
    .instrument(span)
    .await?;
    info!(resource_version = created.resource_version(), "cfg1 created");

    let mount = tempfile::tempdir().map_err(|e| e.to_string())?;
    let spec = ConsumerSpec::new("web")
        .with_env(EnvBinding::import("cfg1"))
        .with_env(EnvBinding::key("APP_K1", "cfg1", "k1"))
        .with_volume(VolumeBinding::new("conf", mount.path()).with_item("etc/k1", "cfg1", "k1"));

    let base_env = BTreeMap::from([("LOG_LEVEL".to_string(), "warn".to_string())]);
    let span = tracing::info_span!("consumer_start");
    let running = consumer::start(configs.clone(), spec, &base_env, config.sync_settings())
        .instrument(span)
        .await
        .map_err(|e| e.to_string())?;

    let runtime = RuntimeCli::new("container-runtime", config.runtime.clone());
    info!(
        env = ?running.env().to_env_list(),
        command = ?runtime.command_line("run", &["web"]),
        "Consumer would start with"
    );

    let span = tracing::info_span!("rollout");
    async {
        let updated = configs
            .update_with_retry("cfg1", configdata_registry::DEFAULT_UPDATE_ATTEMPTS, |r| {
                r.data.insert("k1".to_string(), "v2".to_string());
            })
            .await
            .map_err(|e| e.to_string())?;
        info!(resource_version = updated.resource_version(), "cfg1 updated");

        for agent in running.agents() {
            let report = agent.sync().await.map_err(|e| e.to_string())?;
            info!(outcome = ?report.outcome, "Volume synced");
        }
        let content = std::fs::read_to_string(mount.path().join("etc/k1")).map_err(|e| e.to_string())?;
        info!(%content, "etc/k1 after update");

        configs.delete("cfg1").await.map_err(|e| e.to_string())?;
        for agent in running.agents() {
            let report = agent.sync().await.map_err(|e| e.to_string())?;
            for missing in &report.missing {
                warn!(%missing, "Volume kept stale content");
            }
        }
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    running.teardown().await;
    drop(configs);
    system.shutdown().await?;

    info!("Demo completed successfully");
    Ok(())
}
