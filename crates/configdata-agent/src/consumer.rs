//! # Consumer Instantiation
//!
//! Starting a consumer happens in three steps:
//!
//! 1. Resolve its environment once. The result is never re-resolved.
//! 2. Run the blocking setup of every volume. If any of them fails, the
//!    consumer does not start.
//! 3. Spawn one [`ProjectionSyncAgent`] run loop per volume.
//!
//! [`RunningConsumer::teardown`] stops every loop and waits for it to exit.

use crate::agent::{ProjectionSyncAgent, SyncSettings};
use crate::binding::{EnvBinding, VolumeBinding};
use crate::error::AgentError;
use crate::resolver::{self, EnvResolution};
use configdata_registry::ConfigDatas;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

/// Everything a consumer declares about the config it reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsumerSpec {
    pub name: String,
    pub env: Vec<EnvBinding>,
    pub volumes: Vec<VolumeBinding>,
}

impl ConsumerSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_env(mut self, binding: EnvBinding) -> Self {
        self.env.push(binding);
        self
    }

    pub fn with_volume(mut self, volume: VolumeBinding) -> Self {
        self.volumes.push(volume);
        self
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        for binding in &self.env {
            binding.validate()?;
        }
        for (i, volume) in self.volumes.iter().enumerate() {
            volume.validate()?;
            if self.volumes[..i].iter().any(|v| v.mount_path == volume.mount_path) {
                return Err(AgentError::InvalidBinding(format!(
                    "mount path {} is used twice",
                    volume.mount_path.display()
                )));
            }
        }
        Ok(())
    }
}

/// A started consumer: its resolved environment and its running sync agents.
#[derive(Debug)]
pub struct RunningConsumer {
    name: String,
    env: EnvResolution,
    agents: Vec<Arc<ProjectionSyncAgent>>,
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl RunningConsumer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The environment the consumer process starts with.
    pub fn env(&self) -> &EnvResolution {
        &self.env
    }

    pub fn agents(&self) -> &[Arc<ProjectionSyncAgent>] {
        &self.agents
    }

    /// Stops every sync agent. Projected files stay where they are.
    pub async fn teardown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(consumer = %self.name, "Sync agent task failed: {:?}", e);
            }
        }
        info!(consumer = %self.name, "Consumer torn down");
    }
}

/// Instantiates `spec` against `configs`.
#[instrument(skip_all, fields(consumer = %spec.name))]
pub async fn start(
    configs: ConfigDatas,
    spec: ConsumerSpec,
    base_env: &BTreeMap<String, String>,
    settings: SyncSettings,
) -> Result<RunningConsumer, AgentError> {
    spec.validate()?;

    let env = resolver::resolve(&configs, base_env, &spec.env).await?;
    if !env.is_complete() {
        warn!(missing = env.missing.len(), "Starting with unresolved environment bindings");
    }

    let mut agents = Vec::with_capacity(spec.volumes.len());
    for volume in spec.volumes {
        let agent = ProjectionSyncAgent::new(configs.clone(), volume)?;
        agent.setup().await?;
        agents.push(Arc::new(agent));
    }

    let (shutdown, receiver) = watch::channel(false);
    let handles = agents
        .iter()
        .map(|agent| tokio::spawn(Arc::clone(agent).run(settings, receiver.clone())))
        .collect();

    info!(volumes = agents.len(), variables = env.env.len(), "Consumer started");
    Ok(RunningConsumer {
        name: spec.name,
        env,
        agents,
        handles,
        shutdown,
    })
}
