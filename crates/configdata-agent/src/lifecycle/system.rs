use configdata_registry::{ConfigDataClient, ConfigDatas, Registry, RegistryConfig, RegistryServer};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A running registry and the client that talks to it.
pub struct ConfigSystem {
    /// Client for the registry endpoint. Clone it freely.
    pub client: ConfigDataClient,

    registry: Arc<Registry>,
    handle: JoinHandle<()>,
}

impl ConfigSystem {
    /// Builds an in-memory store and registry from `config` and starts serving.
    pub fn new(config: &RegistryConfig) -> Self {
        Self::with_registry(Arc::new(Registry::from_config(config)), config.channel_capacity)
    }

    /// Serves an already constructed registry.
    pub fn with_registry(registry: Arc<Registry>, channel_capacity: usize) -> Self {
        let (server, client) = RegistryServer::new(Arc::clone(&registry), channel_capacity);
        let handle = tokio::spawn(server.run());
        info!(channel_capacity, "Config system started");
        Self {
            client,
            registry,
            handle,
        }
    }

    pub fn config_datas(&self, namespace: impl Into<String>) -> ConfigDatas {
        self.client.config_datas(namespace)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Drops the client and waits for the server to drain.
    ///
    /// Returns only once every other clone of the client is gone, so tear
    /// down consumers first.
    pub async fn shutdown(self) -> Result<(), String> {
        info!("Shutting down config system...");
        drop(self.client);

        if let Err(e) = self.handle.await {
            error!("Registry server task failed: {:?}", e);
            return Err(format!("Registry server task failed: {:?}", e));
        }

        info!("Config system shutdown complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use configdata_registry::ConfigResource;

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let system = ConfigSystem::new(&RegistryConfig::default());
        let created = system
            .config_datas("default")
            .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
            .await
            .unwrap();
        assert_eq!(created.resource_version(), "1");
        system.shutdown().await.unwrap();
    }
}
