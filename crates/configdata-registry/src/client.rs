//! # Client
//!
//! [`ConfigDataClient`] is the typed front end to a [`RegistryServer`]. It only
//! holds a channel sender, so it is cheap to clone and share across tasks.
//! [`ConfigDatas`] scopes it to one namespace, which is how every verb is
//! issued:
//!
//! ```rust,ignore
//! let configs = client.config_datas("default");
//! let cfg = configs.get("cfg1").await?;
//! ```
//!
//! The same client drives the in-memory [`MockClient`](crate::mock::MockClient)
//! in tests.
//!
//! [`RegistryServer`]: crate::server::RegistryServer

use crate::error::RegistryError;
use crate::message::{RegistryRequest, Response};
use crate::model::{ConfigResource, ConfigResourceList, ListOptions};
use crate::watch::WatchStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

/// Attempts made by [`ConfigDatas::update_with_retry`] before giving up.
pub const DEFAULT_UPDATE_ATTEMPTS: usize = 5;

#[derive(Clone, Debug)]
pub struct ConfigDataClient {
    sender: mpsc::Sender<RegistryRequest>,
}

impl ConfigDataClient {
    pub fn new(sender: mpsc::Sender<RegistryRequest>) -> Self {
        Self { sender }
    }

    /// A handle for the resources of one namespace.
    pub fn config_datas(&self, namespace: impl Into<String>) -> ConfigDatas {
        ConfigDatas {
            client: self.clone(),
            namespace: namespace.into(),
        }
    }

    /// Returns true once the server has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> RegistryRequest,
    ) -> Result<T, RegistryError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| RegistryError::Unavailable("registry endpoint closed".to_string()))?;
        response.await.map_err(|_| {
            RegistryError::Unavailable("registry dropped the response channel".to_string())
        })?
    }
}

/// Namespaced verbs on `ConfigResource`.
#[derive(Clone, Debug)]
pub struct ConfigDatas {
    client: ConfigDataClient,
    namespace: String,
}

impl ConfigDatas {
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn get(&self, name: &str) -> Result<ConfigResource, RegistryError> {
        let namespace = self.namespace.clone();
        let name = name.to_string();
        self.client
            .request(|respond_to| RegistryRequest::Get {
                namespace,
                name,
                respond_to,
            })
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn list(&self, options: ListOptions) -> Result<ConfigResourceList, RegistryError> {
        let namespace = self.namespace.clone();
        self.client
            .request(|respond_to| RegistryRequest::List {
                namespace,
                options,
                respond_to,
            })
            .await
    }

    #[instrument(skip(self, resource), fields(namespace = %self.namespace, name = %resource.metadata.name))]
    pub async fn create(&self, resource: ConfigResource) -> Result<ConfigResource, RegistryError> {
        let namespace = self.namespace.clone();
        self.client
            .request(|respond_to| RegistryRequest::Create {
                namespace,
                resource,
                respond_to,
            })
            .await
    }

    #[instrument(skip(self, resource), fields(namespace = %self.namespace, name = %resource.metadata.name))]
    pub async fn update(&self, resource: ConfigResource) -> Result<ConfigResource, RegistryError> {
        let namespace = self.namespace.clone();
        self.client
            .request(|respond_to| RegistryRequest::Update {
                namespace,
                resource,
                respond_to,
            })
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn delete(&self, name: &str) -> Result<ConfigResource, RegistryError> {
        let namespace = self.namespace.clone();
        let name = name.to_string();
        self.client
            .request(|respond_to| RegistryRequest::Delete {
                namespace,
                name,
                respond_to,
            })
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn watch(&self, options: ListOptions) -> Result<WatchStream, RegistryError> {
        let namespace = self.namespace.clone();
        self.client
            .request(|respond_to| RegistryRequest::Watch {
                namespace,
                options,
                respond_to,
            })
            .await
    }

    /// Read-modify-write loop: fetches the object, applies `mutate` and writes
    /// it back with the version it read. A `Conflict` starts over from a fresh
    /// read, up to `attempts` times; any other error is returned at once.
    #[instrument(skip(self, mutate), fields(namespace = %self.namespace))]
    pub async fn update_with_retry<F>(
        &self,
        name: &str,
        attempts: usize,
        mut mutate: F,
    ) -> Result<ConfigResource, RegistryError>
    where
        F: FnMut(&mut ConfigResource),
    {
        let attempts = attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut current = self.get(name).await?;
            mutate(&mut current);
            match self.update(current).await {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    debug!(name, attempt, "Update conflicted, re-reading");
                }
                result => return result,
            }
        }
    }
}
