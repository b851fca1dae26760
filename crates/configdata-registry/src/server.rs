//! # Registry Server
//!
//! The endpoint loop. It owns the receiving half of the request channel and
//! hands every request to its own Tokio task, so a slow call never holds up an
//! unrelated one. Ordering between writes to the same object is left to the
//! store's compare-and-swap.
//!
//! ```rust
//! use configdata_registry::{ConfigResource, Registry, RegistryConfig, RegistryServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(Registry::from_config(&RegistryConfig::default()));
//!     let (server, client) = RegistryServer::new(registry, 10);
//!     tokio::spawn(server.run());
//!
//!     let configs = client.config_datas("default");
//!     let stored = configs
//!         .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
//!         .await
//!         .unwrap();
//!     assert_eq!(stored.resource_version(), "1");
//! }
//! ```

use crate::client::ConfigDataClient;
use crate::message::RegistryRequest;
use crate::registry::Registry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info};

pub struct RegistryServer {
    receiver: mpsc::Receiver<RegistryRequest>,
    registry: Arc<Registry>,
}

impl RegistryServer {
    /// Creates the server and a client connected to it.
    ///
    /// `buffer_size` bounds the request channel; callers wait for space when
    /// it is full.
    pub fn new(registry: Arc<Registry>, buffer_size: usize) -> (Self, ConfigDataClient) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let server = Self { receiver, registry };
        (server, ConfigDataClient::new(sender))
    }

    /// Serves requests until every client is dropped, then waits for the
    /// requests already in flight.
    pub async fn run(mut self) {
        info!("Registry server started");
        let mut in_flight = JoinSet::new();
        let mut served: u64 = 0;

        while let Some(request) = self.receiver.recv().await {
            served += 1;
            debug!(
                verb = request.verb(),
                namespace = request.namespace(),
                "Dispatch"
            );
            let registry = self.registry.clone();
            in_flight.spawn(handle(registry, request));

            // Reap finished tasks so the set does not grow without bound.
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        info!(served, "Registry server shutdown");
    }
}

async fn handle(registry: Arc<Registry>, request: RegistryRequest) {
    // A dropped receiver means the caller gave up; nothing to report.
    match request {
        RegistryRequest::Get {
            namespace,
            name,
            respond_to,
        } => {
            let _ = respond_to.send(registry.get(&namespace, &name).await);
        }
        RegistryRequest::List {
            namespace,
            options,
            respond_to,
        } => {
            let _ = respond_to.send(registry.list(&namespace, &options).await);
        }
        RegistryRequest::Create {
            namespace,
            resource,
            respond_to,
        } => {
            let _ = respond_to.send(registry.create(&namespace, resource).await);
        }
        RegistryRequest::Update {
            namespace,
            resource,
            respond_to,
        } => {
            let _ = respond_to.send(registry.update(&namespace, resource).await);
        }
        RegistryRequest::Delete {
            namespace,
            name,
            respond_to,
        } => {
            let _ = respond_to.send(registry.delete(&namespace, &name).await);
        }
        RegistryRequest::Watch {
            namespace,
            options,
            respond_to,
        } => {
            let _ = respond_to.send(registry.watch(&namespace, &options).await);
        }
    }
}
