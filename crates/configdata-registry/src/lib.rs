//! # configdata-registry
//!
//! A namespaced registry of `ConfigResource` objects: versioned, named sets of
//! string key/value configuration. It provides create, read, update, delete
//! and watch with optimistic concurrency on `resourceVersion`.
//!
//! ## Layers
//!
//! | Layer | Type | Role |
//! |-------|------|------|
//! | Storage | [`KeyedStore`], [`MemoryStore`] | Opaque keys, global revision counter, event log |
//! | Mapping | [`StoreAdapter`] | Typed objects ⇄ keys and JSON values |
//! | Policy | [`Strategy`] | Validation, name generation, update conflict rules |
//! | Contract | [`Registry`] | Namespaced CRUD + Watch |
//! | Endpoint | [`RegistryServer`] | Request loop, one task per request |
//! | Client | [`ConfigDataClient`], [`ConfigDatas`] | Typed verbs over the endpoint channel |
//!
//! The store is injected into the registry at construction; nothing in this
//! crate reaches for process-wide state.
//!
//! ## Quick start
//!
//! ```rust
//! use configdata_registry::{ConfigResource, ListOptions, Registry, RegistryConfig, RegistryServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = Arc::new(Registry::from_config(&RegistryConfig::default()));
//!     let (server, client) = RegistryServer::new(registry, 10);
//!     tokio::spawn(server.run());
//!
//!     let configs = client.config_datas("default");
//!     let mut watch = configs.watch(ListOptions::everything().from_version("0")).await.unwrap();
//!
//!     let created = configs
//!         .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
//!         .await
//!         .unwrap();
//!
//!     let event = watch.next().await.unwrap().unwrap();
//!     assert_eq!(event.kind(), "ADDED");
//!     assert_eq!(event.object(), &created);
//! }
//! ```
//!
//! ## Testing
//!
//! [`mock::MockClient`] answers client calls from scripted expectations and
//! records every request; see its module docs.

pub mod adapter;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod mock;
pub mod model;
pub mod registry;
pub mod selection;
pub mod server;
pub mod store;
pub mod strategy;
pub mod validation;
pub mod watch;

pub use adapter::StoreAdapter;
pub use client::{ConfigDataClient, ConfigDatas, DEFAULT_UPDATE_ATTEMPTS};
pub use config::RegistryConfig;
pub use error::{FieldViolation, RegistryError, ViolationKind};
pub use message::{RegistryRequest, Response};
pub use model::{
    ConfigResource, ConfigResourceList, ConfigSelector, ListOptions, ObjectMeta, API_VERSION,
    KIND, NAMESPACE_DEFAULT,
};
pub use registry::Registry;
pub use selection::{FieldSelector, LabelSelector, Matcher, Selectable, SelectionPredicate};
pub use server::RegistryServer;
pub use store::{KeyedStore, MemoryStore, StoreError};
pub use strategy::{NameGenerator, SimpleNameGenerator, Strategy};
pub use watch::{WatchEvent, WatchState, WatchStream};
