//! # Registry
//!
//! The typed CRUD + Watch contract for `ConfigResource`, composed from a
//! [`StoreAdapter`] and a [`Strategy`]. Every operation is namespace-scoped and
//! reports failures directly; nothing here retries on the caller's behalf
//! except the single name-generation retry on create.
//!
//! The registry holds no locks of its own. Concurrent writes to the same
//! object are serialized by the store's compare-and-swap on the revision.

use crate::adapter::{parse_resource_version, StoreAdapter};
use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::model::{ConfigResource, ConfigResourceList, ListOptions};
use crate::selection::{Matcher, SelectionPredicate};
use crate::store::{KeyedStore, MemoryStore};
use crate::strategy::Strategy;
use crate::watch::WatchStream;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Registry {
    adapter: StoreAdapter,
    strategy: Strategy,
}

impl Registry {
    pub fn new(store: Arc<dyn KeyedStore>, strategy: Strategy) -> Self {
        Self {
            adapter: StoreAdapter::new(store),
            strategy,
        }
    }

    /// A registry over a fresh [`MemoryStore`] sized from `config`.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let store = MemoryStore::new(config.watch_history, config.watch_channel_capacity);
        Self::new(
            Arc::new(store),
            Strategy::new(config.allow_unconditional_update),
        )
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Binds the object to the request namespace.
    fn scope(&self, namespace: &str, resource: &mut ConfigResource) -> Result<(), RegistryError> {
        if resource.metadata.namespace.is_empty() {
            resource.metadata.namespace = namespace.to_string();
        } else if resource.metadata.namespace != namespace {
            return Err(RegistryError::Forbidden(format!(
                "the namespace of the object ({}) does not match the namespace on the request ({})",
                resource.metadata.namespace, namespace
            )));
        }
        Ok(())
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<ConfigResource, RegistryError> {
        let result = self.adapter.get(namespace, name).await;
        debug!(namespace, name, found = result.is_ok(), "Get");
        result
    }

    pub async fn list(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<ConfigResourceList, RegistryError> {
        let predicate = SelectionPredicate::from_options(options)?;
        let (items, revision) = self.adapter.list(namespace).await?;
        let items: Vec<_> = items
            .into_iter()
            .filter(|item| predicate.matches(item))
            .collect();
        debug!(namespace, count = items.len(), revision, "List");
        Ok(ConfigResourceList {
            resource_version: revision.to_string(),
            items,
        })
    }

    pub async fn create(
        &self,
        namespace: &str,
        mut resource: ConfigResource,
    ) -> Result<ConfigResource, RegistryError> {
        self.scope(namespace, &mut resource)?;
        self.strategy.prepare_for_create(&mut resource);

        let generated = resource.metadata.name.is_empty();
        self.strategy.assign_generated_name(&mut resource);

        let violations = self.strategy.validate(&resource);
        if !violations.is_empty() {
            warn!(namespace, name = %resource.metadata.name, ?violations, "Create rejected");
            return Err(RegistryError::invalid(&resource.metadata.name, violations));
        }

        let mut result = self.adapter.create(&resource).await;
        if generated && matches!(result, Err(RegistryError::AlreadyExists { .. })) {
            debug!(namespace, name = %resource.metadata.name, "Generated name collided, retrying");
            resource.metadata.name.clear();
            self.strategy.assign_generated_name(&mut resource);
            result = self.adapter.create(&resource).await;
        }

        match result {
            Ok(stored) => {
                info!(
                    namespace,
                    name = %stored.metadata.name,
                    resource_version = %stored.metadata.resource_version,
                    "Created"
                );
                Ok(stored)
            }
            Err(e) => {
                let e = self.strategy.check_generated_name_error(e, &resource);
                warn!(namespace, name = %resource.metadata.name, error = %e, "Create failed");
                Err(e)
            }
        }
    }

    /// Replaces the stored object. Never creates.
    pub async fn update(
        &self,
        namespace: &str,
        mut resource: ConfigResource,
    ) -> Result<ConfigResource, RegistryError> {
        self.scope(namespace, &mut resource)?;
        let name = resource.metadata.name.clone();
        let requested = parse_resource_version(&name, &resource.metadata.resource_version)?;

        let old = self.adapter.get(namespace, &name).await?;
        self.strategy.prepare_for_update(&mut resource, &old);
        let violations = self.strategy.validate_update(&resource, &old);
        if !violations.is_empty() {
            warn!(namespace, %name, ?violations, "Update rejected");
            return Err(RegistryError::invalid(&name, violations));
        }

        let expected = if self.strategy.allow_unconditional_update() {
            None
        } else {
            requested
        };
        match self.adapter.update(&resource, expected).await {
            Ok(stored) => {
                info!(
                    namespace,
                    %name,
                    resource_version = %stored.metadata.resource_version,
                    "Updated"
                );
                Ok(stored)
            }
            Err(e) => {
                warn!(namespace, %name, error = %e, "Update failed");
                Err(e)
            }
        }
    }

    /// Removes an object and returns its final state.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<ConfigResource, RegistryError> {
        match self.adapter.delete(namespace, name).await {
            Ok(removed) => {
                info!(
                    namespace,
                    name,
                    resource_version = %removed.metadata.resource_version,
                    "Deleted"
                );
                Ok(removed)
            }
            Err(e) => {
                warn!(namespace, name, error = %e, "Delete failed");
                Err(e)
            }
        }
    }

    /// Opens a watch connection.
    ///
    /// With no `resource_version` only later mutations are delivered; `"0"`
    /// replays the retained history. A compacted start version produces a
    /// stream whose only item is `ResyncRequired`.
    pub async fn watch(
        &self,
        namespace: &str,
        options: &ListOptions,
    ) -> Result<WatchStream, RegistryError> {
        let predicate = SelectionPredicate::from_options(options)?;
        let after = match options.resource_version.as_deref() {
            Some(version) => parse_resource_version("", version)?,
            None => None,
        };

        match self.adapter.watch(namespace, after).await {
            Ok(subscription) => {
                debug!(namespace, ?after, backlog = subscription.backlog.len(), "Watch opened");
                Ok(WatchStream::from_subscription(
                    subscription,
                    predicate,
                    after.unwrap_or(0),
                ))
            }
            Err(e @ RegistryError::ResyncRequired { .. }) => {
                warn!(namespace, ?after, error = %e, "Watch start compacted");
                Ok(WatchStream::from_error(e))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::NameGenerator;

    fn registry() -> Registry {
        Registry::from_config(&RegistryConfig::default())
    }

    struct FixedNames;

    impl NameGenerator for FixedNames {
        fn generate_name(&self, prefix: &str) -> String {
            format!("{prefix}fixed")
        }
    }

    #[tokio::test]
    async fn test_create_defaults_namespace() {
        let registry = registry();
        let stored = registry
            .create("default", ConfigResource::new("", "cfg1"))
            .await
            .unwrap();
        assert_eq!(stored.namespace(), "default");
        assert_eq!(stored.resource_version(), "1");
    }

    #[tokio::test]
    async fn test_namespace_mismatch_is_forbidden() {
        let registry = registry();
        let err = registry
            .create("default", ConfigResource::new("other", "cfg1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_update_without_version_is_invalid() {
        let registry = registry();
        registry
            .create("default", ConfigResource::new("default", "cfg1"))
            .await
            .unwrap();
        let err = registry
            .update("default", ConfigResource::new("default", "cfg1").with_entry("a", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_update_never_creates() {
        let registry = registry();
        let mut resource = ConfigResource::new("default", "ghost");
        resource.metadata.resource_version = "1".to_string();
        let err = registry.update("default", resource).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_generated_name_collision_becomes_conflict() {
        let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::default());
        let strategy = Strategy::default().with_name_generator(Arc::new(FixedNames));
        let registry = Registry::new(store, strategy);

        let first = registry
            .create("default", ConfigResource::with_generate_name("default", "cfg-"))
            .await
            .unwrap();
        assert_eq!(first.name(), "cfg-fixed");

        let err = registry
            .create("default", ConfigResource::with_generate_name("default", "cfg-"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_explicit_name_collision_is_already_exists() {
        let registry = registry();
        registry
            .create("default", ConfigResource::new("default", "cfg1"))
            .await
            .unwrap();
        let err = registry
            .create("default", ConfigResource::new("default", "cfg1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_bad_watch_version_is_invalid() {
        let registry = registry();
        let err = registry
            .watch("default", &ListOptions::everything().from_version("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid { .. }));
    }
}
