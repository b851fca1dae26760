//! # Store Adapter
//!
//! Maps typed `ConfigResource` operations onto an opaque [`KeyedStore`].
//!
//! Objects live under `/configresources/<namespace>/<name>`. The stored value
//! is the JSON encoding with `resourceVersion` stripped; on the way out the
//! store's revision is written back into `metadata.resourceVersion` as a
//! decimal string, so the revision is the only source of truth.

use crate::error::{FieldViolation, RegistryError};
use crate::model::ConfigResource;
use crate::store::{KeyedStore, StoreError, StoreEvent, StoreSubscription, Versioned};
use std::sync::Arc;
use tracing::warn;

/// Root of every key owned by this kind.
pub const KEY_PREFIX: &str = "/configresources";

const CONFLICT_REASON: &str =
    "the object has been modified; please apply your changes to the latest version and try again";

/// Key prefix covering every object of one namespace.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{KEY_PREFIX}/{namespace}/")
}

pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{KEY_PREFIX}/{namespace}/{name}")
}

/// Parses a caller-supplied `resourceVersion`. Empty means "unset".
pub fn parse_resource_version(name: &str, value: &str) -> Result<Option<u64>, RegistryError> {
    if value.is_empty() {
        return Ok(None);
    }
    value.parse::<u64>().map(Some).map_err(|_| {
        RegistryError::invalid(
            name,
            vec![FieldViolation::invalid(
                "metadata.resourceVersion",
                value,
                "must be a decimal store version",
            )],
        )
    })
}

/// Converts a store failure on one object into the registry taxonomy.
fn map_store_error(err: StoreError, namespace: &str, name: &str) -> RegistryError {
    match err {
        StoreError::KeyExists(_) => RegistryError::AlreadyExists {
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        StoreError::KeyNotFound(_) => RegistryError::not_found(namespace, name),
        StoreError::VersionMismatch { .. } => RegistryError::Conflict {
            name: name.to_string(),
            reason: CONFLICT_REASON.to_string(),
        },
        StoreError::Compacted { requested, oldest } => {
            RegistryError::ResyncRequired { requested, oldest }
        }
        StoreError::Codec(msg) | StoreError::Backend(msg) => RegistryError::Internal(msg),
    }
}

fn encode(resource: &ConfigResource) -> Result<Vec<u8>, RegistryError> {
    let mut stored = resource.clone();
    stored.metadata.resource_version.clear();
    serde_json::to_vec(&stored).map_err(|e| RegistryError::Internal(e.to_string()))
}

fn decode(bytes: &[u8], revision: u64) -> Result<ConfigResource, RegistryError> {
    let mut resource: ConfigResource =
        serde_json::from_slice(bytes).map_err(|e| RegistryError::Internal(e.to_string()))?;
    resource.metadata.resource_version = revision.to_string();
    Ok(resource)
}

/// Decodes one watch log entry. Deleted objects carry the deletion revision.
pub fn decode_event(event: &StoreEvent) -> Result<ConfigResource, RegistryError> {
    decode(&event.value, event.revision)
}

/// Typed view over a keyed store.
#[derive(Clone)]
pub struct StoreAdapter {
    store: Arc<dyn KeyedStore>,
}

impl StoreAdapter {
    pub fn new(store: Arc<dyn KeyedStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Result<ConfigResource, RegistryError> {
        match self.store.get(&object_key(namespace, name)).await {
            Ok(Some(Versioned { value, revision })) => decode(&value, revision),
            Ok(None) => Err(RegistryError::not_found(namespace, name)),
            Err(e) => Err(map_store_error(e, namespace, name)),
        }
    }

    /// Stores a new object and returns it with its assigned version.
    pub async fn create(&self, resource: &ConfigResource) -> Result<ConfigResource, RegistryError> {
        let (namespace, name) = (resource.namespace(), resource.name());
        let bytes = encode(resource)?;
        let revision = self
            .store
            .create(&object_key(namespace, name), bytes)
            .await
            .map_err(|e| map_store_error(e, namespace, name))?;
        let mut stored = resource.clone();
        stored.metadata.resource_version = revision.to_string();
        Ok(stored)
    }

    /// Replaces an object. `expected` turns the write into a compare-and-swap.
    pub async fn update(
        &self,
        resource: &ConfigResource,
        expected: Option<u64>,
    ) -> Result<ConfigResource, RegistryError> {
        let (namespace, name) = (resource.namespace(), resource.name());
        let bytes = encode(resource)?;
        let revision = self
            .store
            .update(&object_key(namespace, name), bytes, expected)
            .await
            .map_err(|e| map_store_error(e, namespace, name))?;
        let mut stored = resource.clone();
        stored.metadata.resource_version = revision.to_string();
        Ok(stored)
    }

    /// Removes an object and returns its last state at the deletion version.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<ConfigResource, RegistryError> {
        let removed = self
            .store
            .delete(&object_key(namespace, name))
            .await
            .map_err(|e| map_store_error(e, namespace, name))?;
        decode(&removed.value, removed.revision)
    }

    /// Every object in a namespace, plus the store revision of the snapshot.
    pub async fn list(&self, namespace: &str) -> Result<(Vec<ConfigResource>, u64), RegistryError> {
        let listing = self
            .store
            .list(&namespace_prefix(namespace))
            .await
            .map_err(|e| map_store_error(e, namespace, ""))?;
        let mut items = Vec::with_capacity(listing.entries.len());
        for (key, versioned) in listing.entries {
            match decode(&versioned.value, versioned.revision) {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(%key, error = %e, "Skipping undecodable object");
                }
            }
        }
        Ok((items, listing.revision))
    }

    pub async fn watch(
        &self,
        namespace: &str,
        after: Option<u64>,
    ) -> Result<StoreSubscription, RegistryError> {
        self.store
            .watch(&namespace_prefix(namespace), after)
            .await
            .map_err(|e| map_store_error(e, namespace, ""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn adapter() -> (StoreAdapter, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        (StoreAdapter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_stored_value_has_no_version() {
        let (adapter, store) = adapter();
        let mut resource = ConfigResource::new("default", "cfg1").with_entry("k1", "v1");
        resource.metadata.resource_version = "99".to_string();

        let created = adapter.create(&resource).await.unwrap();
        assert_eq!(created.resource_version(), "1");

        let raw = store.get("/configresources/default/cfg1").await.unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw.value).unwrap();
        assert!(json["metadata"].get("resourceVersion").is_none());
    }

    #[tokio::test]
    async fn test_store_errors_are_mapped() {
        let (adapter, _) = adapter();
        let resource = ConfigResource::new("default", "cfg1");
        adapter.create(&resource).await.unwrap();

        let err = adapter.create(&resource).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists { .. }));

        let err = adapter.update(&resource, Some(7)).await.unwrap_err();
        assert!(err.is_conflict());

        let err = adapter.get("default", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_is_namespace_scoped() {
        let (adapter, _) = adapter();
        adapter.create(&ConfigResource::new("a", "x")).await.unwrap();
        adapter.create(&ConfigResource::new("ab", "y")).await.unwrap();

        let (items, revision) = adapter.list("a").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name(), "x");
        assert_eq!(revision, 2);
    }

    #[tokio::test]
    async fn test_delete_returns_last_state() {
        let (adapter, _) = adapter();
        adapter
            .create(&ConfigResource::new("default", "cfg1").with_entry("k", "v"))
            .await
            .unwrap();
        let removed = adapter.delete("default", "cfg1").await.unwrap();
        assert_eq!(removed.value("k"), Some("v"));
        assert_eq!(removed.resource_version(), "2");
    }

    #[test]
    fn test_parse_resource_version() {
        assert_eq!(parse_resource_version("x", "").unwrap(), None);
        assert_eq!(parse_resource_version("x", "12").unwrap(), Some(12));
        assert!(parse_resource_version("x", "abc").is_err());
    }
}
