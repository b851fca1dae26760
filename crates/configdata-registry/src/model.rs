//! # Resource Model
//!
//! Wire types for the `ConfigResource` kind: the resource itself, its metadata,
//! list envelopes and the selector that consumers embed in their bindings.
//!
//! Field names serialize in camelCase so the JSON matches the shape consumers
//! already speak:
//!
//! ```json
//! {
//!   "apiVersion": "v1",
//!   "kind": "ConfigResource",
//!   "metadata": { "name": "cfg1", "namespace": "default", "resourceVersion": "1" },
//!   "data": { "k1": "v1" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default API version stamped on new resources.
pub const API_VERSION: &str = "v1";

/// The only kind this registry serves.
pub const KIND: &str = "ConfigResource";

/// Namespace used when a caller does not pick one.
pub const NAMESPACE_DEFAULT: &str = "default";

/// Identity and bookkeeping shared by every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Prefix used to generate `name` when the caller leaves it empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Opaque version token. Assigned by the store, never by callers.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }
}

/// A versioned, named set of configuration key/value pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResource {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

impl ConfigResource {
    /// Creates an empty resource with the given identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::new(namespace, name),
            data: BTreeMap::new(),
        }
    }

    /// Creates a resource whose name is generated from `prefix` on create.
    pub fn with_generate_name(namespace: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut resource = Self::new(namespace, "");
        resource.metadata.generate_name = prefix.into();
        resource
    }

    /// Adds one data entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Adds one label.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }

    pub fn resource_version(&self) -> &str {
        &self.metadata.resource_version
    }

    /// Looks up a single data value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }
}

/// Result of a List call.
///
/// `resource_version` is the store revision the list was read at; start a
/// Watch from it to see every later change exactly once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResourceList {
    pub resource_version: String,
    pub items: Vec<ConfigResource>,
}

/// Reference to one key of one `ConfigResource`, embedded in consumer bindings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub name: String,
    pub key: String,
}

impl ConfigSelector {
    pub fn new(name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            api_version: None,
            name: name.into(),
            key: key.into(),
        }
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }
}

/// Query parameters accepted by List and Watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOptions {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_selector: String,

    /// Watch only: start after this version. `None` means "from now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ListOptions {
    /// Options that select every object.
    pub fn everything() -> Self {
        Self::default()
    }

    pub fn with_labels(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = selector.into();
        self
    }

    pub fn with_fields(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = selector.into();
        self
    }

    pub fn from_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }
}
