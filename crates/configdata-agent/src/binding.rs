//! # Consumer Bindings
//!
//! How a consumer declares what it reads: an ordered list of [`EnvBinding`]s
//! for its environment and a set of [`VolumeBinding`]s, one per mount point.

use crate::error::AgentError;
use configdata_registry::ConfigSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

/// One element of a consumer's ordered environment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EnvBinding {
    /// A single key exposed under `env_name`.
    #[serde(rename_all = "camelCase")]
    Key {
        env_name: String,
        selector: ConfigSelector,
    },
    /// Every key of a resource, named after the key with an optional prefix.
    #[serde(rename_all = "camelCase")]
    Import {
        resource_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prefix: Option<String>,
    },
}

impl EnvBinding {
    pub fn key(env_name: impl Into<String>, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Key {
            env_name: env_name.into(),
            selector: ConfigSelector::new(name, key),
        }
    }

    pub fn import(resource_name: impl Into<String>) -> Self {
        Self::Import {
            resource_name: resource_name.into(),
            prefix: None,
        }
    }

    pub fn import_with_prefix(resource_name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::Import {
            resource_name: resource_name.into(),
            prefix: Some(prefix.into()),
        }
    }

    /// Name of the resource this binding reads.
    pub fn resource_name(&self) -> &str {
        match self {
            Self::Key { selector, .. } => &selector.name,
            Self::Import { resource_name, .. } => resource_name,
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        match self {
            Self::Key { env_name, selector } => {
                if env_name.is_empty() {
                    return Err(AgentError::InvalidBinding(format!(
                        "env binding for {:?}/{:?} has no variable name",
                        selector.name, selector.key
                    )));
                }
                if env_name.contains('=') {
                    return Err(AgentError::InvalidBinding(format!(
                        "variable name {env_name:?} contains '='"
                    )));
                }
                if selector.name.is_empty() || selector.key.is_empty() {
                    return Err(AgentError::InvalidBinding(format!(
                        "selector for {env_name:?} needs both a name and a key"
                    )));
                }
            }
            Self::Import { resource_name, .. } => {
                if resource_name.is_empty() {
                    return Err(AgentError::InvalidBinding(
                        "import binding has no resource name".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One file of a volume: where it goes and what it contains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeItem {
    pub path: String,
    pub selector: ConfigSelector,
}

impl VolumeItem {
    pub fn new(path: impl Into<String>, name: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            selector: ConfigSelector::new(name, key),
        }
    }
}

/// The desired file tree for one mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBinding {
    pub name: String,
    pub mount_path: PathBuf,
    pub items: Vec<VolumeItem>,
}

impl VolumeBinding {
    pub fn new(name: impl Into<String>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            mount_path: mount_path.into(),
            items: Vec::new(),
        }
    }

    pub fn with_item(mut self, path: impl Into<String>, name: impl Into<String>, key: impl Into<String>) -> Self {
        self.items.push(VolumeItem::new(path, name, key));
        self
    }

    /// Distinct resource names referenced by this volume.
    pub fn resource_names(&self) -> BTreeSet<String> {
        self.items.iter().map(|i| i.selector.name.clone()).collect()
    }

    /// Checks every path and that no path shadows another.
    pub fn validate(&self) -> Result<(), AgentError> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            check_relative_path(&item.path)
                .map_err(|reason| AgentError::InvalidBinding(format!("path {:?}: {reason}", item.path)))?;
            if item.selector.name.is_empty() || item.selector.key.is_empty() {
                return Err(AgentError::InvalidBinding(format!(
                    "path {:?} needs a selector name and key",
                    item.path
                )));
            }
            for other in &seen {
                if *other == item.path {
                    return Err(AgentError::InvalidBinding(format!("duplicate path {:?}", item.path)));
                }
                if is_dir_prefix(other, &item.path) || is_dir_prefix(&item.path, other) {
                    return Err(AgentError::InvalidBinding(format!(
                        "path {:?} overlaps {:?}",
                        item.path, other
                    )));
                }
            }
            seen.push(&item.path);
        }
        Ok(())
    }
}

fn is_dir_prefix(parent: &str, child: &str) -> bool {
    Path::new(child).starts_with(Path::new(parent))
}

/// Validates a projected file path: relative, non-empty, no `..` anywhere.
pub fn check_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("must not be empty".to_string());
    }
    if path.starts_with("..") {
        return Err("must not start with '..'".to_string());
    }
    let as_path = Path::new(path);
    if as_path.is_absolute() {
        return Err("must be relative".to_string());
    }
    for component in as_path.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => return Err("must not contain '..'".to_string()),
            _ => return Err("must only contain plain path segments".to_string()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_binding_wire_shape() {
        let json = serde_json::to_value(EnvBinding::key("FOO", "cfg1", "k1")).unwrap();
        assert_eq!(json["type"], "key");
        assert_eq!(json["envName"], "FOO");
        assert_eq!(json["selector"]["name"], "cfg1");

        let import: EnvBinding =
            serde_json::from_str(r#"{"type":"import","resourceName":"cfg1"}"#).unwrap();
        assert_eq!(import, EnvBinding::import("cfg1"));
    }

    #[test]
    fn test_env_binding_validation() {
        assert!(EnvBinding::key("FOO", "cfg1", "k1").validate().is_ok());
        assert!(EnvBinding::key("", "cfg1", "k1").validate().is_err());
        assert!(EnvBinding::key("A=B", "cfg1", "k1").validate().is_err());
        assert!(EnvBinding::import("").validate().is_err());
    }

    #[test]
    fn test_relative_paths() {
        assert!(check_relative_path("etc/k1").is_ok());
        assert!(check_relative_path("k1").is_ok());
        assert!(check_relative_path("").is_err());
        assert!(check_relative_path("/etc/k1").is_err());
        assert!(check_relative_path("..data").is_err());
        assert!(check_relative_path("a/../b").is_err());
        assert!(check_relative_path("./a").is_err());
    }

    #[test]
    fn test_volume_paths_must_not_overlap() {
        let ok = VolumeBinding::new("v", "/mnt")
            .with_item("etc/k1", "cfg1", "k1")
            .with_item("etc/k2", "cfg1", "k2");
        assert!(ok.validate().is_ok());
        assert_eq!(ok.resource_names().len(), 1);

        let dup = VolumeBinding::new("v", "/mnt")
            .with_item("k1", "cfg1", "k1")
            .with_item("k1", "cfg2", "k1");
        assert!(dup.validate().is_err());

        let nested = VolumeBinding::new("v", "/mnt")
            .with_item("etc", "cfg1", "k1")
            .with_item("etc/k2", "cfg1", "k2");
        assert!(nested.validate().is_err());

        // "etc" is not a directory prefix of "etcd".
        let siblings = VolumeBinding::new("v", "/mnt")
            .with_item("etc", "cfg1", "k1")
            .with_item("etcd", "cfg1", "k2");
        assert!(siblings.validate().is_ok());
    }
}
