//! # Merge Resolver
//!
//! Turns a consumer's ordered [`EnvBinding`] list into the environment it is
//! started with. Bindings apply in declaration order on top of the base
//! environment, and a later binding overwrites an earlier one with the same
//! variable name. A binding whose resource or key is absent is skipped and
//! reported; the rest still apply.
//!
//! Resolution happens once, when the consumer is instantiated.

use crate::binding::EnvBinding;
use crate::error::{AgentError, MissingPart, MissingReference};
use configdata_registry::{ConfigDatas, ConfigResource, ConfigSelector};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Resources by name, as read at one moment.
pub type Snapshot = BTreeMap<String, ConfigResource>;

/// The final environment plus every binding that could not be satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvResolution {
    pub env: BTreeMap<String, String>,
    pub missing: Vec<MissingReference>,
}

impl EnvResolution {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// The first missing reference as an error, if any.
    pub fn first_error(&self) -> Option<AgentError> {
        self.missing.first().cloned().map(AgentError::MissingReference)
    }

    /// `NAME=value` pairs in name order.
    pub fn to_env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// Applies `bindings` to `base` using only the resources in `snapshot`.
pub fn resolve_env(
    base: &BTreeMap<String, String>,
    bindings: &[EnvBinding],
    snapshot: &Snapshot,
) -> EnvResolution {
    let mut resolution = EnvResolution {
        env: base.clone(),
        missing: Vec::new(),
    };

    for binding in bindings {
        match binding {
            EnvBinding::Key { env_name, selector } => {
                let Some(resource) = snapshot.get(&selector.name) else {
                    resolution.missing.push(MissingReference {
                        selector: selector.clone(),
                        missing: MissingPart::Resource,
                    });
                    continue;
                };
                match resource.value(&selector.key) {
                    Some(value) => {
                        resolution.env.insert(env_name.clone(), value.to_string());
                    }
                    None => resolution.missing.push(MissingReference {
                        selector: selector.clone(),
                        missing: MissingPart::Key,
                    }),
                }
            }
            EnvBinding::Import {
                resource_name,
                prefix,
            } => {
                let Some(resource) = snapshot.get(resource_name) else {
                    resolution.missing.push(MissingReference {
                        selector: ConfigSelector::new(resource_name.clone(), ""),
                        missing: MissingPart::Resource,
                    });
                    continue;
                };
                let prefix = prefix.as_deref().unwrap_or("");
                for (key, value) in &resource.data {
                    resolution.env.insert(format!("{prefix}{key}"), value.clone());
                }
            }
        }
    }

    resolution
}

/// Reads each referenced resource once through `configs`, then resolves.
///
/// A resource that is not found only affects its own bindings. Any other
/// registry failure aborts the whole resolution.
pub async fn resolve(
    configs: &ConfigDatas,
    base: &BTreeMap<String, String>,
    bindings: &[EnvBinding],
) -> Result<EnvResolution, AgentError> {
    for binding in bindings {
        binding.validate()?;
    }

    let mut snapshot = Snapshot::new();
    let mut absent = Vec::new();
    for binding in bindings {
        let name = binding.resource_name();
        if snapshot.contains_key(name) || absent.iter().any(|n: &String| n == name) {
            continue;
        }
        match configs.get(name).await {
            Ok(resource) => {
                snapshot.insert(name.to_string(), resource);
            }
            Err(e) if e.is_not_found() => absent.push(name.to_string()),
            Err(e) => return Err(e.into()),
        }
    }

    let resolution = resolve_env(base, bindings, &snapshot);
    for missing in &resolution.missing {
        warn!(%missing, "Environment binding unresolved");
    }
    debug!(
        variables = resolution.env.len(),
        missing = resolution.missing.len(),
        "Environment resolved"
    );
    Ok(resolution)
}
