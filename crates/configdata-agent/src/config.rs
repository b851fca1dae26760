//! Agent configuration.
//!
//! Read from a JSON file; every field is optional. Two environment
//! variables override the file: `CONFIGDATA_NAMESPACE` and
//! `CONFIGDATA_POLL_INTERVAL_MS`.

use crate::agent::{SyncSettings, SyncTrigger};
use crate::error::AgentError;
use crate::flags::RuntimeCliConfig;
use configdata_registry::{RegistryConfig, NAMESPACE_DEFAULT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const ENV_NAMESPACE: &str = "CONFIGDATA_NAMESPACE";
pub const ENV_POLL_INTERVAL_MS: &str = "CONFIGDATA_POLL_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    pub namespace: String,
    pub trigger: SyncTrigger,
    pub poll_interval_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub registry: RegistryConfig,
    pub runtime: RuntimeCliConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            namespace: NAMESPACE_DEFAULT.to_string(),
            trigger: SyncTrigger::Both,
            poll_interval_ms: 10_000,
            backoff_base_ms: 200,
            backoff_max_ms: 30_000,
            registry: RegistryConfig::default(),
            runtime: RuntimeCliConfig::default(),
        }
    }
}

impl AgentConfig {
    /// Loads `path`, then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AgentError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config = Self::from_json(&raw)?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self, AgentError> {
        serde_json::from_str(raw).map_err(|e| AgentError::Config(e.to_string()))
    }

    /// Applies overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), AgentError> {
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.namespace = namespace;
        }
        if let Some(interval) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = interval
                .trim()
                .parse()
                .map_err(|e| AgentError::Config(format!("{ENV_POLL_INTERVAL_MS}={interval:?}: {e}")))?;
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            trigger: self.trigger,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = AgentConfig::from_json(
            r#"{"trigger": "poll", "registry": {"watchHistory": 16}, "runtime": {"debug": true}}"#,
        )
        .unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(config.trigger, SyncTrigger::Poll);
        assert_eq!(config.registry.watch_history, 16);
        assert_eq!(config.registry.channel_capacity, 100);
        assert!(config.runtime.debug);
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            (ENV_NAMESPACE, "prod".to_string()),
            (ENV_POLL_INTERVAL_MS, "250".to_string()),
        ]);
        let mut config = AgentConfig::default();
        config.apply_overrides(|k| env.get(k).cloned()).unwrap();
        assert_eq!(config.namespace, "prod");
        assert_eq!(config.sync_settings().poll_interval, Duration::from_millis(250));

        let bad = HashMap::from([(ENV_POLL_INTERVAL_MS, "soon".to_string())]);
        let err = config.apply_overrides(|k| bad.get(k).cloned()).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AgentConfig::load("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }
}
