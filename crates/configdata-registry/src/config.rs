//! Registry tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Capacity of the request channel between clients and the server.
    pub channel_capacity: usize,
    /// Number of store events retained for watch replay.
    pub watch_history: usize,
    /// Live events buffered per watcher before it is told to resync.
    pub watch_channel_capacity: usize,
    /// Let updates overwrite regardless of the caller's `resourceVersion`.
    pub allow_unconditional_update: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 100,
            watch_history: 1024,
            watch_channel_capacity: 256,
            allow_unconditional_update: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: RegistryConfig =
            serde_json::from_str(r#"{"allowUnconditionalUpdate": true}"#).unwrap();
        assert!(config.allow_unconditional_update);
        assert_eq!(config.watch_history, 1024);
        assert_eq!(config.channel_capacity, 100);
    }
}
