//! # Agent Errors

use configdata_registry::{ConfigSelector, RegistryError};
use std::path::PathBuf;

/// Filesystem failures while publishing a projection.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("invalid projection path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProjectionError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

/// A selector whose resource or key was absent when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingReference {
    pub selector: ConfigSelector,
    /// Which part was absent.
    pub missing: MissingPart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPart {
    Resource,
    Key,
}

impl std::fmt::Display for MissingReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.missing {
            MissingPart::Resource => write!(f, "configresource {:?} not found", self.selector.name),
            MissingPart::Key => write!(
                f,
                "key {:?} not found in configresource {:?}",
                self.selector.key, self.selector.name
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("missing config reference: {0}")]
    MissingReference(MissingReference),

    #[error("setup of mount {mount} failed: {reason}")]
    SetupFailed { mount: String, reason: String },

    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("command {program} failed: {reason}")]
    Command { program: String, reason: String },
}

impl AgentError {
    /// Errors a sync loop should back off from and try again.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Registry(e) => e.is_retryable() || matches!(e, RegistryError::ResyncRequired { .. }),
            Self::Projection(ProjectionError::Io { .. }) => true,
            _ => false,
        }
    }
}
