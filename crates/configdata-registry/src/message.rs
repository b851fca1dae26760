//! # Registry Messages
//!
//! The request envelope carried from [`ConfigDataClient`](crate::ConfigDataClient)
//! to [`RegistryServer`](crate::RegistryServer). Each variant is one verb of
//! the namespaced collection endpoint and carries a oneshot channel for the
//! reply, so the client awaits exactly one answer per request.

use crate::error::RegistryError;
use crate::model::{ConfigResource, ConfigResourceList, ListOptions};
use crate::watch::WatchStream;
use tokio::sync::oneshot;

/// One-shot reply channel.
pub type Response<T> = oneshot::Sender<Result<T, RegistryError>>;

#[derive(Debug)]
pub enum RegistryRequest {
    Get {
        namespace: String,
        name: String,
        respond_to: Response<ConfigResource>,
    },
    List {
        namespace: String,
        options: ListOptions,
        respond_to: Response<ConfigResourceList>,
    },
    Create {
        namespace: String,
        resource: ConfigResource,
        respond_to: Response<ConfigResource>,
    },
    Update {
        namespace: String,
        resource: ConfigResource,
        respond_to: Response<ConfigResource>,
    },
    Delete {
        namespace: String,
        name: String,
        respond_to: Response<ConfigResource>,
    },
    Watch {
        namespace: String,
        options: ListOptions,
        respond_to: Response<WatchStream>,
    },
}

impl RegistryRequest {
    /// Verb name used in logs and recorded mock actions.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::List { .. } => "list",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Watch { .. } => "watch",
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Get { namespace, .. }
            | Self::List { namespace, .. }
            | Self::Create { namespace, .. }
            | Self::Update { namespace, .. }
            | Self::Delete { namespace, .. }
            | Self::Watch { namespace, .. } => namespace,
        }
    }
}
