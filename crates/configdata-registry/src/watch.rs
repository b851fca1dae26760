//! # Watch Streams
//!
//! A [`WatchStream`] is one subscriber connection. It moves through
//! `Connecting → Streaming → Closed`:
//!
//! - **Connecting**: the subscription exists but nothing was read yet.
//! - **Streaming**: replayed backlog first, then live events, strictly in
//!   increasing `resourceVersion` order.
//! - **Closed**: the caller closed it, the store went away, or the stream
//!   reported `ResyncRequired` (start point compacted or subscriber lagged).
//!
//! Events whose version is not greater than the last delivered one are
//! dropped, so replaying a version is a no-op inside one connection.

use crate::adapter::decode_event;
use crate::error::RegistryError;
use crate::model::ConfigResource;
use crate::selection::{Matcher, SelectionPredicate};
use crate::store::{StoreEvent, StoreEventKind, StoreSubscription};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// One change notification.
///
/// Serializes as `{"type": "ADDED", "object": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchEvent {
    Added(ConfigResource),
    Modified(ConfigResource),
    Deleted(ConfigResource),
}

impl WatchEvent {
    pub fn object(&self) -> &ConfigResource {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }

    pub fn into_object(self) -> ConfigResource {
        match self {
            Self::Added(o) | Self::Modified(o) | Self::Deleted(o) => o,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added(_) => "ADDED",
            Self::Modified(_) => "MODIFIED",
            Self::Deleted(_) => "DELETED",
        }
    }

    /// The object's `resourceVersion` as a number; 0 if it is not numeric.
    pub fn revision(&self) -> u64 {
        self.object().resource_version().parse().unwrap_or(0)
    }

    fn from_store(event: &StoreEvent) -> Result<Self, RegistryError> {
        let object = decode_event(event)?;
        Ok(match event.kind {
            StoreEventKind::Created => Self::Added(object),
            StoreEventKind::Updated => Self::Modified(object),
            StoreEventKind::Deleted => Self::Deleted(object),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Connecting,
    Streaming,
    Closed,
}

enum Source {
    Store {
        prefix: String,
        backlog: VecDeque<StoreEvent>,
        live: broadcast::Receiver<StoreEvent>,
    },
    Static(VecDeque<Result<WatchEvent, RegistryError>>),
    Done,
}

/// A single ordered watch connection.
pub struct WatchStream {
    state: WatchState,
    source: Source,
    predicate: SelectionPredicate,
    last_revision: u64,
}

impl fmt::Debug for WatchStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchStream")
            .field("state", &self.state)
            .field("last_revision", &self.last_revision)
            .finish_non_exhaustive()
    }
}

impl WatchStream {
    /// Wraps a store subscription. `after` is the last version the caller
    /// already has; nothing at or below it is delivered.
    pub(crate) fn from_subscription(
        subscription: StoreSubscription,
        predicate: SelectionPredicate,
        after: u64,
    ) -> Self {
        Self {
            state: WatchState::Connecting,
            source: Source::Store {
                prefix: subscription.prefix,
                backlog: subscription.backlog.into(),
                live: subscription.live,
            },
            predicate,
            last_revision: after,
        }
    }

    /// A finite stream over fixed events, for fakes and tests.
    pub fn from_events(events: Vec<WatchEvent>) -> Self {
        Self {
            state: WatchState::Connecting,
            source: Source::Static(events.into_iter().map(Ok).collect()),
            predicate: SelectionPredicate::everything(),
            last_revision: 0,
        }
    }

    /// A stream whose only item is `err`.
    pub fn from_error(err: RegistryError) -> Self {
        Self {
            state: WatchState::Connecting,
            source: Source::Static(VecDeque::from([Err(err)])),
            predicate: SelectionPredicate::everything(),
            last_revision: 0,
        }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Version of the last event handed out (or the start version).
    pub fn last_revision(&self) -> u64 {
        self.last_revision
    }

    /// Closes the connection and releases the subscription immediately.
    pub fn close(&mut self) {
        self.source = Source::Done;
        self.state = WatchState::Closed;
    }

    fn finish(&mut self, item: Result<WatchEvent, RegistryError>) -> Option<Result<WatchEvent, RegistryError>> {
        self.close();
        Some(item)
    }

    /// Waits for the next event. Returns `None` once the stream is closed.
    ///
    /// A `ResyncRequired` error is always the last item.
    pub async fn next(&mut self) -> Option<Result<WatchEvent, RegistryError>> {
        if self.state == WatchState::Closed {
            return None;
        }
        self.state = WatchState::Streaming;

        loop {
            let store_event = match &mut self.source {
                Source::Done => {
                    self.state = WatchState::Closed;
                    return None;
                }
                Source::Static(items) => match items.pop_front() {
                    Some(Err(e @ RegistryError::ResyncRequired { .. })) => return self.finish(Err(e)),
                    Some(item) => return Some(item),
                    None => {
                        self.close();
                        return None;
                    }
                },
                Source::Store {
                    prefix,
                    backlog,
                    live,
                } => {
                    if let Some(event) = backlog.pop_front() {
                        event
                    } else {
                        match live.recv().await {
                            Ok(event) if event.key.starts_with(prefix.as_str()) => event,
                            Ok(_) => continue,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(
                                    last_revision = self.last_revision,
                                    skipped, "Watch subscriber fell behind"
                                );
                                let err = RegistryError::ResyncRequired {
                                    requested: self.last_revision,
                                    oldest: self.last_revision + skipped + 1,
                                };
                                return self.finish(Err(err));
                            }
                            Err(RecvError::Closed) => {
                                debug!(last_revision = self.last_revision, "Watch source closed");
                                self.close();
                                return None;
                            }
                        }
                    }
                }
            };

            if store_event.revision <= self.last_revision {
                continue;
            }
            self.last_revision = store_event.revision;

            let event = match WatchEvent::from_store(&store_event) {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };
            if self.predicate.matches(event.object()) {
                return Some(Ok(event));
            }
        }
    }
}
