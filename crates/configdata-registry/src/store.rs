//! # Keyed Store
//!
//! The registry persists objects through the [`KeyedStore`] capability: an
//! opaque key/value store with a single monotonic revision counter shared by
//! every key. Each mutation bumps the counter and appends one event to the
//! store's ordered log, which watchers read by key prefix.
//!
//! [`MemoryStore`] is the in-process implementation. It keeps a bounded event
//! history; watching from a revision older than the history yields
//! [`StoreError::Compacted`].

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Errors reported by a keyed store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("key already exists: {0}")]
    KeyExists(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("version mismatch on {key}: expected {expected}, current {current}")]
    VersionMismatch {
        key: String,
        expected: u64,
        current: u64,
    },

    #[error("revision {requested} has been compacted (oldest retained {oldest})")]
    Compacted { requested: u64, oldest: u64 },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("backend failure: {0}")]
    Backend(String),
}

/// A value together with the revision of its last mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    Created,
    Updated,
    Deleted,
}

/// One entry of the store's ordered mutation log.
///
/// For deletions `value` holds the last stored bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub key: String,
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Snapshot of a prefix scan.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub entries: Vec<(String, Versioned)>,
    pub revision: u64,
}

/// The events a new watcher must see: the retained backlog after its start
/// revision, followed by everything arriving on `live`.
///
/// `live` may also carry events already present in `backlog` or outside the
/// prefix; consumers filter by prefix and revision.
#[derive(Debug)]
pub struct StoreSubscription {
    pub prefix: String,
    pub backlog: Vec<StoreEvent>,
    pub live: broadcast::Receiver<StoreEvent>,
}

/// Opaque keyed storage with optimistic concurrency.
///
/// Implementations must assign strictly increasing revisions across all keys
/// and deliver events to subscribers in revision order.
#[async_trait]
pub trait KeyedStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Inserts a new key. Fails with `KeyExists` if present.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError>;

    /// Replaces an existing key. With `expected` set the write only succeeds
    /// if the stored revision still equals it.
    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<u64, StoreError>;

    /// Removes a key and returns the value it held plus the deletion revision.
    async fn delete(&self, key: &str) -> Result<Versioned, StoreError>;

    async fn list(&self, prefix: &str) -> Result<Listing, StoreError>;

    /// Subscribes to mutations under `prefix`. With `after` set, the backlog
    /// holds every retained event with a greater revision.
    async fn watch(&self, prefix: &str, after: Option<u64>)
        -> Result<StoreSubscription, StoreError>;

    fn current_revision(&self) -> u64;
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    revision: u64,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    revision: u64,
    history: VecDeque<StoreEvent>,
    compacted_through: u64,
}

/// In-memory [`KeyedStore`].
///
/// The mutex only guards the map and log for the duration of one mutation, so
/// callers never wait on each other across an await point.
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<StoreEvent>,
    history_limit: usize,
}

impl MemoryStore {
    /// Creates a store that retains `history_limit` events for watch replay
    /// and buffers `channel_capacity` live events per subscriber.
    pub fn new(history_limit: usize, channel_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            state: Mutex::new(State::default()),
            events,
            history_limit: history_limit.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves the map consistent: every
        // mutation is applied with a single insert/remove.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records an event and publishes it. Must be called with the lock held so
    /// that log order and delivery order agree.
    fn record(&self, state: &mut State, event: StoreEvent) {
        trace!(key = %event.key, revision = event.revision, kind = ?event.kind, "Store event");
        state.history.push_back(event.clone());
        while state.history.len() > self.history_limit {
            if let Some(dropped) = state.history.pop_front() {
                state.compacted_through = dropped.revision;
            }
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Lowest revision a watcher can still start from.
    pub fn oldest_watchable(&self) -> u64 {
        self.lock().compacted_through
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024, 256)
    }
}

#[async_trait]
impl KeyedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let state = self.lock();
        Ok(state.entries.get(key).map(|entry| Versioned {
            value: entry.value.clone(),
            revision: entry.revision,
        }))
    }

    async fn create(&self, key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let mut state = self.lock();
        if state.entries.contains_key(key) {
            return Err(StoreError::KeyExists(key.to_string()));
        }
        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                revision,
            },
        );
        self.record(
            &mut state,
            StoreEvent {
                kind: StoreEventKind::Created,
                key: key.to_string(),
                value,
                revision,
            },
        );
        debug!(key, revision, "Created key");
        Ok(revision)
    }

    async fn update(
        &self,
        key: &str,
        value: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let current = match state.entries.get(key) {
            Some(entry) => entry.revision,
            None => return Err(StoreError::KeyNotFound(key.to_string())),
        };
        if let Some(expected) = expected {
            if expected != current {
                return Err(StoreError::VersionMismatch {
                    key: key.to_string(),
                    expected,
                    current,
                });
            }
        }
        state.revision += 1;
        let revision = state.revision;
        state.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                revision,
            },
        );
        self.record(
            &mut state,
            StoreEvent {
                kind: StoreEventKind::Updated,
                key: key.to_string(),
                value,
                revision,
            },
        );
        debug!(key, revision, "Updated key");
        Ok(revision)
    }

    async fn delete(&self, key: &str) -> Result<Versioned, StoreError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .remove(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
        state.revision += 1;
        let revision = state.revision;
        self.record(
            &mut state,
            StoreEvent {
                kind: StoreEventKind::Deleted,
                key: key.to_string(),
                value: entry.value.clone(),
                revision,
            },
        );
        debug!(key, revision, "Deleted key");
        Ok(Versioned {
            value: entry.value,
            revision,
        })
    }

    async fn list(&self, prefix: &str) -> Result<Listing, StoreError> {
        let state = self.lock();
        let entries = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                (
                    key.clone(),
                    Versioned {
                        value: entry.value.clone(),
                        revision: entry.revision,
                    },
                )
            })
            .collect();
        Ok(Listing {
            entries,
            revision: state.revision,
        })
    }

    async fn watch(
        &self,
        prefix: &str,
        after: Option<u64>,
    ) -> Result<StoreSubscription, StoreError> {
        let state = self.lock();
        // Subscribing under the lock means no event can fall between the
        // backlog snapshot and the live receiver.
        let live = self.events.subscribe();
        let backlog = match after {
            Some(after) => {
                if after < state.compacted_through {
                    return Err(StoreError::Compacted {
                        requested: after,
                        oldest: state.compacted_through + 1,
                    });
                }
                state
                    .history
                    .iter()
                    .filter(|event| event.revision > after && event.key.starts_with(prefix))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };
        Ok(StoreSubscription {
            prefix: prefix.to_string(),
            backlog,
            live,
        })
    }

    fn current_revision(&self) -> u64 {
        self.lock().revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_revisions_are_global_and_increasing() {
        let store = MemoryStore::default();
        let a = store.create("/a", b"1".to_vec()).await.unwrap();
        let b = store.create("/b", b"1".to_vec()).await.unwrap();
        let a2 = store.update("/a", b"2".to_vec(), Some(a)).await.unwrap();
        assert_eq!((a, b, a2), (1, 2, 3));
        assert_eq!(store.current_revision(), 3);
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let store = MemoryStore::default();
        let rev = store.create("/a", b"1".to_vec()).await.unwrap();
        store.update("/a", b"2".to_vec(), Some(rev)).await.unwrap();

        let err = store.update("/a", b"3".to_vec(), Some(rev)).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionMismatch { current: 2, .. }));

        // Unconditional writes ignore the stored revision.
        assert_eq!(store.update("/a", b"3".to_vec(), None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_list_respects_prefix() {
        let store = MemoryStore::default();
        store.create("/x/ns1/a", vec![]).await.unwrap();
        store.create("/x/ns1/b", vec![]).await.unwrap();
        store.create("/x/ns2/a", vec![]).await.unwrap();

        let listing = store.list("/x/ns1/").await.unwrap();
        let keys: Vec<_> = listing.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["/x/ns1/a", "/x/ns1/b"]);
        assert_eq!(listing.revision, 3);
    }

    #[tokio::test]
    async fn test_watch_replays_backlog_then_compacts() {
        let store = MemoryStore::new(2, 16);
        for i in 0..4u8 {
            store.create(&format!("/k{i}"), vec![i]).await.unwrap();
        }

        let sub = store.watch("/", Some(2)).await.unwrap();
        let revisions: Vec<_> = sub.backlog.iter().map(|e| e.revision).collect();
        assert_eq!(revisions, vec![3, 4]);

        let err = store.watch("/", Some(0)).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Compacted {
                requested: 0,
                oldest: 3
            }
        );
    }

    #[tokio::test]
    async fn test_delete_reports_previous_value() {
        let store = MemoryStore::default();
        store.create("/a", b"gone".to_vec()).await.unwrap();
        let removed = store.delete("/a").await.unwrap();
        assert_eq!(removed.value, b"gone".to_vec());
        assert_eq!(removed.revision, 2);
        assert!(store.get("/a").await.unwrap().is_none());
        assert!(matches!(
            store.delete("/a").await,
            Err(StoreError::KeyNotFound(_))
        ));
    }
}
