//! # Projection Sync Agent
//!
//! Keeps one mount directory in line with the resources its
//! [`VolumeBinding`] references.
//!
//! Each sync reads every referenced resource and builds the desired tree. If
//! every resource version matches what was last applied, nothing else happens.
//! Otherwise the tree is published through the [`AtomicWriter`]. A resource or
//! key that has gone missing keeps its previously projected content and is
//! reported as a warning.
//!
//! [`setup`](ProjectionSyncAgent::setup) is the first sync and is strict: any
//! missing reference fails it and nothing is written.
//!
//! Syncs of one agent never overlap; they are serialized on an async mutex.
//! Agents share no state with each other.

use crate::binding::VolumeBinding;
use crate::error::{AgentError, MissingPart, MissingReference};
use crate::projection::{AtomicWriter, Payload};
use configdata_registry::{ConfigDatas, ConfigResource, ListOptions, RegistryError, WatchStream};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

/// What wakes the run loop up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Poll,
    Watch,
    #[default]
    Both,
}

impl SyncTrigger {
    pub fn polls(self) -> bool {
        matches!(self, Self::Poll | Self::Both)
    }

    pub fn watches(self) -> bool {
        matches!(self, Self::Watch | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub trigger: SyncTrigger,
    pub poll_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            trigger: SyncTrigger::Both,
            poll_interval: Duration::from_secs(10),
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Exponential delay between retries of a failing sync.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// Delay before the next attempt: base, 2×base, 4×base… capped at max.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every referenced version was already applied.
    Unchanged,
    /// Versions moved but the resulting tree is identical.
    ContentUnchanged,
    /// A new tree was published.
    Written,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    /// References that were absent; their paths kept stale content.
    pub missing: Vec<MissingReference>,
}

#[derive(Debug, Default)]
struct SyncState {
    /// Resource name → resourceVersion last applied.
    applied: BTreeMap<String, String>,
    projected: Payload,
    /// References absent at the last sync; still stale until they return.
    missing: Vec<MissingReference>,
    initialized: bool,
}

pub struct ProjectionSyncAgent {
    configs: ConfigDatas,
    volume: VolumeBinding,
    writer: AtomicWriter,
    state: Mutex<SyncState>,
}

impl std::fmt::Debug for ProjectionSyncAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionSyncAgent")
            .field("volume", &self.volume().name)
            .field("mount", &self.volume().mount_path)
            .finish()
    }
}

impl ProjectionSyncAgent {
    pub fn new(configs: ConfigDatas, volume: VolumeBinding) -> Result<Self, AgentError> {
        volume.validate()?;
        let writer = AtomicWriter::new(volume.mount_path.clone());
        Ok(Self {
            configs,
            volume,
            writer,
            state: Mutex::new(SyncState::default()),
        })
    }

    pub fn volume(&self) -> &VolumeBinding {
        &self.volume
    }

    pub fn writer(&self) -> &AtomicWriter {
        &self.writer
    }

    /// Versions applied by the last successful sync.
    pub async fn applied_versions(&self) -> BTreeMap<String, String> {
        self.state.lock().await.applied.clone()
    }

    /// Content the mount currently shows.
    pub async fn projected(&self) -> Payload {
        self.state.lock().await.projected.clone()
    }

    fn mount(&self) -> String {
        self.volume.mount_path.display().to_string()
    }

    /// Reads every referenced resource. Absent ones map to `None`.
    async fn fetch(&self) -> Result<BTreeMap<String, Option<ConfigResource>>, AgentError> {
        let mut resources = BTreeMap::new();
        for name in self.volume.resource_names() {
            let resource = match self.configs.get(&name).await {
                Ok(resource) => Some(resource),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e.into()),
            };
            resources.insert(name, resource);
        }
        Ok(resources)
    }

    /// Builds the desired tree, falling back to `previous` for absent data.
    fn desired(
        &self,
        resources: &BTreeMap<String, Option<ConfigResource>>,
        previous: &Payload,
    ) -> (Payload, Vec<MissingReference>) {
        let mut payload = Payload::new();
        let mut missing = Vec::new();
        for item in &self.volume.items {
            let selector = &item.selector;
            let value = match resources.get(&selector.name).and_then(Option::as_ref) {
                None => Err(MissingPart::Resource),
                Some(resource) => resource.value(&selector.key).ok_or(MissingPart::Key),
            };
            match value {
                Ok(value) => {
                    payload.insert(item.path.clone(), value.to_string());
                }
                Err(part) => {
                    missing.push(MissingReference {
                        selector: selector.clone(),
                        missing: part,
                    });
                    if let Some(stale) = previous.get(&item.path) {
                        payload.insert(item.path.clone(), stale.clone());
                    }
                }
            }
        }
        (payload, missing)
    }

    /// First sync. Blocks until the tree is published or fails if any
    /// reference is missing.
    pub async fn setup(&self) -> Result<SyncReport, AgentError> {
        let mut state = self.state.lock().await;
        let resources = self.fetch().await?;
        let (payload, missing) = self.desired(&resources, &Payload::new());
        if let Some(first) = missing.first() {
            error!(mount = %self.mount(), %first, "Setup failed");
            return Err(AgentError::SetupFailed {
                mount: self.mount(),
                reason: first.to_string(),
            });
        }

        self.writer.write(&payload)?;
        state.applied = versions(&resources);
        state.projected = payload;
        state.missing.clear();
        state.initialized = true;
        info!(mount = %self.mount(), files = state.projected.len(), "Volume set up");
        Ok(SyncReport {
            outcome: SyncOutcome::Written,
            missing,
        })
    }

    /// One steady-state sync.
    pub async fn sync(&self) -> Result<SyncReport, AgentError> {
        let mut state = self.state.lock().await;
        let resources = self.fetch().await?;
        let current = versions(&resources);

        if state.initialized && current == state.applied {
            debug!(mount = %self.mount(), "Sync skipped, versions unchanged");
            for reference in &state.missing {
                warn!(mount = %self.mount(), missing = %reference, "Keeping stale content");
            }
            return Ok(SyncReport {
                outcome: SyncOutcome::Unchanged,
                missing: state.missing.clone(),
            });
        }

        let (payload, missing) = self.desired(&resources, &state.projected);
        for reference in &missing {
            warn!(mount = %self.mount(), missing = %reference, "Keeping stale content");
        }

        let outcome = if state.initialized && payload == state.projected {
            SyncOutcome::ContentUnchanged
        } else {
            self.writer.write(&payload)?;
            info!(mount = %self.mount(), files = payload.len(), "Volume updated");
            SyncOutcome::Written
        };

        state.applied = current;
        state.projected = payload;
        state.missing.clone_from(&missing);
        state.initialized = true;
        Ok(SyncReport { outcome, missing })
    }

    /// Syncs until it succeeds, backing off on transient failures.
    /// Returns `false` if shutdown was requested while waiting.
    async fn sync_with_retry(&self, backoff: &mut Backoff, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            match self.sync().await {
                Ok(_) => {
                    backoff.reset();
                    return true;
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!(mount = %self.mount(), error = %e, ?delay, "Sync failed, retrying");
                    tokio::select! {
                        _ = shutdown.changed() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    error!(mount = %self.mount(), error = %e, "Sync failed");
                    return true;
                }
            }
        }
    }

    /// Opens a watch. Without a resume point the namespace is listed first so
    /// nothing between the list and the watch is missed.
    async fn open_watch(&self, resume_from: Option<u64>) -> Result<WatchStream, RegistryError> {
        let from = match resume_from {
            Some(version) => version.to_string(),
            None => self.configs.list(ListOptions::everything()).await?.resource_version,
        };
        debug!(mount = %self.mount(), %from, "Opening watch");
        self.configs
            .watch(ListOptions::everything().from_version(from))
            .await
    }

    fn references(&self, name: &str) -> bool {
        self.volume.items.iter().any(|i| i.selector.name == name)
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, settings: SyncSettings, mut shutdown: watch::Receiver<bool>) {
        info!(mount = %self.mount(), trigger = ?settings.trigger, "Sync agent started");
        let mut backoff = Backoff::new(settings.backoff_base, settings.backoff_max);
        let mut interval = tokio::time::interval(settings.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        let mut stream: Option<WatchStream> = None;
        let mut resume_from: Option<u64> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            if settings.trigger.watches() && stream.is_none() {
                let relist = resume_from.is_none();
                match self.open_watch(resume_from).await {
                    Ok(opened) => {
                        stream = Some(opened);
                        backoff.reset();
                        // A relist may hide changes made while disconnected.
                        if relist && !self.sync_with_retry(&mut backoff, &mut shutdown).await {
                            break;
                        }
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(mount = %self.mount(), error = %e, ?delay, "Watch unavailable");
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            _ = tokio::time::sleep(delay) => continue,
                        }
                    }
                }
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick(), if settings.trigger.polls() => {}
                event = next_event(&mut stream) => match event {
                    Some(Ok(event)) => {
                        resume_from = Some(event.revision());
                        if !self.references(event.object().name()) {
                            continue;
                        }
                        debug!(mount = %self.mount(), kind = event.kind(), name = event.object().name(), "Change observed");
                    }
                    Some(Err(RegistryError::ResyncRequired { requested, oldest })) => {
                        warn!(mount = %self.mount(), requested, oldest, "Watch requires resync");
                        stream = None;
                        resume_from = None;
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(mount = %self.mount(), error = %e, "Watch error");
                        continue;
                    }
                    None => {
                        debug!(mount = %self.mount(), "Watch ended, reconnecting");
                        stream = None;
                        continue;
                    }
                },
            }

            if !self.sync_with_retry(&mut backoff, &mut shutdown).await {
                break;
            }
        }

        if let Some(mut stream) = stream {
            stream.close();
        }
        info!(mount = %self.mount(), "Sync agent stopped");
    }
}

/// Next watch item, or never if there is no stream.
async fn next_event(
    stream: &mut Option<WatchStream>,
) -> Option<Result<configdata_registry::WatchEvent, RegistryError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn versions(resources: &BTreeMap<String, Option<ConfigResource>>) -> BTreeMap<String, String> {
    resources
        .iter()
        .filter_map(|(name, r)| r.as_ref().map(|r| (name.clone(), r.resource_version().to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use configdata_registry::mock::{create_mock_client, expect_get, expect_list, expect_watch, MockClient};
    use configdata_registry::ConfigResourceList;
    use tempfile::TempDir;

    fn stored(name: &str, version: &str, entries: &[(&str, &str)]) -> ConfigResource {
        let mut resource = ConfigResource::new("default", name);
        for (k, v) in entries {
            resource = resource.with_entry(*k, *v);
        }
        resource.metadata.resource_version = version.to_string();
        resource
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        assert_eq!(backoff.next_delay(), Duration::from_millis(350));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_trigger_parsing() {
        let trigger: SyncTrigger = serde_json::from_str("\"watch\"").unwrap();
        assert!(trigger.watches());
        assert!(!trigger.polls());
        assert!(SyncTrigger::default().polls());
    }

    #[tokio::test]
    async fn test_setup_fails_fast_on_missing_resource() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockClient::new();
        mock.expect_get("cfg1")
            .return_err(RegistryError::not_found("default", "cfg1"));

        let volume = VolumeBinding::new("v", dir.path().join("mnt")).with_item("etc/k1", "cfg1", "k1");
        let agent = ProjectionSyncAgent::new(mock.client().config_datas("default"), volume).unwrap();

        let err = agent.setup().await.unwrap_err();
        assert!(matches!(err, AgentError::SetupFailed { .. }));
        assert!(!dir.path().join("mnt").exists());
        mock.verify();
    }

    #[tokio::test]
    async fn test_transient_error_is_not_stale_retain() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockClient::new();
        mock.expect_get("cfg1")
            .return_ok(stored("cfg1", "1", &[("k1", "v1")]));
        mock.expect_get("cfg1")
            .return_err(RegistryError::Unavailable("down".into()));

        let volume = VolumeBinding::new("v", dir.path()).with_item("k1", "cfg1", "k1");
        let agent = ProjectionSyncAgent::new(mock.client().config_datas("default"), volume).unwrap();
        agent.setup().await.unwrap();

        let err = agent.sync().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(std::fs::read_to_string(dir.path().join("k1")).unwrap(), "v1");
        mock.verify();
    }

    #[tokio::test]
    async fn test_missing_key_keeps_stale_file() {
        let dir = TempDir::new().unwrap();
        let mut mock = MockClient::new();
        mock.expect_get("cfg1")
            .return_ok(stored("cfg1", "1", &[("k1", "v1"), ("k2", "v2")]));
        mock.expect_get("cfg1")
            .return_ok(stored("cfg1", "2", &[("k2", "new")]));

        let volume = VolumeBinding::new("v", dir.path())
            .with_item("k1", "cfg1", "k1")
            .with_item("k2", "cfg1", "k2");
        let agent = ProjectionSyncAgent::new(mock.client().config_datas("default"), volume).unwrap();
        agent.setup().await.unwrap();

        let report = agent.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::Written);
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].missing, MissingPart::Key);
        assert_eq!(std::fs::read_to_string(dir.path().join("k1")).unwrap(), "v1");
        assert_eq!(std::fs::read_to_string(dir.path().join("k2")).unwrap(), "new");
        assert_eq!(agent.applied_versions().await["cfg1"], "2");
    }

    #[tokio::test]
    async fn test_run_relists_after_resync_required() {
        let dir = TempDir::new().unwrap();
        let (client, mut requests) = create_mock_client(10);
        let volume = VolumeBinding::new("v", dir.path().join("mnt")).with_item("k1", "cfg1", "k1");
        let agent = Arc::new(
            ProjectionSyncAgent::new(client.config_datas("default"), volume).unwrap(),
        );

        let setup = tokio::spawn({
            let agent = agent.clone();
            async move { agent.setup().await }
        });
        let (_, name, reply) = expect_get(&mut requests).await.expect("setup get");
        assert_eq!(name, "cfg1");
        reply.send(Ok(stored("cfg1", "1", &[("k1", "v1")]))).unwrap();
        setup.await.unwrap().unwrap();

        let (stop, shutdown) = watch::channel(false);
        let settings = SyncSettings {
            trigger: SyncTrigger::Watch,
            poll_interval: Duration::from_secs(3600),
            backoff_base: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
        };
        let handle = tokio::spawn(agent.clone().run(settings, shutdown));

        // First connection: list, then a watch that has already fallen behind.
        let (_, _, reply) = expect_list(&mut requests).await.expect("first list");
        reply
            .send(Ok(ConfigResourceList {
                resource_version: "1".into(),
                items: vec![stored("cfg1", "1", &[("k1", "v1")])],
            }))
            .unwrap();
        let (_, options, reply) = expect_watch(&mut requests).await.expect("first watch");
        assert_eq!(options.resource_version.as_deref(), Some("1"));
        reply
            .send(Ok(WatchStream::from_error(RegistryError::ResyncRequired {
                requested: 1,
                oldest: 3,
            })))
            .unwrap();
        let (_, _, reply) = expect_get(&mut requests).await.expect("sync after first list");
        reply.send(Ok(stored("cfg1", "1", &[("k1", "v1")]))).unwrap();

        // The resync drops the resume point and lists again.
        let (_, _, reply) = expect_list(&mut requests).await.expect("relist");
        reply
            .send(Ok(ConfigResourceList {
                resource_version: "3".into(),
                items: vec![stored("cfg1", "3", &[("k1", "v2")])],
            }))
            .unwrap();
        let (_, options, reply) = expect_watch(&mut requests).await.expect("second watch");
        assert_eq!(options.resource_version.as_deref(), Some("3"));
        reply.send(Ok(WatchStream::from_events(Vec::new()))).unwrap();
        let (_, _, reply) = expect_get(&mut requests).await.expect("sync after relist");
        reply.send(Ok(stored("cfg1", "3", &[("k1", "v2")]))).unwrap();

        // The empty stream ends and the loop lists once more; the sync is done.
        let (_, _, pending) = expect_list(&mut requests).await.expect("reconnect");
        assert_eq!(std::fs::read_to_string(dir.path().join("mnt/k1")).unwrap(), "v2");
        assert_eq!(agent.applied_versions().await["cfg1"], "3");

        stop.send(true).unwrap();
        drop(pending);
        drop(requests);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("agent did not stop")
            .unwrap();
    }
}
