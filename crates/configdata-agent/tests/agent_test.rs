use configdata_agent::consumer::{self, ConsumerSpec};
use configdata_agent::projection::DATA_DIR_LINK;
use configdata_agent::{
    AgentError, ConfigSystem, EnvBinding, MissingPart, ProjectionSyncAgent, SyncOutcome,
    SyncSettings, SyncTrigger, VolumeBinding,
};
use configdata_registry::{ConfigDatas, ConfigResource, RegistryConfig};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn system() -> (ConfigSystem, ConfigDatas) {
    let system = ConfigSystem::new(&RegistryConfig::default());
    let configs = system.config_datas("default");
    (system, configs)
}

fn settings(trigger: SyncTrigger, poll_ms: u64) -> SyncSettings {
    SyncSettings {
        trigger,
        poll_interval: Duration::from_millis(poll_ms),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
    }
}

/// Polls `path` until it holds `expected` or five seconds pass.
async fn wait_for_content(path: &Path, expected: &str) {
    let result = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if fs::read_to_string(path).ok().as_deref() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "{} never contained {expected:?} (has {:?})",
        path.display(),
        fs::read_to_string(path).ok()
    );
}

/// Create, read, lose a stale update, then project into a volume.
#[tokio::test]
async fn test_end_to_end_scenario() {
    let (_system, configs) = system();
    let mount = TempDir::new().unwrap();

    let created = configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
        .await
        .expect("create failed");
    assert_eq!(created.resource_version(), "1");

    let fetched = configs.get("cfg1").await.expect("get failed");
    assert_eq!(fetched.value("k1"), Some("v1"));
    assert_eq!(fetched.resource_version(), "1");

    let mut concurrent = fetched.clone();
    concurrent.metadata.labels.insert("touched".into(), "yes".into());
    assert_eq!(configs.update(concurrent).await.unwrap().resource_version(), "2");

    let err = configs.update(fetched).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    let volume = VolumeBinding::new("conf", mount.path()).with_item("etc/k1", "cfg1", "k1");
    let agent = ProjectionSyncAgent::new(configs.clone(), volume).unwrap();
    agent.setup().await.expect("setup failed");

    assert_eq!(fs::read_to_string(mount.path().join("etc/k1")).unwrap(), "v1");
    assert_eq!(agent.applied_versions().await["cfg1"], "2");
}

#[tokio::test]
async fn test_deleted_resource_keeps_stale_content() {
    let (_system, configs) = system();
    let mount = TempDir::new().unwrap();
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
        .await
        .unwrap();

    let volume = VolumeBinding::new("conf", mount.path()).with_item("etc/k1", "cfg1", "k1");
    let agent = ProjectionSyncAgent::new(configs.clone(), volume).unwrap();
    agent.setup().await.unwrap();

    configs.delete("cfg1").await.unwrap();
    let report = agent.sync().await.expect("steady-state sync must tolerate deletion");

    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].missing, MissingPart::Resource);
    assert_eq!(report.outcome, SyncOutcome::ContentUnchanged);
    assert_eq!(fs::read_to_string(mount.path().join("etc/k1")).unwrap(), "v1");

    // Nothing moved, but the file is still stale and still reported.
    let report = agent.sync().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Unchanged);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].selector.name, "cfg1");
    assert_eq!(fs::read_to_string(mount.path().join("etc/k1")).unwrap(), "v1");

    // Recreating the resource resumes normal projection.
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "back"))
        .await
        .unwrap();
    let report = agent.sync().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Written);
    assert!(report.missing.is_empty());
    assert_eq!(fs::read_to_string(mount.path().join("etc/k1")).unwrap(), "back");
}

#[tokio::test]
async fn test_unchanged_versions_do_not_touch_filesystem() {
    let (_system, configs) = system();
    let mount = TempDir::new().unwrap();
    configs
        .create(
            ConfigResource::new("default", "cfg1")
                .with_entry("k1", "v1")
                .with_entry("k2", "v2"),
        )
        .await
        .unwrap();

    let volume = VolumeBinding::new("conf", mount.path())
        .with_item("a/k1", "cfg1", "k1")
        .with_item("k2", "cfg1", "k2");
    let agent = ProjectionSyncAgent::new(configs.clone(), volume).unwrap();
    agent.setup().await.unwrap();
    let published = fs::read_link(mount.path().join(DATA_DIR_LINK)).unwrap();

    let report = agent.sync().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Unchanged);
    assert_eq!(fs::read_link(mount.path().join(DATA_DIR_LINK)).unwrap(), published);

    // A version bump that does not change the projected keys rewrites nothing.
    configs
        .update_with_retry("cfg1", 3, |r| {
            r.data.insert("unrelated".into(), "x".into());
        })
        .await
        .unwrap();
    let report = agent.sync().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::ContentUnchanged);
    assert_eq!(fs::read_link(mount.path().join(DATA_DIR_LINK)).unwrap(), published);

    configs
        .update_with_retry("cfg1", 3, |r| {
            r.data.insert("k1".into(), "changed".into());
        })
        .await
        .unwrap();
    let report = agent.sync().await.unwrap();
    assert_eq!(report.outcome, SyncOutcome::Written);
    assert_ne!(fs::read_link(mount.path().join(DATA_DIR_LINK)).unwrap(), published);
    assert_eq!(fs::read_to_string(mount.path().join("a/k1")).unwrap(), "changed");
    assert_eq!(fs::read_to_string(mount.path().join("k2")).unwrap(), "v2");
}

#[tokio::test]
async fn test_consumer_fails_fast_on_missing_volume_reference() {
    let (_system, configs) = system();
    let dir = TempDir::new().unwrap();
    let mount = dir.path().join("mnt");
    configs
        .create(ConfigResource::new("default", "present").with_entry("k1", "v1"))
        .await
        .unwrap();

    let spec = ConsumerSpec::new("web").with_volume(
        VolumeBinding::new("conf", &mount)
            .with_item("k1", "present", "k1")
            .with_item("k2", "absent", "k2"),
    );
    let err = consumer::start(configs.clone(), spec, &BTreeMap::new(), SyncSettings::default())
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::SetupFailed { .. }), "got {err}");
    assert!(!mount.exists());

    // A missing key is just as fatal at setup.
    let spec = ConsumerSpec::new("web")
        .with_volume(VolumeBinding::new("conf", &mount).with_item("k9", "present", "k9"));
    let err = consumer::start(configs, spec, &BTreeMap::new(), SyncSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SetupFailed { .. }), "got {err}");
}

#[tokio::test]
async fn test_consumer_environment_merge() {
    let (_system, configs) = system();
    configs
        .create(ConfigResource::new("default", "a").with_entry("FOO", "1").with_entry("ONLY_A", "a"))
        .await
        .unwrap();
    configs
        .create(ConfigResource::new("default", "b").with_entry("FOO", "2"))
        .await
        .unwrap();

    let base = BTreeMap::from([
        ("FOO".to_string(), "base".to_string()),
        ("HOME".to_string(), "/root".to_string()),
    ]);
    let spec = ConsumerSpec::new("web")
        .with_env(EnvBinding::import("a"))
        .with_env(EnvBinding::import("b"))
        .with_env(EnvBinding::key("MISSING", "nope", "k"));

    let running = consumer::start(configs.clone(), spec, &base, SyncSettings::default())
        .await
        .expect("env misses are not fatal");

    let env = &running.env().env;
    assert_eq!(env["FOO"], "2");
    assert_eq!(env["ONLY_A"], "a");
    assert_eq!(env["HOME"], "/root");
    assert!(!env.contains_key("MISSING"));
    assert_eq!(running.env().missing.len(), 1);

    // The environment is resolved once and never follows later updates.
    configs
        .update_with_retry("b", 3, |r| {
            r.data.insert("FOO".into(), "3".into());
        })
        .await
        .unwrap();
    assert_eq!(running.env().env["FOO"], "2");

    running.teardown().await;
}

#[tokio::test]
async fn test_watch_triggered_agent_follows_updates() {
    let (_system, configs) = system();
    let mount = TempDir::new().unwrap();
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
        .await
        .unwrap();

    let spec = ConsumerSpec::new("web")
        .with_volume(VolumeBinding::new("conf", mount.path()).with_item("etc/k1", "cfg1", "k1"));
    // Polling is far too slow to explain a prompt update.
    let running = consumer::start(
        configs.clone(),
        spec,
        &BTreeMap::new(),
        settings(SyncTrigger::Watch, 3_600_000),
    )
    .await
    .unwrap();

    let file = mount.path().join("etc/k1");
    assert_eq!(fs::read_to_string(&file).unwrap(), "v1");

    configs
        .update_with_retry("cfg1", 3, |r| {
            r.data.insert("k1".into(), "v2".into());
        })
        .await
        .unwrap();
    wait_for_content(&file, "v2").await;

    configs.delete("cfg1").await.unwrap();
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v3"))
        .await
        .unwrap();
    wait_for_content(&file, "v3").await;

    running.teardown().await;
}

#[tokio::test]
async fn test_poll_triggered_agent_follows_updates() {
    let (_system, configs) = system();
    let mount = TempDir::new().unwrap();
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
        .await
        .unwrap();

    let spec = ConsumerSpec::new("web")
        .with_volume(VolumeBinding::new("conf", mount.path()).with_item("k1", "cfg1", "k1"));
    let running = consumer::start(configs.clone(), spec, &BTreeMap::new(), settings(SyncTrigger::Poll, 20))
        .await
        .unwrap();

    configs
        .update_with_retry("cfg1", 3, |r| {
            r.data.insert("k1".into(), "polled".into());
        })
        .await
        .unwrap();
    wait_for_content(&mount.path().join("k1"), "polled").await;

    running.teardown().await;
    // Files stay in place after teardown.
    assert_eq!(fs::read_to_string(mount.path().join("k1")).unwrap(), "polled");
}

#[tokio::test]
async fn test_independent_mounts_sync_in_parallel() {
    let (_system, configs) = system();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    configs
        .create(ConfigResource::new("default", "shared").with_entry("k", "v1"))
        .await
        .unwrap();

    let spec = ConsumerSpec::new("web")
        .with_volume(VolumeBinding::new("one", first.path()).with_item("k", "shared", "k"))
        .with_volume(VolumeBinding::new("two", second.path()).with_item("nested/k", "shared", "k"));
    let running = consumer::start(configs.clone(), spec, &BTreeMap::new(), settings(SyncTrigger::Both, 20))
        .await
        .unwrap();
    assert_eq!(running.agents().len(), 2);

    configs
        .update_with_retry("shared", 3, |r| {
            r.data.insert("k".into(), "v2".into());
        })
        .await
        .unwrap();
    wait_for_content(&first.path().join("k"), "v2").await;
    wait_for_content(&second.path().join("nested/k"), "v2").await;

    running.teardown().await;
}

#[tokio::test]
async fn test_shutdown_after_teardown() {
    let (system, configs) = system();
    let mount = TempDir::new().unwrap();
    configs
        .create(ConfigResource::new("default", "cfg1").with_entry("k1", "v1"))
        .await
        .unwrap();
    let spec = ConsumerSpec::new("web")
        .with_volume(VolumeBinding::new("conf", mount.path()).with_item("k1", "cfg1", "k1"));
    let running = consumer::start(configs.clone(), spec, &BTreeMap::new(), settings(SyncTrigger::Both, 20))
        .await
        .unwrap();

    running.teardown().await;
    drop(configs);
    tokio::time::timeout(Duration::from_secs(5), system.shutdown())
        .await
        .expect("server did not drain")
        .expect("server task failed");
}
