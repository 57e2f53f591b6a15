//! End-to-end behaviour of the worker with the shipped sources and a
//! recording publisher.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use nodelabel_core::{CliOverrides, ConfigEngine};
use nodelabel_publish::Publisher;
use nodelabel_runtime::worker::VERSION_ANNOTATION;
use nodelabel_runtime::{Worker, WorkerArgs};
use nodelabel_sources::{FeatureSource, SourceEntry, SourceRegistry, Source, default_registry};
use nodelabel_types::{DiscoveryError, DomainFeatures, Features, Labels, NodeMetadata};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Published = (Labels, Features, NodeMetadata);

struct Recording {
    tx: mpsc::UnboundedSender<Published>,
    fail: bool,
    fail_reconnect: bool,
    reconnects: Arc<AtomicUsize>,
}

impl Recording {
    fn new(tx: mpsc::UnboundedSender<Published>) -> Self {
        Self {
            tx,
            fail: false,
            fail_reconnect: false,
            reconnects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Publisher for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn publish(
        &self,
        labels: &Labels,
        features: &Features,
        metadata: &NodeMetadata,
    ) -> Result<(), DiscoveryError> {
        if self.fail {
            return Err(DiscoveryError::Publish("control plane unavailable".into()));
        }
        let _ = self
            .tx
            .send((labels.clone(), features.clone(), metadata.clone()));
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<(), DiscoveryError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect {
            return Err(DiscoveryError::Publish("client certificate unreadable".into()));
        }
        Ok(())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
}

impl Fixture {
    fn new() -> Self {
        let fixture = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        fs::create_dir(fixture.features_dir()).unwrap();
        fs::write(fixture.features_dir().join("node"), "testfeature1\nother=1\n").unwrap();
        fixture
    }

    fn features_dir(&self) -> PathBuf {
        self.dir.path().join("features.d")
    }

    fn config_file(&self) -> PathBuf {
        self.dir.path().join("worker.yaml")
    }

    /// Replace the config file atomically, like a mounted config map.
    fn write_config(&self, core: &str) {
        let text = format!(
            "core:\n  sleepInterval: 1h\n{core}sources:\n  local:\n    featuresDir: {}\n",
            self.features_dir().display()
        );
        let tmp = self.dir.path().join(".worker.yaml.tmp");
        fs::write(&tmp, text).unwrap();
        fs::rename(&tmp, self.config_file()).unwrap();
    }

    fn engine(&self) -> ConfigEngine {
        ConfigEngine::new(
            Arc::new(default_registry().unwrap()),
            Some(self.config_file()),
            None,
            CliOverrides::default(),
        )
    }

    fn worker(&self, oneshot: bool, fail: bool) -> (Worker, mpsc::UnboundedReceiver<Published>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.worker_with(oneshot, Recording { fail, ..Recording::new(tx) }, rx)
    }

    fn worker_with(
        &self,
        oneshot: bool,
        publisher: Recording,
        rx: mpsc::UnboundedReceiver<Published>,
    ) -> (Worker, mpsc::UnboundedReceiver<Published>) {
        let worker = Worker::new(
            self.engine(),
            Box::new(publisher),
            WorkerArgs {
                oneshot,
                credential_paths: Vec::new(),
                node_name: "node-a".into(),
            },
        )
        .unwrap();
        (worker, rx)
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Published>) -> Published {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no publish within 5s")
        .expect("publisher dropped")
}

fn keys(labels: &Labels) -> Vec<&str> {
    labels.keys().map(String::as_str).collect()
}

#[tokio::test]
async fn oneshot_runs_exactly_one_pass() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (worker, mut rx) = fixture.worker(true, false);

    worker.run(CancellationToken::new()).await.unwrap();

    let (labels, features, metadata) = next(&mut rx).await;
    assert_eq!(labels.get("testfeature1").map(String::as_str), Some("true"));
    assert_eq!(labels.get("other").map(String::as_str), Some("1"));
    assert_eq!(
        features["local"].attributes.get("other").map(String::as_str),
        Some("1")
    );
    assert_eq!(metadata.node_name, "node-a");
    assert!(metadata.annotations.contains_key(VERSION_ANNOTATION));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn whitelist_change_applies_before_next_tick() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (worker, mut rx) = fixture.worker(false, false);
    let triggers = worker.triggers();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    let (labels, _, _) = next(&mut rx).await;
    assert_eq!(keys(&labels), vec!["other", "testfeature1"]);

    fixture.write_config("  labelWhiteList: '^test'\n");
    triggers.config_changed();

    let (labels, _, _) = next(&mut rx).await;
    assert_eq!(keys(&labels), vec!["testfeature1"]);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn source_change_triggers_an_immediate_pass() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (worker, mut rx) = fixture.worker(false, false);
    let triggers = worker.triggers();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    next(&mut rx).await;
    fs::write(fixture.features_dir().join("node"), "replaced=yes\n").unwrap();
    triggers.features_changed();

    let mut labels = next(&mut rx).await.0;
    // the directory watch may have fired first, with a partial file
    while !labels.contains_key("replaced") {
        labels = next(&mut rx).await.0;
    }
    assert_eq!(keys(&labels), vec!["replaced"]);

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn periodic_passes_repeat_identical_labels() {
    let fixture = Fixture::new();
    fs::write(
        fixture.config_file(),
        format!(
            "core:\n  sleepInterval: 1s\nsources:\n  local:\n    featuresDir: {}\n",
            fixture.features_dir().display()
        ),
    )
    .unwrap();
    let (worker, mut rx) = fixture.worker(false, false);
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    let first = next(&mut rx).await.0;
    let second = next(&mut rx).await.0;
    assert_eq!(first, second);
    assert_eq!(format!("{first:?}"), format!("{second:?}"));

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn no_publish_skips_the_publisher() {
    let fixture = Fixture::new();
    fixture.write_config("  noPublish: true\n");
    let (worker, mut rx) = fixture.worker(true, false);

    worker.run(CancellationToken::new()).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn publish_failure_ends_the_run() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (worker, _rx) = fixture.worker(false, true);

    let err = worker.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, DiscoveryError::Publish(_)));
}

#[tokio::test]
async fn invalid_reconfiguration_ends_the_run() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (worker, mut rx) = fixture.worker(false, false);
    let triggers = worker.triggers();
    let run = tokio::spawn(worker.run(CancellationToken::new()));

    next(&mut rx).await;
    fixture.write_config("  labelWhiteList: '('\n");
    triggers.config_changed();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DiscoveryError::Config(_))));
}

#[test]
fn invalid_initial_configuration_is_fatal() {
    let fixture = Fixture::new();
    fs::write(fixture.config_file(), "core:\n  sleepInterval: [not, a, duration]\n").unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = Worker::new(
        fixture.engine(),
        Box::new(Recording::new(tx)),
        WorkerArgs::default(),
    );
    assert!(matches!(result, Err(DiscoveryError::Config(_))));
}

#[test]
fn missing_config_file_uses_defaults() {
    let engine = ConfigEngine::new(
        Arc::new(default_registry().unwrap()),
        Some(Path::new("/nonexistent/worker.yaml").to_path_buf()),
        None,
        CliOverrides::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let worker = Worker::new(engine, Box::new(Recording::new(tx)), WorkerArgs::default())
        .unwrap();
    assert_eq!(worker.effective_config().label_source_names(), vec!["local"]);
}

#[tokio::test]
async fn fake_source_runs_only_when_named() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let engine = ConfigEngine::new(
        Arc::new(default_registry().unwrap()),
        Some(fixture.config_file()),
        None,
        CliOverrides {
            feature_sources: Some(vec!["all".into(), "fake".into()]),
            label_sources: Some(vec!["all".into(), "fake".into()]),
            ..CliOverrides::default()
        },
    );
    let worker = Worker::new(
        engine,
        Box::new(Recording::new(tx)),
        WorkerArgs {
            oneshot: true,
            ..WorkerArgs::default()
        },
    )
    .unwrap();
    worker.run(CancellationToken::new()).await.unwrap();

    let (labels, features, _) = next(&mut rx).await;
    assert_eq!(
        keys(&labels),
        vec![
            "fake-fakefeature1",
            "fake-fakefeature2",
            "fake-fakefeature3",
            "other",
            "testfeature1"
        ]
    );
    assert!(features["fake"].flags.contains("flag_1"));
    assert_eq!(features["fake"].instances.len(), 2);
    assert!(features.contains_key("local"));
}

#[tokio::test]
async fn credential_change_reconnects_and_republishes() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (tx, rx) = mpsc::unbounded_channel();
    let publisher = Recording::new(tx);
    let reconnects = Arc::clone(&publisher.reconnects);
    let (worker, mut rx) = fixture.worker_with(false, publisher, rx);
    let triggers = worker.triggers();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    next(&mut rx).await;
    assert_eq!(reconnects.load(Ordering::SeqCst), 0);

    triggers.credentials_changed();
    let (labels, _, _) = next(&mut rx).await;
    assert_eq!(reconnects.load(Ordering::SeqCst), 1);
    assert_eq!(keys(&labels), vec!["other", "testfeature1"]);
    assert!(rx.try_recv().is_err());

    shutdown.cancel();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn failed_reconnect_ends_the_run() {
    let fixture = Fixture::new();
    fixture.write_config("");
    let (tx, rx) = mpsc::unbounded_channel();
    let publisher = Recording {
        fail_reconnect: true,
        ..Recording::new(tx)
    };
    let (worker, mut rx) = fixture.worker_with(false, publisher, rx);
    let triggers = worker.triggers();
    let run = tokio::spawn(worker.run(CancellationToken::new()));

    next(&mut rx).await;
    triggers.credentials_changed();

    let result = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(DiscoveryError::Publish(_))));
    assert!(rx.try_recv().is_err());
}

#[test]
fn out_of_range_sleep_interval_is_a_config_error() {
    let engine = ConfigEngine::new(
        Arc::new(default_registry().unwrap()),
        None,
        Some("core:\n  sleepInterval: 18446744073709551615\n".into()),
        CliOverrides::default(),
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = Worker::new(engine, Box::new(Recording::new(tx)), WorkerArgs::default());
    assert!(matches!(result, Err(DiscoveryError::Config(_))));
}

#[tokio::test]
async fn longest_sleep_interval_still_runs_and_stops() {
    let fixture = Fixture::new();
    fs::write(
        fixture.config_file(),
        format!(
            "core:\n  sleepInterval: 2562047h\nsources:\n  local:\n    featuresDir: {}\n",
            fixture.features_dir().display()
        ),
    )
    .unwrap();
    let (worker, mut rx) = fixture.worker(false, false);
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    next(&mut rx).await;
    shutdown.cancel();
    run.await.unwrap().unwrap();
}

/// Detector whose discovery blocks for a long time.
struct Stalled;

impl Source for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }
}

impl FeatureSource for Stalled {
    fn discover(&self) -> Result<(), DiscoveryError> {
        std::thread::sleep(Duration::from_secs(3));
        Ok(())
    }

    fn features(&self) -> DomainFeatures {
        DomainFeatures::default()
    }
}

#[tokio::test]
async fn shutdown_interrupts_a_stalled_pass() {
    let stalled = Arc::new(Stalled);
    let mut registry = SourceRegistry::new();
    registry
        .register(SourceEntry::new(Arc::clone(&stalled)).with_features(stalled))
        .unwrap();
    let engine = ConfigEngine::new(Arc::new(registry), None, None, CliOverrides::default());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Worker::new(engine, Box::new(Recording::new(tx)), WorkerArgs::default()).unwrap();
    let shutdown = CancellationToken::new();
    let run = tokio::spawn(worker.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let started = Instant::now();
    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("worker ignored shutdown during a pass")
        .unwrap()
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(rx.try_recv().is_err());
}
