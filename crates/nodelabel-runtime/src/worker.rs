//! [`Worker`] – the discovery scheduler.
//!
//! ```text
//!          ┌──────── timer / source-path change ────────┐
//!          ▼                                             │
//!   Idle ──► Discovering ──► Publishing ──► Idle ────────┘
//!    ▲                                       │
//!    └── Reconfiguring ◄── config change ────┘
//!        (credential change: reconnect)
//! ```
//!
//! The worker multiplexes its event sources with a biased `select!`, so
//! exactly one event is handled at a time and shutdown always wins, even in
//! the middle of a pass.  Sources run on the blocking pool.  A
//! reconfiguration or credential rotation is followed by an immediate pass
//! rather than waiting for the next tick.  The timer is re-armed after
//! every pass; a zero `sleepInterval` disables periodic passes entirely.
//!
//! | Failure                         | Outcome                    |
//! |---------------------------------|----------------------------|
//! | initial configuration invalid   | [`Worker::new`] fails      |
//! | one source fails                | logged, pass continues     |
//! | reconfiguration invalid         | [`Worker::run`] fails      |
//! | publish fails or times out      | [`Worker::run`] fails      |

use std::path::PathBuf;
use std::time::Duration;

use nodelabel_core::{ConfigEngine, EffectiveConfig, build_labels, discover_features};
use nodelabel_publish::Publisher;
use nodelabel_types::{DiscoveryError, Labels, NodeMetadata};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::watch::Watcher;

/// Upper bound on a single publish call.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Annotation carrying the worker version on every publish.
pub const VERSION_ANNOTATION: &str = "nodelabel.io/worker.version";

/// Run-mode settings that are not part of the configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerArgs {
    /// Run one pass, then return.
    pub oneshot: bool,
    /// Files whose change triggers a publisher reconnect.
    pub credential_paths: Vec<PathBuf>,
    pub node_name: String,
}

/// Handles for injecting events into a running worker.
///
/// Each channel holds at most one pending event, so repeated triggers
/// before the worker gets to them collapse into one.
#[derive(Clone)]
pub struct Triggers {
    config: mpsc::Sender<()>,
    credentials: mpsc::Sender<()>,
    features: mpsc::Sender<()>,
}

impl Triggers {
    pub fn config_changed(&self) {
        let _ = self.config.try_send(());
    }

    pub fn credentials_changed(&self) {
        let _ = self.credentials.try_send(());
    }

    pub fn features_changed(&self) {
        let _ = self.features.try_send(());
    }
}

/// The scheduler: owns the configuration engine, the publisher and the
/// watch actors.
pub struct Worker {
    engine: ConfigEngine,
    publisher: Box<dyn Publisher>,
    args: WorkerArgs,
    effective: EffectiveConfig,
    triggers: Triggers,
    config_rx: mpsc::Receiver<()>,
    credentials_rx: mpsc::Receiver<()>,
    features_rx: mpsc::Receiver<()>,
    config_watch: Watcher,
    credentials_watch: Watcher,
    features_watch: Watcher,
    last_labels: Option<Labels>,
}

impl Worker {
    /// Build the initial configuration and the worker around it.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when the initial configuration is
    /// invalid.
    pub fn new(
        engine: ConfigEngine,
        publisher: Box<dyn Publisher>,
        args: WorkerArgs,
    ) -> Result<Self, DiscoveryError> {
        let effective = engine.configure()?;

        let (config_tx, config_rx) = mpsc::channel(1);
        let (credentials_tx, credentials_rx) = mpsc::channel(1);
        let (features_tx, features_rx) = mpsc::channel(1);

        Ok(Self {
            engine,
            publisher,
            args,
            effective,
            config_watch: Watcher::new("config", config_tx.clone()),
            credentials_watch: Watcher::new("credentials", credentials_tx.clone()),
            features_watch: Watcher::new("source paths", features_tx.clone()),
            triggers: Triggers {
                config: config_tx,
                credentials: credentials_tx,
                features: features_tx,
            },
            config_rx,
            credentials_rx,
            features_rx,
            last_labels: None,
        })
    }

    pub fn triggers(&self) -> Triggers {
        self.triggers.clone()
    }

    pub fn effective_config(&self) -> &EffectiveConfig {
        &self.effective
    }

    /// Rebuild the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Config`] when the new configuration is
    /// invalid.  No source is reconfigured in that case, and the running
    /// event loop treats the error as fatal and ends the run.
    pub fn reconfigure(&mut self) -> Result<(), DiscoveryError> {
        self.effective = self.engine.configure()?;
        Ok(())
    }

    /// One discovery and publish pass; returns the label set it produced.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Publish`] when publishing fails or exceeds
    /// [`PUBLISH_TIMEOUT`].  Source failures are logged, not returned.
    pub async fn run_cycle(&mut self) -> Result<Labels, DiscoveryError> {
        let feature_sources = self.effective.feature_sources.clone();
        let label_sources = self.effective.label_sources.clone();
        let whitelist = self.effective.core.label_whitelist.clone();
        let span = info_span!("discovery_pass");
        // sources do blocking I/O and run hooks
        let (features, labels) = tokio::task::spawn_blocking(move || {
            span.in_scope(|| {
                let features = discover_features(&feature_sources);
                let labels = build_labels(&label_sources, &whitelist);
                (features, labels)
            })
        })
        .await
        .map_err(|e| DiscoveryError::Io(format!("discovery task failed: {e}")))?;

        if self.last_labels.as_ref() == Some(&labels) {
            debug!(labels = ?labels, "labels unchanged");
        } else {
            info!(count = labels.len(), labels = ?labels, "labels updated");
        }

        if self.effective.core.no_publish {
            info!("publishing disabled, not sending labels");
        } else {
            let metadata = NodeMetadata::new(self.args.node_name.clone())
                .with_annotation(VERSION_ANNOTATION, env!("CARGO_PKG_VERSION"));
            tokio::time::timeout(
                PUBLISH_TIMEOUT,
                self.publisher.publish(&labels, &features, &metadata),
            )
            .await
            .map_err(|_| {
                DiscoveryError::Publish(format!(
                    "{} publisher timed out after {}s",
                    self.publisher.name(),
                    PUBLISH_TIMEOUT.as_secs()
                ))
            })??;
            debug!(publisher = self.publisher.name(), "labels published");
        }

        self.last_labels = Some(labels.clone());
        Ok(labels)
    }

    fn source_watch_paths(&self) -> Vec<PathBuf> {
        self.effective
            .feature_sources
            .iter()
            .flat_map(|source| source.watch_paths())
            .collect()
    }

    async fn install_watch(watcher: &Watcher, paths: Vec<PathBuf>) {
        if let Err(e) = watcher.install(paths).await {
            warn!(error = %e, "file watch unavailable, changes will be picked up on the next tick");
        }
    }

    async fn stop_watches(&self) {
        self.config_watch.stop().await;
        self.credentials_watch.stop().await;
        self.features_watch.stop().await;
    }

    fn deadline(&self) -> Option<Instant> {
        let interval = self.effective.core.sleep_interval;
        if interval.is_zero() {
            return None;
        }
        let deadline = Instant::now().checked_add(interval);
        if deadline.is_none() {
            warn!(
                interval = %nodelabel_core::duration::format(interval),
                "sleepInterval out of range, periodic passes disabled"
            );
        }
        deadline
    }

    /// One pass, abandoned as soon as `shutdown` fires.  Returns `false`
    /// when shutdown won.
    async fn pass(&mut self, shutdown: &CancellationToken) -> Result<bool, DiscoveryError> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("shutdown requested during a discovery pass, stopping worker");
                Ok(false)
            }
            result = self.run_cycle() => result.map(|_| true),
        }
    }

    /// Run until `shutdown` is cancelled (or after one pass in one-shot
    /// mode).
    ///
    /// # Errors
    ///
    /// Returns the first fatal error: a failed reconfiguration, a failed
    /// credential reload or a failed publish.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), DiscoveryError> {
        if self.args.oneshot {
            self.run_cycle().await?;
            info!("one-shot pass finished");
            return Ok(());
        }

        let config_paths: Vec<PathBuf> =
            self.engine.config_file().map(PathBuf::from).into_iter().collect();
        Self::install_watch(&self.config_watch, config_paths).await;
        Self::install_watch(&self.credentials_watch, self.args.credential_paths.clone()).await;
        Self::install_watch(&self.features_watch, self.source_watch_paths()).await;

        let result = self.event_loop(shutdown).await;
        self.stop_watches().await;
        result
    }

    async fn event_loop(&mut self, shutdown: CancellationToken) -> Result<(), DiscoveryError> {
        if !self.pass(&shutdown).await? {
            return Ok(());
        }
        let mut deadline = self.deadline();

        loop {
            let tick = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, stopping worker");
                    return Ok(());
                }
                Some(()) = self.config_rx.recv() => {
                    info!("configuration changed, reconfiguring");
                    self.reconfigure()?;
                    let paths = self.source_watch_paths();
                    Self::install_watch(&self.features_watch, paths).await;
                }
                Some(()) = self.credentials_rx.recv() => {
                    info!(publisher = self.publisher.name(), "credentials changed, reconnecting");
                    self.publisher.reconnect().await?;
                }
                Some(()) = self.features_rx.recv() => {
                    debug!("source path changed");
                }
                _ = tick => {
                    debug!("timer fired");
                }
            }

            if !self.pass(&shutdown).await? {
                return Ok(());
            }
            deadline = self.deadline();
        }
    }
}
