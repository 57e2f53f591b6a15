//! [`Watcher`] – filesystem watch actor.
//!
//! A watcher owns at most one background watch task at a time.  The task
//! holds a `notify` watcher, filters its events down to the paths it was
//! asked to watch, and pushes a unit notification into a capacity-1
//! channel.  Bursts of events therefore coalesce into a single pending
//! notification.
//!
//! Installing a new watch cancels the running task and awaits its
//! termination before the replacement starts.  The handle sits behind an
//! async mutex, so concurrent installs are serialised.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use nodelabel_types::DiscoveryError;
use notify::{Event, EventKind, RecursiveMode, Watcher as _};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A running watch task.
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    /// Cancel the task and wait for it to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "watch task ended abnormally");
        }
    }
}

/// Named watch slot feeding one notification channel.
pub struct Watcher {
    name: &'static str,
    notify_tx: mpsc::Sender<()>,
    current: Mutex<Option<WatchHandle>>,
}

impl Watcher {
    pub fn new(name: &'static str, notify_tx: mpsc::Sender<()>) -> Self {
        Self {
            name,
            notify_tx,
            current: Mutex::new(None),
        }
    }

    /// Replace the running watch with one covering `paths`.
    ///
    /// An empty list just stops the running watch.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::Watch`] when the OS watcher cannot be set
    /// up.  The previous watch is stopped either way.
    pub async fn install(&self, paths: Vec<PathBuf>) -> Result<(), DiscoveryError> {
        let mut current = self.current.lock().await;
        if let Some(handle) = current.take() {
            handle.stop().await;
        }
        if paths.is_empty() {
            return Ok(());
        }
        *current = Some(spawn_watch(self.name, paths, self.notify_tx.clone())?);
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.current.lock().await.take() {
            handle.stop().await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.current.lock().await.is_some()
    }
}

/// Directories to hand to the OS watcher: a directory target is watched
/// itself, a file target through its parent, so that the file being
/// replaced or created later is still seen.
fn watch_dirs(paths: &[PathBuf]) -> BTreeSet<PathBuf> {
    paths
        .iter()
        .filter_map(|path| {
            if path.is_dir() {
                Some(path.clone())
            } else {
                path.parent()
                    .filter(|parent| parent.is_dir())
                    .map(Path::to_path_buf)
            }
        })
        .collect()
}

fn is_relevant(event: &Event, targets: &[PathBuf]) -> bool {
    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event.paths.iter().any(|path| {
        targets.iter().any(|target| path.starts_with(target))
            // atomically swapped mounts (`..data` symlinks)
            || path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(".."))
    })
}

fn spawn_watch(
    name: &'static str,
    targets: Vec<PathBuf>,
    notify_tx: mpsc::Sender<()>,
) -> Result<WatchHandle, DiscoveryError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let _ = event_tx.send(res);
    })
    .map_err(|e| DiscoveryError::Watch(format!("{name}: failed to create watcher: {e}")))?;

    for dir in watch_dirs(&targets) {
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| DiscoveryError::Watch(format!("{name}: cannot watch {}: {e}", dir.display())))?;
        debug!(watch = name, dir = %dir.display(), "watching");
    }

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        // dropping the watcher unregisters every OS watch
        let _watcher = watcher;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = event_rx.recv() => match event {
                    Some(Ok(event)) if is_relevant(&event, &targets) => {
                        debug!(watch = name, paths = ?event.paths, "change detected");
                        let _ = notify_tx.try_send(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => warn!(watch = name, error = %e, "watch error"),
                    None => break,
                },
            }
        }
        debug!(watch = name, "watch stopped");
    });

    Ok(WatchHandle { cancel, task })
}
