// Bundle root watch loop
//
// One background task per deployer. File system events are mapped to the
// bundle directory they touch, coalesced until the root has been quiet for
// the debounce period, then each touched bundle is reconciled.

use crate::deployer::{Deployer, is_hidden};
use arbor_core::{Error, Result, codes};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Handle of a running watch loop; dropping it aborts the loop
pub struct WatchHandle {
    root: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Canonical bundle root being watched
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop and wait for it to exit
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn watch_error(message: String, source: impl std::error::Error + Send + Sync + 'static) -> Error {
    Error::new(codes::WATCH_FAILED, message).with_source(source)
}

pub(crate) fn spawn(deployer: Arc<Deployer>) -> Result<WatchHandle> {
    let configured = deployer.config().root.clone();
    fs::create_dir_all(&configured).map_err(|e| {
        watch_error(format!("cannot create {}: {}", configured.display(), e), e)
    })?;
    let root = fs::canonicalize(&configured)?;

    let (tx, mut rx) = mpsc::channel::<Event>(100);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        },
        Config::default(),
    )
    .map_err(|e| watch_error(format!("failed to create watcher: {}", e), e))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| watch_error(format!("failed to watch {}: {}", root.display(), e), e))?;

    let debounce = deployer.config().debounce;
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let loop_root = root.clone();

    let task = tokio::spawn(async move {
        // dropping the watcher ends the event stream
        let _watcher = watcher;
        tracing::info!(root = %loop_root.display(), "watching bundle root");

        'watch: loop {
            let first = tokio::select! {
                _ = &mut shutdown_rx => break 'watch,
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break 'watch,
                },
            };

            let mut touched = BTreeSet::new();
            collect_bundles(&loop_root, &first, &mut touched);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break 'watch,
                    next = tokio::time::timeout(debounce, rx.recv()) => match next {
                        Ok(Some(event)) => collect_bundles(&loop_root, &event, &mut touched),
                        Ok(None) | Err(_) => break,
                    },
                }
            }

            for dir in touched {
                tracing::debug!(bundle = %dir.display(), "bundle changed");
                if let Err(err) = deployer.reconcile(&dir) {
                    tracing::warn!(bundle = %dir.display(), error = %err, "bundle skipped");
                }
            }
        }

        tracing::debug!(root = %loop_root.display(), "bundle watcher stopped");
    });

    Ok(WatchHandle {
        root,
        shutdown: Some(shutdown_tx),
        task: Some(task),
    })
}

fn collect_bundles(root: &Path, event: &Event, touched: &mut BTreeSet<PathBuf>) {
    match event.kind {
        EventKind::Create(_) | EventKind::Remove(_) => {}
        EventKind::Modify(ModifyKind::Metadata(_)) => return,
        EventKind::Modify(_) => {}
        _ => return,
    }
    touched.extend(event.paths.iter().filter_map(|path| bundle_of(root, path)));
}

/// Bundle directory a path under `root` belongs to
fn bundle_of(root: &Path, path: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(root).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => {
            let dir = root.join(name);
            (!is_hidden(&dir)).then_some(dir)
        }
        _ => None,
    }
}
