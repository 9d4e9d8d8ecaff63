//! Device attach/detach notifications
//!
//! A hint source only: the sync loop stays correct without it because LED
//! writes double as liveness checks and the
//! loop re-enumerates the device every retry interval. With it, reconnects happen as soon as
//! the device enumerates instead of on the next retry tick.

use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::config::HotplugConfig;

/// Queue depth between the notify thread and the loop
const ACTION_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugAction {
    Added,
    Removed,
}

#[derive(Debug, Error)]
pub enum HotplugError {
    #[error("hotplug directory {} does not exist", .0.display())]
    MissingDir(PathBuf),

    #[error("failed to watch {}: {source}", .path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Source of attach/detach hints consumed by the sync loop
#[async_trait]
pub trait HotplugSource: Send {
    /// Wait up to `timeout` for the next action
    async fn poll_action(&mut self, timeout: Duration) -> Option<HotplugAction>;
}

/// Map a filesystem event to a hotplug action for nodes named `prefix*`
pub fn classify(event: &Event, prefix: &str) -> Option<HotplugAction> {
    let action = match event.kind {
        EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(RenameMode::To)) => HotplugAction::Added,
        EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(RenameMode::From)) => HotplugAction::Removed,
        _ => return None,
    };

    let relevant = event.paths.iter().any(|path| {
        path.file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix))
    });

    relevant.then_some(action)
}

/// Watches a device directory (e.g. `/dev/snd`) for MIDI node creation/removal
pub struct DeviceNodeWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<HotplugAction>,
}

impl DeviceNodeWatcher {
    pub fn new(config: &HotplugConfig) -> Result<Self, HotplugError> {
        let dir = Path::new(&config.watch_dir).to_path_buf();
        if !dir.is_dir() {
            return Err(HotplugError::MissingDir(dir));
        }

        let (tx, rx) = mpsc::channel(ACTION_QUEUE_CAPACITY);
        let prefix = config.name_prefix.clone();

        // notify callbacks run on their own OS thread
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                trace!("Device node event: {:?} {:?}", event.kind, event.paths);
                if let Some(action) = classify(&event, &prefix) {
                    debug!("Hotplug {:?}: {:?}", action, event.paths);
                    if tx.try_send(action).is_err() {
                        warn!("Hotplug queue full, dropping {:?}", action);
                    }
                }
            }
            Err(e) => {
                error!("Device watch error: {}", e);
            }
        })
        .map_err(|source| HotplugError::Watch { path: dir.clone(), source })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|source| HotplugError::Watch { path: dir.clone(), source })?;

        info!("Hotplug watcher started for {}/{}*", dir.display(), config.name_prefix);

        Ok(Self { _watcher: watcher, rx })
    }
}

#[async_trait]
impl HotplugSource for DeviceNodeWatcher {
    async fn poll_action(&mut self, timeout: Duration) -> Option<HotplugAction> {
        if let Ok(action) = self.rx.try_recv() {
            return Some(action);
        }
        if timeout.is_zero() {
            return None;
        }
        tokio::time::timeout(timeout, self.rx.recv()).await.ok().flatten()
    }
}
