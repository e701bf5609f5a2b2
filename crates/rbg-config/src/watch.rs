// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem watching for the configuration file.

use std::path::PathBuf;
use std::time::Duration;

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{Config, ConfigError, ConfigResult};

/// How long to wait after a remove/rename notification before re-adding the
/// watch. Editors and deploy tools frequently replace the file atomically,
/// so it usually reappears within this window.
const REPLACE_DEBOUNCE: Duration = Duration::from_millis(100);

/// A watcher over the configuration file.
///
/// The watcher emits the initial load immediately, then a fresh [`Config`]
/// every time the file changes. Errors are terminal: after one is emitted
/// the worker shuts down.
pub struct ConfigWatcher {
    /// Fresh configuration snapshots.
    pub new_config: mpsc::Receiver<Config>,

    /// Terminal watcher errors.
    pub errors: mpsc::Receiver<ConfigError>,

    reload: mpsc::Sender<()>,
}

impl ConfigWatcher {
    /// Start watching the configuration file at `path`.
    pub fn watch(path: impl Into<PathBuf>) -> ConfigWatcher {
        let path = path.into();

        let (config_tx, config_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);
        let (reload_tx, reload_rx) = mpsc::channel(1);

        tokio::spawn(watch_worker(path, config_tx, error_tx, reload_rx));

        ConfigWatcher {
            new_config: config_rx,
            errors: error_rx,
            reload: reload_tx,
        }
    }

    /// Trigger a reload and wait for the resulting configuration.
    ///
    /// This must only be called by the task that also consumes the output
    /// channels (the serve loop), so the emitted snapshot cannot be claimed
    /// by another consumer.
    pub async fn force_reload(&mut self) -> ConfigResult<Config> {
        if self.reload.send(()).await.is_err() {
            return Err(ConfigError::WatcherClosed);
        }

        tokio::select! {
            cfg = self.new_config.recv() => cfg.ok_or(ConfigError::WatcherClosed),
            err = self.errors.recv() => Err(err.unwrap_or(ConfigError::WatcherClosed)),
        }
    }
}

async fn watch_worker(
    path: PathBuf,
    config_tx: mpsc::Sender<Config>,
    error_tx: mpsc::Sender<ConfigError>,
    mut reload_rx: mpsc::Receiver<()>,
) {
    let (fs_tx, mut fs_rx) = mpsc::channel::<notify::Result<Event>>(16);

    // The notify backend runs its own thread; bridge its callback into the
    // async world.
    let mut watcher = match notify::recommended_watcher(move |res| {
        let _ = fs_tx.blocking_send(res);
    }) {
        Ok(watcher) => watcher,
        Err(err) => {
            let _ = error_tx.send(err.into()).await;
            return;
        }
    };

    if let Err(err) = watcher.watch(&path, RecursiveMode::NonRecursive) {
        let _ = error_tx.send(err.into()).await;
        return;
    }

    loop {
        match Config::load(&path) {
            Ok(cfg) => {
                if config_tx.send(cfg).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                let _ = error_tx.send(err).await;
                return;
            }
        }

        tokio::select! {
            event = fs_rx.recv() => {
                match event {
                    Some(Ok(event)) => {
                        if matches!(
                            event.kind,
                            EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
                        ) {
                            // The file may be mid-replace; wait for it to
                            // come back before re-adding the watch.
                            tokio::time::sleep(REPLACE_DEBOUNCE).await;

                            let _ = watcher.unwatch(&path);
                            if watcher.watch(&path, RecursiveMode::NonRecursive).is_err() {
                                let _ = error_tx.send(ConfigError::Removed).await;
                                return;
                            }
                        }

                        debug!(?event, "Configuration file changed");
                    }

                    Some(Err(err)) => {
                        let _ = error_tx.send(err.into()).await;
                        return;
                    }

                    None => return,
                }
            }

            request = reload_rx.recv() => {
                if request.is_none() {
                    return;
                }
            }
        }
    }
}
