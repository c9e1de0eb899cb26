//! File-watch trigger
//!
//! Subscribes to filesystem notifications on the target directory.
//! Duplicate events for the same path within the poll interval are
//! debounced, and a file is only delivered once its size and mtime
//! settle, so half-written drops are never handed to the parser.
//! Files already present when the watch starts are delivered by an
//! initial sweep.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pdi_common::{PdiError, Result};

use super::{
    extension_allowed, log_share_credentials, wait_for_stable, TriggerDelivery, TriggerPayload,
};
use crate::config::FileMonitorSettings;

pub struct FileWatchTrigger {
    settings: FileMonitorSettings,
    delivery: TriggerDelivery,
    /// Paths currently waiting out the debounce/stability window
    debouncing: Arc<Mutex<HashSet<PathBuf>>>,
    /// Set on stop; settle tasks already in flight check it before
    /// delivering, so no run starts after the trigger stops.
    stopped: Arc<AtomicBool>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileWatchTrigger {
    pub fn new(settings: FileMonitorSettings, delivery: TriggerDelivery) -> Self {
        Self {
            settings,
            delivery,
            debouncing: Arc::new(Mutex::new(HashSet::new())),
            stopped: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Debounce then deliver one candidate path on its own task.
    fn spawn_settle(
        settings: &FileMonitorSettings,
        delivery: &TriggerDelivery,
        debouncing: &Arc<Mutex<HashSet<PathBuf>>>,
        stopped: &Arc<AtomicBool>,
        path: PathBuf,
    ) {
        if !extension_allowed(&path, &settings.allowed_extensions) {
            return;
        }

        {
            let mut set = debouncing.lock().unwrap_or_else(|e| e.into_inner());
            // A later event for the same path lands inside the window
            // already in progress.
            if !set.insert(path.clone()) {
                return;
            }
        }

        let settle = Duration::from_millis(settings.poll_interval_ms);
        let delivery = delivery.clone();
        let debouncing = Arc::clone(debouncing);
        let stopped = Arc::clone(stopped);
        tokio::spawn(async move {
            let stable = wait_for_stable(&path, settle).await;
            {
                let mut set = debouncing.lock().unwrap_or_else(|e| e.into_inner());
                set.remove(&path);
            }
            if stopped.load(Ordering::SeqCst) {
                debug!(
                    instance = %delivery.module_id(),
                    path = %path.display(),
                    "Trigger stopped during settle window, discarding"
                );
                return;
            }
            if stable {
                debug!(
                    instance = %delivery.module_id(),
                    path = %path.display(),
                    "Watched file stable, delivering"
                );
                delivery.deliver(TriggerPayload::File(path));
            } else {
                warn!(
                    instance = %delivery.module_id(),
                    path = %path.display(),
                    "Watched file never settled, waiting for a later event"
                );
            }
        });
    }
}

#[async_trait]
impl super::IngestionTrigger for FileWatchTrigger {
    async fn start(&self) -> Result<()> {
        self.stopped.store(false, Ordering::SeqCst);
        log_share_credentials(self.delivery.module_id(), self.settings.credentials.as_ref());

        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        // The notify callback runs on the watcher's own thread; it
        // only forwards paths into the async consumer.
        let event_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                },
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            }
        })
        .map_err(|e| PdiError::Configuration(format!("cannot create watcher: {}", e)))?;

        watcher
            .watch(&self.settings.target_path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                PdiError::Configuration(format!(
                    "cannot watch {}: {}",
                    self.settings.target_path.display(),
                    e
                ))
            })?;

        // Sweep files that were already present before the watch began.
        match std::fs::read_dir(&self.settings.target_path) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let _ = tx.send(entry.path());
                }
            },
            Err(e) => warn!(
                instance = %self.delivery.module_id(),
                error = %e,
                "Initial sweep of watched directory failed"
            ),
        }

        let settings = self.settings.clone();
        let delivery = self.delivery.clone();
        let debouncing = Arc::clone(&self.debouncing);
        let stopped = Arc::clone(&self.stopped);
        let handle = tokio::spawn(async move {
            while let Some(path) = rx.recv().await {
                Self::spawn_settle(&settings, &delivery, &debouncing, &stopped, path);
            }
        });

        {
            let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(watcher);
        }
        {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            *slot = Some(handle);
        }

        info!(
            instance = %self.delivery.module_id(),
            path = %self.settings.target_path.display(),
            "File-watch trigger started"
        );
        Ok(())
    }

    async fn stop(&self) {
        // Settle tasks already in flight see the flag and discard
        // instead of delivering.
        self.stopped.store(true, Ordering::SeqCst);
        // Dropping the watcher stops event production; the consumer
        // then drains and exits on channel close.
        {
            let mut slot = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
            slot.take();
        }
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        info!(instance = %self.delivery.module_id(), "File-watch trigger stopped");
    }

    fn queued_count(&self) -> usize {
        let set = self.debouncing.lock().unwrap_or_else(|e| e.into_inner());
        set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::registry::ModuleRegistry;
    use crate::import::trigger::IngestionTrigger;

    fn settings(dir: &std::path::Path) -> FileMonitorSettings {
        FileMonitorSettings {
            target_path: dir.to_path_buf(),
            poll_interval_ms: 10,
            allowed_extensions: vec!["csv".into()],
            watch: true,
            credentials: None,
        }
    }

    #[tokio::test]
    async fn test_start_fails_on_missing_directory() {
        let settings = settings(std::path::Path::new("/nonexistent/watch/dir"));
        let trigger = FileWatchTrigger::new(
            settings,
            TriggerDelivery::new(ModuleRegistry::new(), "watch-test"),
        );
        assert!(matches!(
            trigger.start().await,
            Err(PdiError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_events_share_one_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.csv");
        std::fs::write(&path, "A\n1\n").unwrap();

        let settings = settings(dir.path());
        let delivery = TriggerDelivery::new(ModuleRegistry::new(), "watch-test");
        let debouncing = Arc::new(Mutex::new(HashSet::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        FileWatchTrigger::spawn_settle(&settings, &delivery, &debouncing, &stopped, path.clone());
        FileWatchTrigger::spawn_settle(&settings, &delivery, &debouncing, &stopped, path.clone());
        assert_eq!(debouncing.lock().unwrap().len(), 1);

        // The window clears once the settle task finishes.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(debouncing.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_and_stop_on_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        let trigger = FileWatchTrigger::new(
            settings(dir.path()),
            TriggerDelivery::new(ModuleRegistry::new(), "watch-test"),
        );

        trigger.start().await.unwrap();
        assert_eq!(trigger.queued_count(), 0);
        trigger.stop().await;
    }
}
