//! File-poll trigger
//!
//! Scans the target directory every `poll_interval_ms`. A file is
//! delivered once its size and mtime hold steady across two
//! consecutive scans; a file that later changes again is re-delivered.
//! A transiently inaccessible directory is logged and retried on the
//! next tick, never fatal to the poll loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pdi_common::Result;

use super::{extension_allowed, log_share_credentials, TriggerDelivery, TriggerPayload};
use crate::config::FileMonitorSettings;

type Signature = (u64, SystemTime);

#[derive(Debug, Clone, Copy, PartialEq)]
enum SeenState {
    /// Observed but not yet stable across two scans
    Settling(Signature),
    /// Delivered at this signature; redeliver only if it changes
    Delivered(Signature),
}

pub struct FilePollTrigger {
    settings: FileMonitorSettings,
    delivery: TriggerDelivery,
    seen: Arc<Mutex<HashMap<PathBuf, SeenState>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FilePollTrigger {
    pub fn new(settings: FileMonitorSettings, delivery: TriggerDelivery) -> Self {
        Self {
            settings,
            delivery,
            seen: Arc::new(Mutex::new(HashMap::new())),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl super::IngestionTrigger for FilePollTrigger {
    async fn start(&self) -> Result<()> {
        log_share_credentials(self.delivery.module_id(), self.settings.credentials.as_ref());

        let settings = self.settings.clone();
        let delivery = self.delivery.clone();
        let seen = Arc::clone(&self.seen);

        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(settings.poll_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                scan_once(&settings, &delivery, &seen).await;
            }
        });

        let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(handle);

        info!(
            instance = %self.delivery.module_id(),
            path = %self.settings.target_path.display(),
            interval_ms = self.settings.poll_interval_ms,
            "File-poll trigger started"
        );
        Ok(())
    }

    async fn stop(&self) {
        let handle = {
            let mut slot = self.task.lock().unwrap_or_else(|e| e.into_inner());
            slot.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
        info!(instance = %self.delivery.module_id(), "File-poll trigger stopped");
    }

    fn queued_count(&self) -> usize {
        let seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        seen.values()
            .filter(|s| matches!(s, SeenState::Settling(_)))
            .count()
    }
}

async fn scan_once(
    settings: &FileMonitorSettings,
    delivery: &TriggerDelivery,
    seen: &Arc<Mutex<HashMap<PathBuf, SeenState>>>,
) {
    let mut entries = match tokio::fs::read_dir(&settings.target_path).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                instance = %delivery.module_id(),
                path = %settings.target_path.display(),
                error = %e,
                "Poll directory inaccessible, retrying next tick"
            );
            return;
        },
    };

    let mut present: Vec<(PathBuf, Signature)> = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let path = entry.path();
                if !extension_allowed(&path, &settings.allowed_extensions) {
                    continue;
                }
                let Ok(meta) = entry.metadata().await else {
                    continue;
                };
                if !meta.is_file() {
                    continue;
                }
                let sig = (
                    meta.len(),
                    meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                );
                present.push((path, sig));
            },
            Ok(None) => break,
            Err(e) => {
                warn!(
                    instance = %delivery.module_id(),
                    error = %e,
                    "Directory entry unreadable, retrying next tick"
                );
                return;
            },
        }
    }

    let to_deliver = {
        let mut table = seen.lock().unwrap_or_else(|e| e.into_inner());

        // Forget files that left the directory.
        table.retain(|path, _| present.iter().any(|(p, _)| p == path));

        let mut ready = Vec::new();
        for (path, sig) in present {
            match table.get(&path).copied() {
                // Stable across two scans: deliver.
                Some(SeenState::Settling(prev)) if prev == sig => {
                    table.insert(path.clone(), SeenState::Delivered(sig));
                    ready.push(path);
                },
                // Still changing, or changed after delivery: settle again.
                Some(SeenState::Settling(_)) => {
                    table.insert(path, SeenState::Settling(sig));
                },
                Some(SeenState::Delivered(prev)) if prev != sig => {
                    debug!(path = %path.display(), "Delivered file changed, re-settling");
                    table.insert(path, SeenState::Settling(sig));
                },
                Some(SeenState::Delivered(_)) => {},
                None => {
                    table.insert(path, SeenState::Settling(sig));
                },
            }
        }
        ready
    };

    for path in to_deliver {
        debug!(
            instance = %delivery.module_id(),
            path = %path.display(),
            "Polled file stable, delivering"
        );
        delivery.deliver(TriggerPayload::File(path));
    }
}
