//! Ingestion triggers
//!
//! A trigger owns its own concurrency (watcher thread, poll timer,
//! scheduler task) and signals its bound module when new data is
//! ready. Delivery always goes through the module registry by
//! identity string, so an execution context never holds a direct
//! module reference across an async boundary, and stopping a trigger
//! never aborts an in-flight pipeline run.

mod file_poll;
mod file_watch;
mod scheduled;

pub use file_poll::FilePollTrigger;
pub use file_watch::FileWatchTrigger;
pub use scheduled::ScheduledTrigger;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{error, info};

use pdi_common::{PdiError, Result};

use crate::config::{ShareCredentials, TypeSettings};
use crate::fetch::ApiFetcher;
use crate::import::parser::ParseSource;
use crate::import::registry::ModuleRegistry;

/// What a trigger hands to its module.
#[derive(Debug, Clone)]
pub enum TriggerPayload {
    /// A file that appeared in a watched or polled directory
    File(PathBuf),
    /// A body fetched from a remote endpoint
    Fetched(String),
}

impl TriggerPayload {
    pub fn into_source(self) -> ParseSource {
        match self {
            TriggerPayload::File(path) => ParseSource::File(path),
            TriggerPayload::Fetched(body) => ParseSource::Text(body),
        }
    }
}

/// Route from a trigger's execution context back to its module.
///
/// Carries only the module identity; resolution happens at delivery
/// time through the registry. A resolution miss is logged and the
/// payload discarded, never panicked past the task boundary.
#[derive(Clone)]
pub struct TriggerDelivery {
    registry: ModuleRegistry,
    module_id: String,
}

impl TriggerDelivery {
    pub fn new(registry: ModuleRegistry, module_id: impl Into<String>) -> Self {
        Self {
            registry,
            module_id: module_id.into(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// Hand a payload to the module on its own task.
    pub fn deliver(&self, payload: TriggerPayload) {
        match self.registry.resolve(&self.module_id) {
            Some(module) => {
                tokio::spawn(async move {
                    module.trigger_process(payload).await;
                });
            },
            None => {
                let miss = PdiError::Registration(self.module_id.clone());
                error!(error = %miss, "Discarding trigger payload for unknown module");
            },
        }
    }
}

/// An ingestion trigger bound to one module.
#[async_trait]
pub trait IngestionTrigger: Send + Sync {
    /// Start producing callbacks. Construction already validated the
    /// settings, so failures here are environmental (missing path,
    /// watcher registration).
    async fn start(&self) -> Result<()>;

    /// Stop producing further callbacks. Must not abort an in-flight
    /// pipeline run.
    async fn stop(&self);

    /// Files or events accepted but not yet handed to the module.
    fn queued_count(&self) -> usize;
}

/// Build the trigger an instance's settings describe. Malformed
/// settings fail here, not on first fire.
pub fn build_trigger(
    settings: &TypeSettings,
    tunables: &crate::config::Settings,
    delivery: TriggerDelivery,
    fetcher: Arc<dyn ApiFetcher>,
) -> Result<Box<dyn IngestionTrigger>> {
    match settings {
        TypeSettings::FileMonitor(fm) => {
            if fm.watch {
                Ok(Box::new(FileWatchTrigger::new(fm.clone(), delivery)))
            } else {
                Ok(Box::new(FilePollTrigger::new(fm.clone(), delivery)))
            }
        },
        TypeSettings::SchedulerService(ss) => {
            let endpoint = tunables
                .get("Endpoint")
                .ok_or_else(|| {
                    PdiError::Configuration(format!(
                        "instance '{}': scheduled trigger requires an Endpoint setting",
                        delivery.module_id()
                    ))
                })?
                .to_string();
            let bearer_token = tunables.get("BearerToken").map(str::to_string);

            Ok(Box::new(ScheduledTrigger::new(
                &ss.schedule,
                endpoint,
                bearer_token,
                fetcher,
                delivery,
            )?))
        },
    }
}

/// Case-insensitive extension filter; no extension never matches.
pub(crate) fn extension_allowed(path: &Path, allowed: &[String]) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    allowed.iter().any(|a| a.eq_ignore_ascii_case(ext))
}

/// Wait until a file's size and mtime stop changing.
///
/// Returns false if the file vanishes or never settles within the
/// check budget; callers skip the file and rely on a later event.
pub(crate) async fn wait_for_stable(path: &Path, settle: Duration) -> bool {
    const MAX_CHECKS: u32 = 10;

    let mut last: Option<(u64, SystemTime)> = None;
    for _ in 0..MAX_CHECKS {
        let sig = match tokio::fs::metadata(path).await {
            Ok(meta) => (
                meta.len(),
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            ),
            Err(_) => return false,
        };
        if last == Some(sig) {
            return true;
        }
        last = Some(sig);
        tokio::time::sleep(settle).await;
    }
    false
}

/// Network-share credentials apply only while establishing access to
/// the watched path; record that they were presented without exposing
/// the secret.
pub(crate) fn log_share_credentials(instance: &str, credentials: Option<&ShareCredentials>) {
    if let Some(creds) = credentials {
        info!(
            instance = %instance,
            domain = %creds.domain,
            username = %creds.username,
            "Using network share credentials for watched path"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter_case_insensitive() {
        let allowed = vec!["csv".to_string(), "txt".to_string()];
        assert!(extension_allowed(Path::new("/d/a.CSV"), &allowed));
        assert!(extension_allowed(Path::new("/d/a.txt"), &allowed));
        assert!(!extension_allowed(Path::new("/d/a.json"), &allowed));
        assert!(!extension_allowed(Path::new("/d/noext"), &allowed));
    }

    #[tokio::test]
    async fn test_stability_vanished_file() {
        assert!(!wait_for_stable(Path::new("/nonexistent/file.csv"), Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_stability_settled_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drop.csv");
        std::fs::write(&path, "A,B\n1,2\n").unwrap();
        assert!(wait_for_stable(&path, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_delivery_to_unknown_module_is_logged_not_panicked() {
        let delivery = TriggerDelivery::new(ModuleRegistry::new(), "ghost");
        delivery.deliver(TriggerPayload::Fetched("{}".into()));
    }
}
