//! End-to-end pipeline tests through a live importer module.
//!
//! These drive `trigger_process` directly and observe the store, so
//! they cover the run-serialization and diff guarantees rather than
//! any single layer.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pdi_common::Result;
use pdi_server::config::{FileMonitorSettings, ImporterInstance, TypeSettings};
use pdi_server::control::ControlPublisher;
use pdi_server::fetch::ApiFetcher;
use pdi_server::import::record::ProductRecord;
use pdi_server::import::trigger::TriggerPayload;
use pdi_server::store::{MemoryStore, ProductStore};
use pdi_server::{ImporterModule, ModuleRegistry};

/// Store wrapper that records how many persistence calls overlap and
/// widens each call so overlap would actually be observable.
struct ProbeStore {
    inner: MemoryStore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    upserts: AtomicUsize,
}

impl ProbeStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            upserts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProductStore for ProbeStore {
    async fn upsert(&self, record: &ProductRecord) -> Result<()> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = self.inner.upsert(record).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await
    }

    async fn find_by_key(&self, key: &str) -> Result<Option<ProductRecord>> {
        self.inner.find_by_key(key).await
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.inner.list_keys().await
    }
}

struct NoFetch;

#[async_trait]
impl ApiFetcher for NoFetch {
    async fn get(&self, _endpoint: &str, _token: Option<&str>) -> Result<Option<String>> {
        Ok(None)
    }
}

fn file_instance(name: &str, drop_dir: &Path) -> ImporterInstance {
    ImporterInstance {
        name: name.into(),
        display_name: String::new(),
        enabled: true,
        module: "product_file_import".into(),
        customer_process: "default".into(),
        force_update: false,
        settings: TypeSettings::FileMonitor(FileMonitorSettings {
            target_path: drop_dir.to_path_buf(),
            poll_interval_ms: 50,
            allowed_extensions: vec!["csv".into()],
            watch: false,
            credentials: None,
        }),
    }
}

fn write_fieldmap(settings_dir: &Path, name: &str) {
    std::fs::write(
        settings_dir.join(format!("{}.fieldmap.json", name)),
        r#"{"CODE": "PLU", "DESC": "Description", "PRICE": "Price"}"#,
    )
    .unwrap();
}

fn init_module(
    name: &str,
    drop_dir: &Path,
    settings_dir: &Path,
    store: Arc<dyn ProductStore>,
) -> Arc<ImporterModule> {
    ImporterModule::init(
        file_instance(name, drop_dir),
        settings_dir,
        store,
        Arc::new(NoFetch),
        &ModuleRegistry::new(),
        ControlPublisher::new(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_rapid_triggers_never_overlap_persistence() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "probe");

    let first = drop_dir.path().join("first.csv");
    let second = drop_dir.path().join("second.csv");
    std::fs::write(&first, "CODE,PRICE\n1001,1.99\n1002,2.49\n").unwrap();
    std::fs::write(&second, "CODE,PRICE\n2001,3.99\n2002,4.49\n").unwrap();

    let store = Arc::new(ProbeStore::new());
    let module = init_module("probe", drop_dir.path(), settings_dir.path(), store.clone());

    // Two callbacks in rapid succession: the second queues behind the
    // first and is drained by the same loop, so both complete by the
    // time the join returns.
    tokio::join!(
        module.trigger_process(TriggerPayload::File(first)),
        module.trigger_process(TriggerPayload::File(second)),
    );

    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
    assert_eq!(store.upserts.load(Ordering::SeqCst), 4);
    assert_eq!(store.inner.len().await, 4);
    assert_eq!(module.pending_file_count(), 0);
}

#[tokio::test]
async fn test_second_identical_run_persists_nothing() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "diff");

    let file = drop_dir.path().join("items.csv");
    std::fs::write(&file, "CODE,DESC,PRICE\n1001,Gala Apples,1.99\n").unwrap();

    let store = Arc::new(ProbeStore::new());
    let module = init_module("diff", drop_dir.path(), settings_dir.path(), store.clone());

    module.trigger_process(TriggerPayload::File(file.clone())).await;
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);

    module.trigger_process(TriggerPayload::File(file)).await;
    assert_eq!(store.upserts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_changed_row_is_repersisted() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "change");

    let file = drop_dir.path().join("items.csv");
    std::fs::write(&file, "CODE,PRICE\n1001,1.99\n").unwrap();

    let store = Arc::new(MemoryStore::new());
    let module = init_module("change", drop_dir.path(), settings_dir.path(), store.clone());

    module.trigger_process(TriggerPayload::File(file.clone())).await;
    std::fs::write(&file, "CODE,PRICE\n1001,2.49\n").unwrap();
    module.trigger_process(TriggerPayload::File(file)).await;

    let record = store.find_by_key("1001").await.unwrap().unwrap();
    assert_eq!(record.price, 2.49);
}

#[tokio::test]
async fn test_fetched_payload_runs_pipeline() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "fetched");
    std::fs::write(
        settings_dir.path().join("fetched.json"),
        r#"{"Parser": "json"}"#,
    )
    .unwrap();

    let store = Arc::new(MemoryStore::new());
    let module = init_module("fetched", drop_dir.path(), settings_dir.path(), store.clone());

    let body = r#"[{"CODE": "9001", "DESC": "Bulk Oats", "PRICE": 0.89}]"#;
    module
        .trigger_process(TriggerPayload::Fetched(body.to_string()))
        .await;

    let record = store.find_by_key("9001").await.unwrap().unwrap();
    assert_eq!(record.description, "Bulk Oats");
    assert_eq!(record.price, 0.89);
}
