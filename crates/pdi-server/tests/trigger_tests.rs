//! Trigger integration tests: a polled directory drop and a scheduled
//! API pull, each running the full pipeline into the store.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pdi_server::config::{
    FileMonitorSettings, ImporterInstance, ScheduleKind, SchedulerServiceSettings, TypeSettings,
};
use pdi_server::control::ControlPublisher;
use pdi_server::fetch::HttpFetcher;
use pdi_server::store::{MemoryStore, ProductStore};
use pdi_server::{ImporterModule, ModuleRegistry};

/// Poll the store until it holds `expected` records or the timeout
/// elapses.
async fn wait_for_records(store: &MemoryStore, expected: usize, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    while store.len().await < expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "store never reached {} records",
            expected
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn write_fieldmap(settings_dir: &Path, name: &str) {
    std::fs::write(
        settings_dir.join(format!("{}.fieldmap.json", name)),
        r#"{"CODE": "PLU", "DESC": "Description", "PRICE": "Price"}"#,
    )
    .unwrap();
}

#[tokio::test]
async fn test_polled_directory_drop_reaches_store() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "poll-drop");

    let instance = ImporterInstance {
        name: "poll-drop".into(),
        display_name: String::new(),
        enabled: true,
        module: "product_file_import".into(),
        customer_process: "default".into(),
        force_update: false,
        settings: TypeSettings::FileMonitor(FileMonitorSettings {
            target_path: drop_dir.path().to_path_buf(),
            poll_interval_ms: 50,
            allowed_extensions: vec!["csv".into()],
            watch: false,
            credentials: None,
        }),
    };

    let registry = ModuleRegistry::new();
    let store = Arc::new(MemoryStore::new());
    let module = ImporterModule::init(
        instance,
        settings_dir.path(),
        store.clone(),
        Arc::new(HttpFetcher::new().unwrap()),
        &registry,
        ControlPublisher::new(),
    )
    .unwrap();

    module.start().await.unwrap();

    // Dropped after the trigger is live; ignored sidecar formats must
    // never reach the parser.
    std::fs::write(drop_dir.path().join("items.csv"), "CODE,PRICE\n1001,1.99\n").unwrap();
    std::fs::write(drop_dir.path().join("items.tmp"), "garbage").unwrap();

    wait_for_records(&store, 1, Duration::from_secs(5)).await;
    let record = store.find_by_key("1001").await.unwrap().unwrap();
    assert_eq!(record.price, 1.99);

    module.stop().await;
}

#[tokio::test]
async fn test_stopped_watch_discards_file_in_settle_window() {
    let drop_dir = tempfile::tempdir().unwrap();
    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "late-drop");

    let instance = ImporterInstance {
        name: "late-drop".into(),
        display_name: String::new(),
        enabled: true,
        module: "product_file_import".into(),
        customer_process: "default".into(),
        force_update: false,
        settings: TypeSettings::FileMonitor(FileMonitorSettings {
            // Wide settle window so the drop is still settling when
            // the module stops.
            target_path: drop_dir.path().to_path_buf(),
            poll_interval_ms: 500,
            allowed_extensions: vec!["csv".into()],
            watch: true,
            credentials: None,
        }),
    };

    let registry = ModuleRegistry::new();
    let store = Arc::new(MemoryStore::new());
    let module = ImporterModule::init(
        instance,
        settings_dir.path(),
        store.clone(),
        Arc::new(HttpFetcher::new().unwrap()),
        &registry,
        ControlPublisher::new(),
    )
    .unwrap();

    module.start().await.unwrap();
    std::fs::write(drop_dir.path().join("items.csv"), "CODE,PRICE\n1001,1.99\n").unwrap();
    module.stop().await;

    // Wait past the settle window: the file was accepted but its
    // delivery must be discarded, never starting a run after stop.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(store.is_empty().await);
    assert_eq!(module.pending_file_count(), 0);
}

#[tokio::test]
async fn test_scheduled_pull_fetches_and_persists() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"CODE": "7001", "DESC": "Oat Milk", "PRICE": 3.49}]"#,
        ))
        .mount(&server)
        .await;

    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "api-pull");
    std::fs::write(
        settings_dir.path().join("api-pull.json"),
        format!(r#"{{"Endpoint": "{}/products"}}"#, server.uri()),
    )
    .unwrap();

    let instance = ImporterInstance {
        name: "api-pull".into(),
        display_name: String::new(),
        enabled: true,
        module: "product_api_import".into(),
        customer_process: "default".into(),
        force_update: false,
        settings: TypeSettings::SchedulerService(SchedulerServiceSettings {
            schedule: ScheduleKind::Interval { secs: 1 },
        }),
    };

    let registry = ModuleRegistry::new();
    let store = Arc::new(MemoryStore::new());
    let module = ImporterModule::init(
        instance,
        settings_dir.path(),
        store.clone(),
        Arc::new(HttpFetcher::new().unwrap()),
        &registry,
        ControlPublisher::new(),
    )
    .unwrap();

    module.start().await.unwrap();
    wait_for_records(&store, 1, Duration::from_secs(10)).await;

    let record = store.find_by_key("7001").await.unwrap().unwrap();
    assert_eq!(record.description, "Oat Milk");

    module.stop().await;
}

#[tokio::test]
async fn test_scheduled_pull_survives_failing_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let settings_dir = tempfile::tempdir().unwrap();
    write_fieldmap(settings_dir.path(), "flaky-pull");
    std::fs::write(
        settings_dir.path().join("flaky-pull.json"),
        format!(r#"{{"Endpoint": "{}/products"}}"#, server.uri()),
    )
    .unwrap();

    let instance = ImporterInstance {
        name: "flaky-pull".into(),
        display_name: String::new(),
        enabled: true,
        module: "product_api_import".into(),
        customer_process: "default".into(),
        force_update: false,
        settings: TypeSettings::SchedulerService(SchedulerServiceSettings {
            schedule: ScheduleKind::Interval { secs: 1 },
        }),
    };

    let registry = ModuleRegistry::new();
    let store = Arc::new(MemoryStore::new());
    let module = ImporterModule::init(
        instance,
        settings_dir.path(),
        store.clone(),
        Arc::new(HttpFetcher::new().unwrap()),
        &registry,
        ControlPublisher::new(),
    )
    .unwrap();

    module.start().await.unwrap();

    // Two firings come and go without a payload; the job must stay
    // scheduled and the process must stay healthy.
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(store.is_empty().await);
    assert_eq!(module.pending_file_count(), 0);

    module.stop().await;
}
