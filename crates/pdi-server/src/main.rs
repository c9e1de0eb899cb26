//! PDI Server - Main entry point

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tracing::{info, warn};

use pdi_common::logging::{init_logging, LogConfig};
use pdi_server::{
    config::{load_instances, Config},
    control::{ControlListener, ControlPublisher},
    fetch::HttpFetcher,
    import::{ImporterModule, ModuleRegistry},
    store::MemoryStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Server defaults first, then environment overrides on top
    let log_config = LogConfig::builder()
        .log_file_prefix("pdi-server".to_string())
        .filter_directives("pdi_server=debug,pdi_common=debug".to_string())
        .build()
        .with_env_overrides()?;

    init_logging(&log_config)?;

    info!("Starting PDI Server");

    // Load configuration
    let config = Config::load()?;
    info!(
        "Configuration loaded - instances file: {}",
        config.instances_file.display()
    );

    let instances = load_instances(&config.instances_file)?;
    info!("{} importer instances configured", instances.len());

    let registry = ModuleRegistry::new();
    let publisher = ControlPublisher::new();
    let store = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(HttpFetcher::new()?);

    // Initialize every instance up front; a bad descriptor is a
    // startup failure, not a steady-state one.
    let mut modules = Vec::new();
    for instance in instances {
        if !instance.enabled {
            info!(instance = %instance.name, "Instance disabled, skipping");
            continue;
        }
        let module = ImporterModule::init(
            instance,
            &config.settings_dir,
            store.clone(),
            fetcher.clone(),
            &registry,
            publisher.clone(),
        )?;
        modules.push(module);
    }

    for module in &modules {
        module.start().await?;
        info!(instance = %module.name(), "Instance started");
    }

    // Start the control-plane listener
    let _control_handle = if config.control.enabled {
        let listener = ControlListener::bind(
            &config.control.bind_addr,
            registry.clone(),
            publisher.clone(),
        )
        .await?;
        info!("Control plane listening on {}", config.control.bind_addr);
        Some(listener.spawn())
    } else {
        info!("Control plane disabled (PDI_CONTROL_ENABLED=false)");
        None
    };

    shutdown_signal().await;

    // Stop triggers first; in-flight runs complete on their own.
    for module in &modules {
        module.stop().await;
    }

    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    let deadline = tokio::time::Instant::now() + grace;
    for module in &modules {
        while module.pending_file_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    instance = %module.name(),
                    pending = module.pending_file_count(),
                    "Shutdown timeout reached with work still pending"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    info!("Server shut down gracefully");

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
