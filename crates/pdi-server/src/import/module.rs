//! Importer module
//!
//! Binds one ingestion trigger, one parser, one customer process, and
//! a product-record template. `trigger_process` is the entry point a
//! trigger lands on; it enforces at-most-one concurrent pipeline run
//! per module instance by queueing payloads that arrive mid-run and
//! draining them sequentially once the in-flight run completes.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{error, info};

use pdi_common::types::InstanceStatus;
use pdi_common::{PdiError, Result};

use super::customer::{self, CustomerProcess};
use super::orchestrator::PipelineOrchestrator;
use super::parser::{parser_by_name, ConversionContext};
use super::record::ProductRecord;
use super::registry::ModuleRegistry;
use super::trigger::{build_trigger, IngestionTrigger, TriggerDelivery, TriggerPayload};
use crate::config::{ImporterInstance, Settings, TypeSettings};
use crate::control::ControlPublisher;
use crate::fetch::ApiFetcher;
use crate::import::fieldmap::{BooleanMap, FieldMap};
use crate::store::ProductStore;

/// Known importer module kinds and the trigger family each requires.
const FILE_IMPORT: &str = "product_file_import";
const API_IMPORT: &str = "product_api_import";

#[derive(Default)]
struct RunState {
    running: bool,
    queued: VecDeque<TriggerPayload>,
}

pub struct ImporterModule {
    instance: ImporterInstance,
    parser_name: String,
    tunables: Settings,
    customer: Arc<dyn CustomerProcess>,
    ctx: ConversionContext,
    store: Arc<dyn ProductStore>,
    publisher: ControlPublisher,
    trigger: OnceLock<Box<dyn IngestionTrigger>>,
    force_update: AtomicBool,
    started: AtomicBool,
    run_state: Mutex<RunState>,
}

impl ImporterModule {
    /// Initialize one module from its instance descriptor: resolve the
    /// customer process, load the field/boolean maps and tunables,
    /// build the template, register in the registry, and construct the
    /// trigger. Every failure here is a configuration error surfaced
    /// at startup, never at steady state.
    pub fn init(
        instance: ImporterInstance,
        settings_dir: &Path,
        store: Arc<dyn ProductStore>,
        fetcher: Arc<dyn ApiFetcher>,
        registry: &ModuleRegistry,
        publisher: ControlPublisher,
    ) -> Result<Arc<Self>> {
        let default_parser = match (instance.module.as_str(), &instance.settings) {
            (FILE_IMPORT, TypeSettings::FileMonitor(_)) => "delimited",
            (API_IMPORT, TypeSettings::SchedulerService(_)) => "json",
            (FILE_IMPORT | API_IMPORT, _) => {
                return Err(PdiError::Configuration(format!(
                    "instance '{}': module '{}' does not accept the configured settings type",
                    instance.name, instance.module
                )));
            },
            (other, _) => {
                return Err(PdiError::Configuration(format!(
                    "instance '{}': unknown module: {}",
                    instance.name, other
                )));
            },
        };

        let customer = customer::by_name(&instance.customer_process)?;

        let tunables = load_optional(settings_dir, &instance.name)?.unwrap_or_default();
        let field_map_settings = Settings::load(settings_dir, &format!("{}.fieldmap", instance.name))?;
        let field_map = FieldMap::from_settings(&field_map_settings);
        field_map.check_coverage(&instance.name);
        let boolean_map = load_optional(settings_dir, &format!("{}.booleanmap", instance.name))?
            .map(|s| BooleanMap::from_settings(&s))
            .unwrap_or_default();

        let parser_name = tunables
            .get("Parser")
            .unwrap_or(default_parser)
            .to_string();
        // Validate the parser choice now, not on first trigger.
        parser_by_name(&parser_name, &tunables)?;

        // The template carries module defaults plus customer static
        // fields; it is cloned per record, never mutated after init.
        let mut template = ProductRecord::default();
        customer.static_template_fields(&mut template);

        let ctx = ConversionContext {
            instance: instance.name.clone(),
            template,
            field_map,
            boolean_map,
        };

        let module = Arc::new(Self {
            force_update: AtomicBool::new(instance.force_update),
            instance,
            parser_name,
            tunables,
            customer,
            ctx,
            store,
            publisher,
            trigger: OnceLock::new(),
            started: AtomicBool::new(false),
            run_state: Mutex::new(RunState::default()),
        });

        registry.register(&module.instance.name, Arc::clone(&module));

        let delivery = TriggerDelivery::new(registry.clone(), module.instance.name.clone());
        let trigger = build_trigger(&module.instance.settings, &module.tunables, delivery, fetcher)?;
        let _ = module.trigger.set(trigger);

        info!(
            instance = %module.instance.name,
            module = %module.instance.module,
            customer = %module.instance.customer_process,
            parser = %module.parser_name,
            "Module initialized"
        );
        Ok(module)
    }

    pub fn name(&self) -> &str {
        &self.instance.name
    }

    pub async fn start(&self) -> Result<()> {
        if let Some(trigger) = self.trigger.get() {
            trigger.start().await?;
        }
        self.started.store(true, Ordering::SeqCst);
        self.publisher
            .publish("info", format!("instance '{}' started", self.instance.name));
        Ok(())
    }

    /// Stop the trigger from producing further callbacks. An in-flight
    /// pipeline run completes or fails on its own.
    pub async fn stop(&self) {
        if let Some(trigger) = self.trigger.get() {
            trigger.stop().await;
        }
        self.started.store(false, Ordering::SeqCst);
        self.publisher
            .publish("info", format!("instance '{}' stopped", self.instance.name));
    }

    pub fn force_update(&self) -> bool {
        self.force_update.load(Ordering::SeqCst)
    }

    pub fn set_force_update(&self, enabled: bool) {
        self.force_update.store(enabled, Ordering::SeqCst);
        info!(
            instance = %self.instance.name,
            enabled = enabled,
            "Force-update flag changed"
        );
    }

    /// Queued-but-unprocessed work: payloads waiting on the module
    /// plus whatever the trigger has accepted but not yet handed over.
    pub fn pending_file_count(&self) -> usize {
        let queued = {
            let state = self.run_state.lock().unwrap_or_else(|e| e.into_inner());
            state.queued.len()
        };
        let trigger_pending = self
            .trigger
            .get()
            .map(|t| t.queued_count())
            .unwrap_or(0);
        queued + trigger_pending
    }

    pub fn status(&self) -> InstanceStatus {
        InstanceStatus {
            name: self.instance.name.clone(),
            running: self.started.load(Ordering::SeqCst),
            force_update: self.force_update(),
            pending_files: self.pending_file_count(),
        }
    }

    /// Trigger entry point. At most one pipeline run per module is in
    /// flight at any time: a payload arriving mid-run is queued and
    /// picked up by the drain loop once the current run completes,
    /// re-read fresh rather than merged.
    pub async fn trigger_process(&self, payload: TriggerPayload) {
        {
            let mut state = self.run_state.lock().unwrap_or_else(|e| e.into_inner());
            state.queued.push_back(payload);
            if state.running {
                return;
            }
            state.running = true;
        }

        loop {
            let next = {
                let mut state = self.run_state.lock().unwrap_or_else(|e| e.into_inner());
                match state.queued.pop_front() {
                    Some(payload) => payload,
                    None => {
                        state.running = false;
                        break;
                    },
                }
            };
            self.run_pipeline(next).await;
        }
    }

    async fn run_pipeline(&self, payload: TriggerPayload) {
        let source = payload.into_source();

        let mut parser = match parser_by_name(&self.parser_name, &self.tunables) {
            Ok(parser) => parser,
            Err(e) => {
                // Validated at init; only reachable if tunables claim
                // a parser this build does not know.
                error!(instance = %self.instance.name, error = %e, "Cannot build parser");
                return;
            },
        };

        let mut orchestrator = PipelineOrchestrator::new(
            &self.instance.name,
            self.customer.as_ref(),
            &self.ctx,
            self.store.as_ref(),
            self.force_update(),
        );

        match orchestrator.run(parser.as_mut(), &source).await {
            Ok(stats) => {
                self.publisher.publish(
                    "info",
                    format!(
                        "instance '{}' run complete: {} upserted, {} deleted, {} skipped",
                        self.instance.name, stats.upserted, stats.deleted, stats.skipped_unchanged
                    ),
                );
            },
            Err(e) => {
                error!(
                    instance = %self.instance.name,
                    source = %source.describe(),
                    error = %e,
                    "Pipeline run failed"
                );
                self.publisher.publish(
                    "error",
                    format!("instance '{}' run failed: {}", self.instance.name, e),
                );
            },
        }
    }
}

/// Load a named settings file if it exists; absence is not an error.
fn load_optional(dir: &Path, name: &str) -> Result<Option<Settings>> {
    if dir.join(format!("{}.json", name)).is_file() {
        Settings::load(dir, name).map(Some)
    } else {
        Ok(None)
    }
}
