//! Pipeline orchestrator
//!
//! Sequences one module activation end to end: pre-query hook, parse,
//! per-record conditioning and conversion, diff against the persisted
//! state, persistence of adds/changes then deletes, and the post
//! hooks. A failure on one record excludes only that record; a parse
//! or persistence failure aborts the activation and leaves pending
//! state intact so the next trigger retries from scratch.

use tracing::{debug, error, info, warn};

use pdi_common::Result;

use super::customer::CustomerProcess;
use super::parser::{ConversionContext, ParseSource, Parser};
use crate::store::ProductStore;

/// Pipeline state for one activation. `Error` is terminal and
/// reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    PreQuery,
    Parse,
    Convert,
    Diff,
    Persist,
    PostProduct,
    PostQuery,
    Error,
}

/// Counters for one activation, logged when the run completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub parsed: usize,
    pub converted: usize,
    pub conversion_failures: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub skipped_unchanged: usize,
}

/// Orchestrates one activation for one module.
pub struct PipelineOrchestrator<'a> {
    instance: &'a str,
    customer: &'a dyn CustomerProcess,
    ctx: &'a ConversionContext,
    store: &'a dyn ProductStore,
    force_update: bool,
    state: PipelineState,
}

impl<'a> PipelineOrchestrator<'a> {
    pub fn new(
        instance: &'a str,
        customer: &'a dyn CustomerProcess,
        ctx: &'a ConversionContext,
        store: &'a dyn ProductStore,
        force_update: bool,
    ) -> Self {
        Self {
            instance,
            customer,
            ctx,
            store,
            force_update,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the pipeline over one trigger payload.
    pub async fn run(
        &mut self,
        parser: &mut dyn Parser,
        source: &ParseSource,
    ) -> Result<RunStats> {
        let mut stats = RunStats::default();

        self.state = PipelineState::PreQuery;
        self.customer.pre_query();

        // Parse failures abort the whole activation.
        self.state = PipelineState::Parse;
        if let Err(e) = parser.parse(source) {
            error!(
                instance = %self.instance,
                source = %source.describe(),
                error = %e,
                "Parse failed, aborting activation"
            );
            self.state = PipelineState::Error;
            return Err(e);
        }
        stats.parsed = parser.plu_records().len();

        // Condition each raw record, then convert through the field
        // map. Conversion drops (and logs) records that fail; the
        // counters reconcile the difference.
        self.state = PipelineState::Convert;
        let conditioned: Vec<_> = parser
            .plu_records()
            .iter()
            .map(|raw| self.customer.data_conditioning(raw.clone()))
            .collect();

        let mut converted = Vec::with_capacity(conditioned.len());
        for raw in &conditioned {
            match super::parser::convert_record(self.ctx, raw) {
                Ok(record) => {
                    let record = self.customer.pre_product_process(record);
                    let record = self.customer.product_process(record);
                    converted.push(record);
                },
                Err(e) => {
                    warn!(instance = %self.instance, error = %e, "Record excluded from run");
                    stats.conversion_failures += 1;
                },
            }
        }
        stats.converted = converted.len();

        let mut delete_keys: Vec<String> = parser
            .convert_deletes_to_product_records(self.ctx)
            .iter()
            .map(|r| r.key().to_string())
            .collect();

        // A bulk delete-all expands to every currently stored key;
        // the activation's own upserts land first, so re-added items
        // survive with their new values.
        if parser.delete_all() {
            let existing = self.handle_store_error(self.store.list_keys().await)?;
            delete_keys = existing;
        }

        self.state = PipelineState::Diff;
        let mut to_upsert = Vec::new();
        for record in converted {
            let current = self
                .handle_store_error(self.store.find_by_key(record.key()).await)?;
            match current {
                Some(existing) if existing == record && !self.force_update => {
                    stats.skipped_unchanged += 1;
                },
                _ => to_upsert.push(record),
            }
        }

        // Upserts before deletes: a key being deleted and re-added in
        // the same batch must not lose its new variant.
        self.state = PipelineState::Persist;
        for record in &to_upsert {
            self.handle_store_error(self.store.upsert(record).await)?;
            stats.upserted += 1;
        }
        for key in &delete_keys {
            if to_upsert.iter().any(|r| r.key() == key) {
                debug!(instance = %self.instance, key = %key, "Delete superseded by upsert");
                continue;
            }
            self.handle_store_error(self.store.delete(key).await)?;
            stats.deleted += 1;
        }

        // Every record that survived conversion was processed, whether
        // or not the diff ended up persisting it.
        self.state = PipelineState::PostProduct;
        for _ in 0..stats.converted {
            self.customer.post_product_process();
        }

        self.state = PipelineState::PostQuery;
        self.customer.post_query();

        self.state = PipelineState::Idle;
        info!(
            instance = %self.instance,
            parsed = stats.parsed,
            converted = stats.converted,
            failed = stats.conversion_failures,
            upserted = stats.upserted,
            deleted = stats.deleted,
            skipped = stats.skipped_unchanged,
            "Activation completed"
        );

        Ok(stats)
    }

    fn handle_store_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result {
            error!(
                instance = %self.instance,
                error = %e,
                "Store operation failed, aborting activation"
            );
            self.state = PipelineState::Error;
        }
        result
    }
}
