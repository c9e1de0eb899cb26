//! PDI Server Library
//!
//! Retail product-data import daemon.
//!
//! # Overview
//!
//! The daemon runs a set of independent importer instances, each
//! binding one ingestion trigger, one parser, and one customer rule
//! set:
//!
//! - **Triggers**: file watch, file poll, or scheduled API pull
//! - **Parsers**: delimited text, JSON, batch-update format
//! - **Field Mapping**: external field names mapped onto the canonical
//!   product record through a statically-built attribute table
//! - **Orchestrator**: sequences customer hooks, conversion, diff, and
//!   persistence for one activation
//! - **Control Plane**: a length-framed TCP protocol streaming log
//!   lines to, and accepting commands from, the `pdi-ctl` client
//!
//! # Architecture
//!
//! Each instance's trigger owns its own concurrency and delivers
//! payloads through the module registry by identity string, so async
//! execution contexts never hold direct module references. A module
//! serializes its pipeline runs: at most one activation is in flight,
//! later triggers queue and re-read fresh data when drained.
//!
//! # Example
//!
//! ```no_run
//! use pdi_server::config::{load_instances, Config};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let instances = load_instances(&config.instances_file)?;
//!     println!("{} instances configured", instances.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod control;
pub mod fetch;
pub mod import;
pub mod store;

// Re-export commonly used types
pub use import::{ImporterModule, ModuleRegistry};
