//! Import pipeline
//!
//! Everything between a trigger firing and a canonical product record
//! landing in the store: triggers, the module registry, parsers and
//! field mapping, customer hook strategies, and the orchestrator that
//! sequences one activation.

pub mod customer;
pub mod fieldmap;
pub mod module;
pub mod orchestrator;
pub mod parser;
pub mod record;
pub mod registry;
pub mod trigger;

pub use module::ImporterModule;
pub use registry::ModuleRegistry;
