//! Error types for PDI

use thiserror::Error;

/// Result type alias for PDI operations
pub type Result<T> = std::result::Result<T, PdiError>;

/// Main error type for PDI
///
/// The variants follow the propagation policy of the import pipeline:
/// `Configuration` fails fast at load/init and never at steady state;
/// `TransientIo` is logged and retried on the next natural trigger;
/// `RecordConversion` is isolated to one record; `ParseFormat` aborts
/// the whole file; `Framing` disconnects the control channel.
#[derive(Error, Debug)]
pub enum PdiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transient IO error: {0}")]
    TransientIo(String),

    #[error("Record conversion error for field '{field}': {message}")]
    RecordConversion { field: String, message: String },

    #[error("Parse format error: {0}")]
    ParseFormat(String),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Module not registered: {0}")]
    Registration(String),

    #[error("Connect timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl PdiError {
    /// Whether the error invalidates only the current cycle and may be
    /// retried on the next trigger.
    pub fn is_transient(&self) -> bool {
        matches!(self, PdiError::TransientIo(_))
    }
}
