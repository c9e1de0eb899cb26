//! JSON parsers
//!
//! Two accepted shapes: a top-level array of flat objects (one object
//! per item), or a batch envelope `{"items": [...], "deleted": [...]}`.
//! Structural parse errors are fatal for the whole file; there is no
//! partial recovery from malformed JSON.

use serde_json::Value;
use tracing::warn;

use pdi_common::{PdiError, Result};

use super::{ParseSource, Parser};
use crate::import::record::RawRecord;

#[derive(Default)]
pub struct JsonParser {
    records: Vec<RawRecord>,
    deleted: Vec<RawRecord>,
}

impl JsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn item_to_record(item: &Value) -> Option<RawRecord> {
        let object = item.as_object()?;
        let mut record = RawRecord::new();
        for (key, value) in object {
            match value {
                Value::String(s) => record.set(key.clone(), s.clone()),
                Value::Number(n) => record.set(key.clone(), n.to_string()),
                Value::Bool(b) => record.set(key.clone(), b.to_string()),
                Value::Null => {},
                other => {
                    warn!(field = %key, "Ignoring non-scalar JSON field: {}", other);
                },
            }
        }
        Some(record)
    }

    fn collect(items: &[Value], out: &mut Vec<RawRecord>) -> Result<()> {
        for item in items {
            match Self::item_to_record(item) {
                Some(record) => out.push(record),
                None => {
                    return Err(PdiError::ParseFormat(format!(
                        "expected a JSON object per item, got: {}",
                        item
                    )));
                },
            }
        }
        Ok(())
    }
}

impl Parser for JsonParser {
    fn parse(&mut self, source: &ParseSource) -> Result<()> {
        self.records.clear();
        self.deleted.clear();

        let text = source.read()?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|e| PdiError::ParseFormat(format!("invalid JSON: {}", e)))?;

        match &root {
            Value::Array(items) => Self::collect(items, &mut self.records),
            Value::Object(envelope) => {
                let items = envelope
                    .get("items")
                    .and_then(Value::as_array)
                    .ok_or_else(|| {
                        PdiError::ParseFormat("batch envelope is missing 'items' array".into())
                    })?;
                Self::collect(items, &mut self.records)?;

                if let Some(deleted) = envelope.get("deleted") {
                    let deleted = deleted.as_array().ok_or_else(|| {
                        PdiError::ParseFormat("'deleted' must be an array".into())
                    })?;
                    Self::collect(deleted, &mut self.deleted)?;
                }
                Ok(())
            },
            other => Err(PdiError::ParseFormat(format!(
                "expected array or batch envelope at top level, got: {}",
                other
            ))),
        }
    }

    fn plu_records(&self) -> &[RawRecord] {
        &self.records
    }

    fn deleted_records(&self) -> &[RawRecord] {
        &self.deleted
    }
}
