//! Source-format parsers
//!
//! A parser turns one trigger payload into ordered raw-record
//! sequences (`plu_records` for adds/updates, `deleted_records` for
//! formats that encode deletes explicitly), then converts them into
//! canonical product records through the shared field-mapping routine.

mod batch;
mod delimited;
mod json;

pub use batch::BatchParser;
pub use delimited::DelimitedParser;
pub use json::JsonParser;

use std::path::PathBuf;

use tracing::warn;

use pdi_common::{PdiError, Result};

use super::fieldmap::{BooleanMap, FieldMap};
use super::record::{attribute_by_name, ProductRecord, RawRecord};
use crate::config::Settings;

/// What a trigger handed the module: a dropped file or a fetched body.
#[derive(Debug, Clone)]
pub enum ParseSource {
    File(PathBuf),
    Text(String),
}

impl ParseSource {
    /// Materialize the source as text.
    pub fn read(&self) -> Result<String> {
        match self {
            ParseSource::File(path) => std::fs::read_to_string(path).map_err(PdiError::Io),
            ParseSource::Text(text) => Ok(text.clone()),
        }
    }

    /// Short label for logging.
    pub fn describe(&self) -> String {
        match self {
            ParseSource::File(path) => path.display().to_string(),
            ParseSource::Text(text) => format!("<fetched {} bytes>", text.len()),
        }
    }
}

/// Everything the conversion routine needs from the owning module.
#[derive(Debug, Clone, Default)]
pub struct ConversionContext {
    /// Owning instance name, for log attribution
    pub instance: String,
    /// Pre-built canonical template, cloned per record
    pub template: ProductRecord,
    pub field_map: FieldMap,
    pub boolean_map: BooleanMap,
}

/// Parser over one source format.
pub trait Parser: Send {
    /// Populate `plu_records` (and `deleted_records` where the format
    /// supports explicit deletes) from the source.
    fn parse(&mut self, source: &ParseSource) -> Result<()>;

    /// Raw add/update records, in source order.
    fn plu_records(&self) -> &[RawRecord];

    /// Raw delete records, in source order. Empty for formats without
    /// explicit deletes.
    fn deleted_records(&self) -> &[RawRecord] {
        &[]
    }

    /// Whether the source carried a bulk delete-all instruction.
    fn delete_all(&self) -> bool {
        false
    }

    /// Convert the add/update stream to canonical records.
    fn convert_to_product_records(&self, ctx: &ConversionContext) -> Vec<ProductRecord> {
        convert_all(ctx, self.plu_records())
    }

    /// Convert the delete stream to canonical records.
    fn convert_deletes_to_product_records(&self, ctx: &ConversionContext) -> Vec<ProductRecord> {
        convert_all(ctx, self.deleted_records())
    }
}

/// Resolve a parser implementation by name, using per-module settings
/// for format tunables. Unknown names fail module init.
pub fn parser_by_name(name: &str, tunables: &Settings) -> Result<Box<dyn Parser>> {
    match name {
        "delimited" => {
            let delimiter = match tunables.get("Delimiter") {
                Some(s) => match s.as_bytes() {
                    [b] if b.is_ascii() => *b,
                    _ => {
                        return Err(PdiError::Configuration(format!(
                            "Delimiter must be a single ASCII character, got '{}'",
                            s
                        )));
                    },
                },
                None => b',',
            };
            Ok(Box::new(DelimitedParser::new(delimiter)))
        },
        "json" => Ok(Box::new(JsonParser::new())),
        "batch" => Ok(Box::new(BatchParser::new())),
        other => Err(PdiError::Configuration(format!(
            "unknown parser: {}",
            other
        ))),
    }
}

/// Convert a raw-record stream, dropping (and logging) records that
/// fail structurally while keeping the rest of the batch.
fn convert_all(ctx: &ConversionContext, records: &[RawRecord]) -> Vec<ProductRecord> {
    let mut converted = Vec::with_capacity(records.len());
    for raw in records {
        match convert_record(ctx, raw) {
            Ok(record) => converted.push(record),
            Err(e) => {
                warn!(
                    instance = %ctx.instance,
                    error = %e,
                    "Dropping record that failed conversion"
                );
            },
        }
    }
    converted
}

/// Convert one raw record to a canonical product record.
///
/// Clones the module template, then applies every field-map entry the
/// raw record carries. A coercion failure on one field is logged and
/// that field is skipped; the record keeps its other fields. Missing
/// external fields keep the template default. A record that ends up
/// without a PLU has no natural key and is rejected.
pub fn convert_record(ctx: &ConversionContext, raw: &RawRecord) -> Result<ProductRecord> {
    let mut record = ctx.template.clone();

    for (external, canonical) in ctx.field_map.iter() {
        let Some(raw_value) = raw.get(external) else {
            continue;
        };
        // Unknown attributes were already reported at module init.
        let Some(spec) = attribute_by_name(canonical) else {
            continue;
        };

        if let Err(e) =
            spec.set_from_raw(&mut record, raw_value, ctx.boolean_map.true_literal(external))
        {
            warn!(
                instance = %ctx.instance,
                external_field = %external,
                error = %e,
                "Skipping field that failed coercion"
            );
        }
    }

    if record.plu.is_empty() {
        return Err(PdiError::RecordConversion {
            field: "PLU".to_string(),
            message: "record has no natural key".to_string(),
        });
    }

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ctx() -> ConversionContext {
        ConversionContext {
            instance: "test".into(),
            template: ProductRecord {
                department: 5,
                unit_of_measure: "EA".into(),
                ..Default::default()
            },
            field_map: FieldMap::from_pairs([
                ("CODE", "PLU"),
                ("DESC", "Description"),
                ("PRICE", "Price"),
                ("ACTIVE", "Active"),
            ]),
            boolean_map: BooleanMap::from_pairs([("ACTIVE", "Y")]),
        }
    }

    #[test]
    fn test_convert_applies_mapped_fields_only() {
        let ctx = test_ctx();
        let raw: RawRecord = [("CODE", "1001"), ("DESC", "Gala Apples"), ("PRICE", "1.99")]
            .into_iter()
            .collect();

        let record = convert_record(&ctx, &raw).unwrap();
        assert_eq!(record.plu, "1001");
        assert_eq!(record.description, "Gala Apples");
        assert_eq!(record.price, 1.99);
        // Unmapped attributes keep the template defaults.
        assert_eq!(record.department, 5);
        assert_eq!(record.unit_of_measure, "EA");
    }

    #[test]
    fn test_convert_skips_bad_field_keeps_record() {
        let ctx = test_ctx();
        let raw: RawRecord = [("CODE", "1002"), ("PRICE", "two dollars")]
            .into_iter()
            .collect();

        let record = convert_record(&ctx, &raw).unwrap();
        assert_eq!(record.plu, "1002");
        // Failed coercion leaves the template default in place.
        assert_eq!(record.price, 0.0);
    }

    #[test]
    fn test_convert_requires_natural_key() {
        let ctx = test_ctx();
        let raw: RawRecord = [("DESC", "No key")].into_iter().collect();
        assert!(convert_record(&ctx, &raw).is_err());
    }

    #[test]
    fn test_boolean_through_conversion() {
        let ctx = test_ctx();
        let raw: RawRecord = [("CODE", "1003"), ("ACTIVE", "Y")].into_iter().collect();
        assert!(convert_record(&ctx, &raw).unwrap().active);

        let raw: RawRecord = [("CODE", "1003"), ("ACTIVE", "y")].into_iter().collect();
        assert!(!convert_record(&ctx, &raw).unwrap().active);
    }

    #[test]
    fn test_parser_by_name_unknown_is_config_error() {
        let err = parser_by_name("xml", &Settings::default()).err().unwrap();
        assert!(matches!(err, PdiError::Configuration(_)));
    }

    #[test]
    fn test_delimiter_from_settings() {
        let tunables = Settings::from_pairs([("Delimiter", "|")]);
        assert!(parser_by_name("delimited", &tunables).is_ok());
    }

    #[test]
    fn test_delimiter_must_be_one_ascii_character() {
        let wide = Settings::from_pairs([("Delimiter", "§")]);
        let err = parser_by_name("delimited", &wide).err().unwrap();
        assert!(matches!(err, PdiError::Configuration(_)));

        let long = Settings::from_pairs([("Delimiter", "||")]);
        let err = parser_by_name("delimited", &long).err().unwrap();
        assert!(matches!(err, PdiError::Configuration(_)));
    }
}
