//! Raw and canonical product records
//!
//! A [`RawRecord`] is the ordered field map a parser extracts from one
//! source row or item. A [`ProductRecord`] is the canonical form every
//! source converts into. Each canonical attribute is reachable through
//! a statically-built setter table keyed by attribute name, so field
//! mapping never needs runtime type introspection.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use pdi_common::{PdiError, Result};

/// Ordered mapping from external field name to external field value,
/// one per source row/item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing an existing value in place so field
    /// order stays stable.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.fields.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

/// Canonical product record ("products" table form).
///
/// A module builds one pre-populated template at init (defaults plus
/// customer static fields) and clones it per raw record, so static
/// fields are never re-derived per record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    /// Price look-up code; the natural key for diffing and persistence
    pub plu: String,
    pub barcode: String,
    pub description: String,
    pub description2: String,
    pub ingredients: String,
    pub unit_of_measure: String,
    pub department: i64,
    pub price: f64,
    pub tare_weight: f64,
    pub shelf_life_days: i64,
    pub effective_date: Option<NaiveDate>,
    pub active: bool,
    pub discountable: bool,
    pub taxable: bool,
}

impl ProductRecord {
    /// The natural key used by the diff step.
    pub fn key(&self) -> &str {
        &self.plu
    }
}

/// Semantic type of a canonical attribute, driving raw-string coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Text,
    Integer,
    Decimal,
    Date,
    Boolean,
}

/// One entry in the canonical attribute table: name, semantic type,
/// and a setter into [`ProductRecord`].
pub struct AttributeSpec {
    pub name: &'static str,
    pub kind: AttrKind,
    set_text: Option<fn(&mut ProductRecord, String)>,
    set_integer: Option<fn(&mut ProductRecord, i64)>,
    set_decimal: Option<fn(&mut ProductRecord, f64)>,
    set_date: Option<fn(&mut ProductRecord, NaiveDate)>,
    set_boolean: Option<fn(&mut ProductRecord, bool)>,
}

macro_rules! text_attr {
    ($name:literal, $field:ident) => {
        AttributeSpec {
            name: $name,
            kind: AttrKind::Text,
            set_text: Some(|r, v| r.$field = v),
            set_integer: None,
            set_decimal: None,
            set_date: None,
            set_boolean: None,
        }
    };
}

macro_rules! integer_attr {
    ($name:literal, $field:ident) => {
        AttributeSpec {
            name: $name,
            kind: AttrKind::Integer,
            set_text: None,
            set_integer: Some(|r, v| r.$field = v),
            set_decimal: None,
            set_date: None,
            set_boolean: None,
        }
    };
}

macro_rules! decimal_attr {
    ($name:literal, $field:ident) => {
        AttributeSpec {
            name: $name,
            kind: AttrKind::Decimal,
            set_text: None,
            set_integer: None,
            set_decimal: Some(|r, v| r.$field = v),
            set_date: None,
            set_boolean: None,
        }
    };
}

macro_rules! boolean_attr {
    ($name:literal, $field:ident) => {
        AttributeSpec {
            name: $name,
            kind: AttrKind::Boolean,
            set_text: None,
            set_integer: None,
            set_decimal: None,
            set_date: None,
            set_boolean: Some(|r, v| r.$field = v),
        }
    };
}

/// The canonical attribute table, built once and shared.
static ATTRIBUTES: &[AttributeSpec] = &[
    text_attr!("PLU", plu),
    text_attr!("Barcode", barcode),
    text_attr!("Description", description),
    text_attr!("Description2", description2),
    text_attr!("Ingredients", ingredients),
    text_attr!("UnitOfMeasure", unit_of_measure),
    integer_attr!("Department", department),
    decimal_attr!("Price", price),
    decimal_attr!("TareWeight", tare_weight),
    integer_attr!("ShelfLifeDays", shelf_life_days),
    AttributeSpec {
        name: "EffectiveDate",
        kind: AttrKind::Date,
        set_text: None,
        set_integer: None,
        set_decimal: None,
        set_date: Some(|r, v| r.effective_date = Some(v)),
        set_boolean: None,
    },
    boolean_attr!("Active", active),
    boolean_attr!("Discountable", discountable),
    boolean_attr!("Taxable", taxable),
];

/// Date formats accepted during coercion, tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Look up a canonical attribute by name.
pub fn attribute_by_name(name: &str) -> Option<&'static AttributeSpec> {
    ATTRIBUTES.iter().find(|a| a.name == name)
}

impl AttributeSpec {
    /// Coerce a raw string and set the attribute on `record`.
    ///
    /// Boolean attributes are set by exact-string equality against the
    /// BooleanMap literal for the external field (`bool_true`); no
    /// entry means no value ever reads as true. All other kinds parse
    /// the raw string into the declared type; a failed parse is a
    /// per-field conversion error, leaving the record's other fields
    /// untouched.
    pub fn set_from_raw(
        &self,
        record: &mut ProductRecord,
        raw: &str,
        bool_true: Option<&str>,
    ) -> Result<()> {
        match self.kind {
            AttrKind::Text => {
                if let Some(set) = self.set_text {
                    set(record, raw.to_string());
                }
                Ok(())
            },
            AttrKind::Integer => {
                let value: i64 = raw.trim().parse().map_err(|_| self.conversion_error(raw))?;
                if let Some(set) = self.set_integer {
                    set(record, value);
                }
                Ok(())
            },
            AttrKind::Decimal => {
                let value: f64 = raw.trim().parse().map_err(|_| self.conversion_error(raw))?;
                if let Some(set) = self.set_decimal {
                    set(record, value);
                }
                Ok(())
            },
            AttrKind::Date => {
                let trimmed = raw.trim();
                let value = DATE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
                    .ok_or_else(|| self.conversion_error(raw))?;
                if let Some(set) = self.set_date {
                    set(record, value);
                }
                Ok(())
            },
            AttrKind::Boolean => {
                let value = bool_true.is_some_and(|literal| literal == raw);
                if let Some(set) = self.set_boolean {
                    set(record, value);
                }
                Ok(())
            },
        }
    }

    fn conversion_error(&self, raw: &str) -> PdiError {
        PdiError::RecordConversion {
            field: self.name.to_string(),
            message: format!("cannot coerce '{}' to {:?}", raw, self.kind),
        }
    }
}
