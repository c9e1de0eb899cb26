//! Field mapping and boolean coercion tables
//!
//! A [`FieldMap`] maps external field names to canonical attribute
//! names; a [`BooleanMap`] holds, per external field, the literal
//! string interpreted as boolean-true (equality, not parsing). Both
//! are loaded once per parser family from named settings files.

use std::collections::HashMap;

use tracing::warn;

use super::record::attribute_by_name;
use crate::config::Settings;

/// External field name → canonical attribute name.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    /// Build from a settings file whose keys are external field names
    /// and values are canonical attribute names.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            entries: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Iterate (external field, canonical attribute) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(e, c)| (e.as_str(), c.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check every mapped canonical attribute against the attribute
    /// table. An entry targeting no known attribute is a configuration
    /// mistake worth surfacing, but not fatal: the entry is simply
    /// never applied. Returns the unknown attribute names.
    pub fn check_coverage(&self, instance: &str) -> Vec<String> {
        let mut unknown = Vec::new();
        for (external, canonical) in self.iter() {
            if attribute_by_name(canonical).is_none() {
                warn!(
                    instance = %instance,
                    external_field = %external,
                    attribute = %canonical,
                    "Field map entry targets no known product attribute"
                );
                unknown.push(canonical.to_string());
            }
        }
        unknown
    }
}

/// External field name → literal string that reads as true.
#[derive(Debug, Clone, Default)]
pub struct BooleanMap {
    map: HashMap<String, String>,
}

impl BooleanMap {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            map: settings
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            map: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The literal that means true for this external field, if any.
    pub fn true_literal(&self, external_field: &str) -> Option<&str> {
        self.map.get(external_field).map(String::as_str)
    }
}
