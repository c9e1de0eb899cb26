//! Fixed-format batch protocol parser
//!
//! A batch file is a header line followed by one command line per
//! item, fields separated by `|`. The leading command code routes each
//! line: item add/change and price-change lines feed the add stream,
//! delete lines feed the delete stream, and `X` requests a bulk
//! delete-all. Unknown command codes are logged and skipped.
//!
//! ```text
//! H|20260826-01
//! A|1001|Gala Apples|1.99|0.01|LB|5
//! C|1002|Bartlett Pears|2.29|0.01|LB|5
//! P|1003|0.99
//! D|1004
//! X
//! ```

use tracing::warn;

use pdi_common::{PdiError, Result};

use super::{ParseSource, Parser};
use crate::import::record::RawRecord;

/// Positional external field names for add/change lines.
const ITEM_FIELDS: &[&str] = &[
    "PLU",
    "Description",
    "Price",
    "TareWeight",
    "UnitOfMeasure",
    "Department",
];

/// Positional external field names for price-change lines.
const PRICE_FIELDS: &[&str] = &["PLU", "Price"];

#[derive(Default)]
pub struct BatchParser {
    records: Vec<RawRecord>,
    deleted: Vec<RawRecord>,
    delete_all: bool,
}

impl BatchParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn positional_record(fields: &[&str], names: &[&str]) -> RawRecord {
        names
            .iter()
            .zip(fields.iter())
            .map(|(name, value)| (name.to_string(), value.trim().to_string()))
            .collect()
    }
}

impl Parser for BatchParser {
    fn parse(&mut self, source: &ParseSource) -> Result<()> {
        self.records.clear();
        self.deleted.clear();
        self.delete_all = false;

        let text = source.read()?;
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

        match lines.next() {
            Some((_, header)) if header.starts_with('H') => {},
            Some((_, header)) => {
                return Err(PdiError::ParseFormat(format!(
                    "batch file must start with an H header line, got: {}",
                    header
                )));
            },
            None => {
                return Err(PdiError::ParseFormat("empty batch file".into()));
            },
        }

        for (line_no, line) in lines {
            let fields: Vec<&str> = line.split('|').collect();
            let code = fields[0].trim();

            match code {
                "A" | "C" => {
                    if fields.len() < 2 {
                        warn!(line = line_no + 1, "Skipping item line without a PLU");
                        continue;
                    }
                    self.records
                        .push(Self::positional_record(&fields[1..], ITEM_FIELDS));
                },
                "P" => {
                    if fields.len() < 3 {
                        warn!(line = line_no + 1, "Skipping malformed price-change line");
                        continue;
                    }
                    self.records
                        .push(Self::positional_record(&fields[1..], PRICE_FIELDS));
                },
                "D" => {
                    if fields.len() < 2 {
                        warn!(line = line_no + 1, "Skipping delete line without a PLU");
                        continue;
                    }
                    self.deleted
                        .push(Self::positional_record(&fields[1..], &["PLU"]));
                },
                "X" => {
                    self.delete_all = true;
                },
                other => {
                    warn!(
                        line = line_no + 1,
                        code = %other,
                        "Skipping line with unknown command code"
                    );
                },
            }
        }

        Ok(())
    }

    fn plu_records(&self) -> &[RawRecord] {
        &self.records
    }

    fn deleted_records(&self) -> &[RawRecord] {
        &self.deleted
    }

    fn delete_all(&self) -> bool {
        self.delete_all
    }
}
