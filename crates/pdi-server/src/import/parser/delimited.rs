//! Delimited-text parser
//!
//! First line is a header naming the external fields; every following
//! line is one record. A row whose column count differs from the
//! header is a per-row error: logged, skipped, and excluded from the
//! record stream without failing the file.

use csv::ReaderBuilder;
use tracing::warn;

use pdi_common::{PdiError, Result};

use super::{ParseSource, Parser};
use crate::import::record::RawRecord;

pub struct DelimitedParser {
    delimiter: u8,
    records: Vec<RawRecord>,
}

impl DelimitedParser {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            records: Vec::new(),
        }
    }
}

impl Parser for DelimitedParser {
    fn parse(&mut self, source: &ParseSource) -> Result<()> {
        self.records.clear();
        let text = source.read()?;

        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut rows = reader.records();

        let header: Vec<String> = match rows.next() {
            Some(row) => row
                .map_err(|e| PdiError::ParseFormat(format!("unreadable header row: {}", e)))?
                .iter()
                .map(|s| s.trim().to_string())
                .collect(),
            None => return Ok(()), // empty file, nothing to import
        };

        for (line_no, row) in rows.enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(line = line_no + 2, error = %e, "Skipping unreadable row");
                    continue;
                },
            };

            if row.len() != header.len() {
                warn!(
                    line = line_no + 2,
                    expected = header.len(),
                    got = row.len(),
                    "Skipping row with wrong column count"
                );
                continue;
            }

            let record: RawRecord = header
                .iter()
                .zip(row.iter())
                .map(|(name, value)| (name.clone(), value.trim().to_string()))
                .collect();
            self.records.push(record);
        }

        Ok(())
    }

    fn plu_records(&self) -> &[RawRecord] {
        &self.records
    }
}
