//! Customer process strategies
//!
//! Hook points the pipeline orchestrator invokes around conversion and
//! persistence. Every method defaults to a no-op/identity so a new
//! customer only overrides what it actually changes. Adding a customer
//! means adding a variant here and listing it in [`by_name`], not
//! deepening an inheritance tree.

use std::sync::Arc;

use pdi_common::{PdiError, Result};

use super::record::{ProductRecord, RawRecord};

/// Per-customer hook points, all optional.
pub trait CustomerProcess: Send + Sync {
    /// Implementation name, as referenced from instance configuration.
    fn name(&self) -> &'static str;

    /// Static fields applied once to the module's product template.
    fn static_template_fields(&self, _template: &mut ProductRecord) {}

    /// Invoked once before the run touches any data.
    fn pre_query(&self) {}

    /// Format-specific cleanup of one raw record before conversion.
    fn data_conditioning(&self, record: RawRecord) -> RawRecord {
        record
    }

    /// Adjust one converted record before the customer business step.
    fn pre_product_process(&self, record: ProductRecord) -> ProductRecord {
        record
    }

    /// Customer business rules on one converted record.
    fn product_process(&self, record: ProductRecord) -> ProductRecord {
        record
    }

    /// Invoked once per processed record after persistence.
    fn post_product_process(&self) {}

    /// Invoked once when the run completes.
    fn post_query(&self) {}
}

/// Resolve a customer process by its configured name.
pub fn by_name(name: &str) -> Result<Arc<dyn CustomerProcess>> {
    match name {
        "default" => Ok(Arc::new(DefaultProcess)),
        "harvest_market" => Ok(Arc::new(HarvestMarketProcess)),
        other => Err(PdiError::Configuration(format!(
            "unknown customer process: {}",
            other
        ))),
    }
}

/// Pass-through strategy used when a customer needs no special rules.
pub struct DefaultProcess;

impl CustomerProcess for DefaultProcess {
    fn name(&self) -> &'static str {
        "default"
    }
}

/// Harvest Market scale drops carry two quirks: free-text fields use
/// `~` as a soft line break, and the description arrives as a single
/// `DESC_SIZE` composite (`name/pack-size`) that must be split into
/// the two real fields before mapping.
pub struct HarvestMarketProcess;

impl CustomerProcess for HarvestMarketProcess {
    fn name(&self) -> &'static str {
        "harvest_market"
    }

    fn static_template_fields(&self, template: &mut ProductRecord) {
        template.taxable = false;
        template.unit_of_measure = "LB".to_string();
    }

    fn data_conditioning(&self, record: RawRecord) -> RawRecord {
        let mut out = RawRecord::new();
        for (name, value) in record.iter() {
            out.set(name, value.replace('~', " ").trim().to_string());
        }

        if let Some(composite) = out.get("DESC_SIZE").map(str::to_string) {
            let (desc, size) = match composite.split_once('/') {
                Some((desc, size)) => (desc.trim().to_string(), size.trim().to_string()),
                None => (composite, String::new()),
            };
            out.set("DESC", desc);
            out.set("SIZE", size);
        }

        out
    }

    fn product_process(&self, mut record: ProductRecord) -> ProductRecord {
        // Department 99 is the store's clearance range; those items
        // never qualify for further discounts.
        if record.department == 99 {
            record.discountable = false;
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_name_resolves_known_variants() {
        assert_eq!(by_name("default").unwrap().name(), "default");
        assert_eq!(by_name("harvest_market").unwrap().name(), "harvest_market");
    }

    #[test]
    fn test_by_name_unknown_is_config_error() {
        assert!(matches!(
            by_name("nonexistent"),
            Err(PdiError::Configuration(_))
        ));
    }

    #[test]
    fn test_default_process_is_identity() {
        let process = DefaultProcess;
        let raw: RawRecord = [("A", "1")].into_iter().collect();
        assert_eq!(process.data_conditioning(raw.clone()), raw);

        let record = ProductRecord {
            plu: "1".into(),
            ..Default::default()
        };
        assert_eq!(process.product_process(record.clone()), record);
    }

    #[test]
    fn test_harvest_market_conditioning() {
        let process = HarvestMarketProcess;
        let raw: RawRecord = [
            ("DESC_SIZE", "Gala~Apples / 3LB"),
            ("NOTES", "keep~cold"),
        ]
        .into_iter()
        .collect();

        let conditioned = process.data_conditioning(raw);
        assert_eq!(conditioned.get("DESC"), Some("Gala Apples"));
        assert_eq!(conditioned.get("SIZE"), Some("3LB"));
        assert_eq!(conditioned.get("NOTES"), Some("keep cold"));
    }

    #[test]
    fn test_harvest_market_clearance_rule() {
        let process = HarvestMarketProcess;
        let record = ProductRecord {
            plu: "1".into(),
            department: 99,
            discountable: true,
            ..Default::default()
        };
        assert!(!process.product_process(record).discountable);
    }
}
