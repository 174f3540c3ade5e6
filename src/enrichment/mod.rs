//! Enrichment stage: projects current versions into consumption-ready rows
//!
//! Enrichers are pure functions of one row plus an explicit `as_of` date.
//! Output is recomputed from scratch on every call and ordered by business
//! key, so the same target state always yields the same rows.

mod customer;
mod order;
mod product;

pub use customer::CustomerEnricher;
pub use order::OrderEnricher;
pub use product::ProductEnricher;

use std::collections::BTreeMap;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use crate::config::{CUSTOMERS_TARGET, ORDERS_TARGET, PRODUCTS_TARGET};
use crate::error::ConfigError;
use crate::record::{HistorizedVersion, TransactionalRecord};
use crate::types::{AttributeValue, Attributes};

/// Derives attributes for the rows of one target
pub trait Enricher: Send + Sync {
    /// Target whose rows this enricher understands
    fn target(&self) -> &str;

    /// Derived attributes for one row
    fn derive(&self, attributes: &Attributes, as_of: NaiveDate) -> Attributes;
}

/// A base row with its derived attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRow {
    pub business_key: String,
    pub attributes: Attributes,
    pub derived: Attributes,
}

impl EnrichedRow {
    /// Derived value if present, else the base attribute
    pub fn get(&self, column: &str) -> Option<&AttributeValue> {
        self.derived.get(column).or_else(|| self.attributes.get(column))
    }
}

/// Ordered upper bounds mapping a number to a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierScale {
    /// `(exclusive upper bound, label)`, ascending
    bands: Vec<(f64, String)>,
    top: String,
}

impl TierScale {
    pub fn new(bands: &[(f64, &str)], top: &str) -> Self {
        Self {
            bands: bands.iter().map(|(bound, label)| (*bound, label.to_string())).collect(),
            top: top.to_string(),
        }
    }

    pub fn classify(&self, value: f64) -> &str {
        self.bands
            .iter()
            .find(|(bound, _)| value < *bound)
            .map_or(self.top.as_str(), |(_, label)| label.as_str())
    }
}

/// Whole days from `from` to `as_of`; negative when `from` lies in the future
pub fn days_between(from: NaiveDate, as_of: NaiveDate) -> i64 {
    (as_of - from).num_days()
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Enrichers keyed by target
#[derive(Default)]
pub struct EnrichmentStage {
    enrichers: BTreeMap<String, Box<dyn Enricher>>,
}

impl std::fmt::Debug for EnrichmentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnrichmentStage")
            .field("targets", &self.enrichers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EnrichmentStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enricher(mut self, enricher: Box<dyn Enricher>) -> Self {
        self.enrichers.insert(enricher.target().to_string(), enricher);
        self
    }

    /// Customers, products and orders of the retail preset
    pub fn retail() -> Self {
        Self::new()
            .with_enricher(Box::new(CustomerEnricher::new(CUSTOMERS_TARGET)))
            .with_enricher(Box::new(ProductEnricher::new(PRODUCTS_TARGET)))
            .with_enricher(Box::new(OrderEnricher::new(ORDERS_TARGET)))
    }

    pub fn supports(&self, target: &str) -> bool {
        self.enrichers.contains_key(target)
    }

    fn enricher(&self, target: &str) -> Result<&dyn Enricher, ConfigError> {
        self.enrichers
            .get(target)
            .map(|e| e.as_ref())
            .ok_or_else(|| ConfigError::UnknownTarget {
                target: target.to_string(),
            })
    }

    /// Enrich the current versions among `versions`; closed ones are skipped
    pub fn enrich_versions(
        &self,
        target: &str,
        versions: &[HistorizedVersion],
        as_of: NaiveDate,
    ) -> Result<Vec<EnrichedRow>, ConfigError> {
        let enricher = self.enricher(target)?;
        let mut rows: Vec<EnrichedRow> = versions
            .iter()
            .filter(|v| v.is_current())
            .map(|v| EnrichedRow {
                business_key: v.business_key.clone(),
                derived: enricher.derive(&v.attributes, as_of),
                attributes: v.attributes.clone(),
            })
            .collect();
        rows.sort_by(|a, b| a.business_key.cmp(&b.business_key));
        Ok(rows)
    }

    /// Enrich the latest view of a transactional target
    pub fn enrich_records(
        &self,
        target: &str,
        records: &[TransactionalRecord],
        as_of: NaiveDate,
    ) -> Result<Vec<EnrichedRow>, ConfigError> {
        let enricher = self.enricher(target)?;
        let mut rows: Vec<EnrichedRow> = records
            .iter()
            .map(|record| {
                let mut attributes = record.attributes.clone();
                attributes.extend(record.derived.clone());
                attributes.insert(
                    "validation_status".to_string(),
                    AttributeValue::text(record.validation_status.label()),
                );
                attributes.insert("dq_flags".to_string(), AttributeValue::text(record.flags.join(",")));
                EnrichedRow {
                    business_key: record.business_key.clone(),
                    derived: enricher.derive(&attributes, as_of),
                    attributes,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.business_key.cmp(&b.business_key));
        Ok(rows)
    }
}
