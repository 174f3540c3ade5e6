//! Transactional pipeline: deduplicate, validate and append orders-like rows

use crate::config::TargetConfig;
use crate::context::RunContext;
use crate::dedup::Deduplicator;
use crate::error::{EngineError, StorageError};
use crate::hasher::RowHasher;
use crate::logging::{LogLevel, RunLog};
use crate::record::{SourceRecord, TransactionalRecord};
use crate::surrogate::SurrogateKeyGenerator;
use crate::traits::TransactionalStore;
use crate::types::{RowHash, RunCounts, Stage};
use crate::validator::Validator;

/// Outcome of appending one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// First delivery of the business key
    Inserted,
    /// Newer than the stored latest delivery
    Updated,
    /// Same delivery already stored
    AlreadyApplied,
    /// Older than the stored latest delivery; retained but not surfaced
    Stale,
}

/// One batch into a transactional target. Every delivery is kept; the
/// latest view picks the newest per business key.
#[derive(Debug, Clone)]
pub struct TransactionalPipeline {
    target: String,
    dedup: Deduplicator,
    validator: Validator,
    keys: SurrogateKeyGenerator,
}

impl TransactionalPipeline {
    pub fn new(config: &TargetConfig, hasher: RowHasher, epsilon: f64) -> Self {
        Self {
            target: config.target.clone(),
            dedup: Deduplicator::new(hasher, config.tracked_columns.clone()),
            validator: Validator::new(config.rule_set(), epsilon),
            keys: SurrogateKeyGenerator::new(),
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validated row for one deduplicated delivery
    pub fn build_record(&self, record: &SourceRecord, row_hash: RowHash, ctx: &RunContext) -> TransactionalRecord {
        let outcome = self.validator.validate(&record.attributes);
        TransactionalRecord {
            record_key: self.keys.generate(&record.business_key, record.ingestion_timestamp),
            business_key: record.business_key.clone(),
            attributes: outcome.attributes,
            derived: outcome.derived,
            validation_status: outcome.status,
            flags: outcome.flags,
            row_hash,
            source_updated_at: record.source_updated_at,
            ingestion_timestamp: record.ingestion_timestamp,
            audit: ctx.audit_for(record),
        }
    }

    pub fn process(
        &self,
        store: &dyn TransactionalStore,
        records: Vec<SourceRecord>,
        ctx: &RunContext,
        log: &mut RunLog,
    ) -> Result<RunCounts, EngineError> {
        let mut counts = RunCounts::default();

        let outcome = self.dedup.deduplicate(records);
        counts.duplicates_discarded = outcome.discarded.len();
        for discarded in &outcome.discarded {
            let entry = log
                .entry(LogLevel::Debug, "duplicate delivery discarded")
                .with_business_key(&discarded.business_key)
                .with_metadata("batch_id", &discarded.batch_id)
                .with_metadata("ingestion_timestamp", discarded.ingestion_timestamp.to_rfc3339());
            log.log(entry);
        }

        let validated: Vec<TransactionalRecord> = outcome
            .kept
            .iter()
            .map(|(record, row_hash)| self.build_record(record, *row_hash, ctx))
            .collect();

        for record in &validated {
            if !record.is_valid() {
                counts.flagged += 1;
                let entry = log
                    .entry(LogLevel::Info, "record failed validation")
                    .with_business_key(&record.business_key)
                    .with_metadata("status", &record.validation_status);
                log.log(entry);
            }
            if !record.flags.is_empty() {
                let entry = log
                    .entry(LogLevel::Debug, "record flagged")
                    .with_business_key(&record.business_key)
                    .with_metadata("flags", record.flags.join(","));
                log.log(entry);
            }
        }

        for record in validated {
            let business_key = record.business_key.clone();
            match self.append(store, record).map_err(|e| self.fail(e, Stage::Write, ctx))? {
                AppendOutcome::Inserted => counts.inserted += 1,
                AppendOutcome::Updated => counts.updated += 1,
                AppendOutcome::AlreadyApplied => {
                    counts.unchanged += 1;
                    counts.already_applied += 1;
                }
                AppendOutcome::Stale => {
                    counts.rejected += 1;
                    let entry = log
                        .entry(LogLevel::Warn, "delivery older than stored latest")
                        .with_business_key(&business_key);
                    log.log(entry);
                }
            }
        }

        log.info(format!(
            "loaded {} deliveries: {} inserted, {} updated, {} unchanged, {} stale, {} invalid",
            outcome.kept.len(),
            counts.inserted,
            counts.updated,
            counts.unchanged,
            counts.rejected,
            counts.flagged
        ));
        Ok(counts)
    }

    /// Append one delivery, comparing against what the store already holds
    pub fn append(&self, store: &dyn TransactionalStore, record: TransactionalRecord) -> Result<AppendOutcome, EngineError> {
        if let Some(existing) = store.get(&record.record_key)? {
            return self.resolve_duplicate(&existing, &record);
        }

        let outcome = match store.latest(&record.business_key)? {
            None => AppendOutcome::Inserted,
            Some(latest) if latest.recency() > record.recency() => AppendOutcome::Stale,
            Some(_) => AppendOutcome::Updated,
        };

        let key = record.record_key;
        let probe = record.clone();
        match store.insert(record) {
            Ok(()) => Ok(outcome),
            Err(StorageError::DuplicateKey { .. }) => match store.get(&key)? {
                Some(existing) => self.resolve_duplicate(&existing, &probe),
                None => Err(StorageError::NotFound { key: key.to_string() }.into()),
            },
            Err(e) => Err(e.into()),
        }
    }

    fn resolve_duplicate(&self, existing: &TransactionalRecord, record: &TransactionalRecord) -> Result<AppendOutcome, EngineError> {
        if existing.same_payload(record) {
            Ok(AppendOutcome::AlreadyApplied)
        } else {
            Err(EngineError::KeyConflict {
                target: self.target.clone(),
                key: record.record_key.to_string(),
            })
        }
    }

    fn fail(&self, error: impl Into<EngineError>, stage: Stage, ctx: &RunContext) -> EngineError {
        error.into().at_stage(&self.target, stage, ctx.window_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, ORDERS_TARGET};
    use crate::memory::MemoryTransactionalStore;
    use crate::types::{AttributeValue, Attributes};
    use chrono::{DateTime, TimeZone, Utc};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, hour, 0, 0).unwrap()
    }

    fn pipeline() -> TransactionalPipeline {
        let config = EngineConfig::retail();
        TransactionalPipeline::new(config.target(ORDERS_TARGET).unwrap(), RowHasher::default(), config.epsilon)
    }

    fn order(key: &str, shipping: f64, total: f64, ingested: u32) -> SourceRecord {
        let mut attributes = Attributes::new();
        attributes.insert("order_id".into(), key.into());
        attributes.insert("customer_id".into(), "CUST-1".into());
        attributes.insert("order_status".into(), "SHIPPED".into());
        attributes.insert("payment_method".into(), "PIX".into());
        attributes.insert("subtotal".into(), AttributeValue::Number(100.0));
        attributes.insert("discount_amount".into(), AttributeValue::Number(0.0));
        attributes.insert("shipping_cost".into(), AttributeValue::Number(shipping));
        attributes.insert("total_amount".into(), AttributeValue::Number(total));
        SourceRecord {
            business_key: key.to_string(),
            attributes,
            source_updated_at: ts(0),
            ingestion_timestamp: ts(ingested),
            batch_id: format!("b{}", ingested),
            source_system: "sqlserver".to_string(),
        }
    }

    fn run(store: &MemoryTransactionalStore, records: Vec<SourceRecord>, hour: u32) -> RunCounts {
        let ctx = RunContext::new(ORDERS_TARGET, ts(hour - 1), ts(hour));
        let mut log = RunLog::new(ORDERS_TARGET, ctx.loaded_at(), LogLevel::Debug);
        pipeline().process(store, records, &ctx, &mut log).unwrap()
    }

    #[test]
    fn test_duplicates_collapse_to_latest_delivery() {
        let store = MemoryTransactionalStore::new();
        let counts = run(&store, vec![order("O1", 14.99, 114.99, 1), order("O1", 9.99, 109.99, 2)], 3);

        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.duplicates_discarded, 1);
        let latest = store.latest("O1").unwrap().unwrap();
        assert_eq!(latest.attributes["shipping_cost"], AttributeValue::Number(9.99));
        assert!(latest.is_valid());
    }

    #[test]
    fn test_rerun_is_already_applied() {
        let store = MemoryTransactionalStore::new();
        run(&store, vec![order("O1", 5.0, 105.0, 1)], 2);
        let counts = run(&store, vec![order("O1", 5.0, 105.0, 1)], 2);

        assert_eq!(counts.already_applied, 1);
        assert_eq!(counts.written(), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_record_is_kept_and_counted() {
        let store = MemoryTransactionalStore::new();
        let counts = run(&store, vec![order("O1", 5.0, 999.0, 1)], 2);

        assert_eq!(counts.flagged, 1);
        let stored = store.latest("O1").unwrap().unwrap();
        assert_eq!(stored.validation_status.label(), "INVALID_TOTAL");
        assert_eq!(stored.attributes["total_amount"], AttributeValue::Number(105.0));
        assert_eq!(stored.derived["declared_total_amount"], AttributeValue::Number(999.0));
    }
}
