//! Historization pipeline for slowly changing entities
//!
//! One batch runs classify, write, close and verify in that order. Every
//! stage reads the store afresh, so a batch interrupted at any point can be
//! run again from scratch.

use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use crate::classifier::{ChangeClassifier, Classification, ClassifiedRecord};
use crate::config::TargetConfig;
use crate::context::RunContext;
use crate::error::{EngineError, StorageError};
use crate::expiry::ExpiryCloser;
use crate::hasher::RowHasher;
use crate::logging::{LogLevel, RunLog};
use crate::record::{LateArrival, SourceRecord};
use crate::surrogate::SurrogateKeyGenerator;
use crate::traits::VersionStore;
use crate::types::{RunCounts, Stage};
use crate::writer::VersionWriter;

/// SCD2 merge of one batch into a historized target
#[derive(Debug, Clone)]
pub struct HistorizationPipeline {
    target: String,
    open_ended: DateTime<Utc>,
    classifier: ChangeClassifier,
    keys: SurrogateKeyGenerator,
    writer: VersionWriter,
    closer: ExpiryCloser,
}

impl HistorizationPipeline {
    /// `open_ended` is the `valid_to` sentinel of current versions; no
    /// version may start at or after it.
    pub fn new(config: &TargetConfig, hasher: RowHasher, open_ended: DateTime<Utc>) -> Self {
        Self {
            target: config.target.clone(),
            open_ended,
            classifier: ChangeClassifier::new(hasher, config.tracked_columns.clone()),
            keys: SurrogateKeyGenerator::new(),
            writer: VersionWriter::new(),
            closer: ExpiryCloser::new(),
        }
    }

    pub fn classifier(&self) -> &ChangeClassifier {
        &self.classifier
    }

    /// Merge `records` into `store`. Errors carry the stage they failed in.
    pub fn process(
        &self,
        store: &dyn VersionStore,
        records: Vec<SourceRecord>,
        ctx: &RunContext,
        log: &mut RunLog,
    ) -> Result<RunCounts, EngineError> {
        let mut counts = RunCounts::default();

        let (records, beyond): (Vec<SourceRecord>, Vec<SourceRecord>) = records
            .into_iter()
            .partition(|record| record.source_updated_at < self.open_ended);
        counts.rejected += beyond.len();
        for record in &beyond {
            let entry = log
                .entry(LogLevel::Warn, "change dated at or after the open-ended valid_to")
                .with_business_key(&record.business_key)
                .with_metadata("source_updated_at", record.source_updated_at.to_rfc3339())
                .with_metadata("open_ended_valid_to", self.open_ended.to_rfc3339());
            log.log(entry);
        }

        let selection = self.classifier.select_latest(records);
        counts.duplicates_discarded = selection.discarded.len();
        for discarded in &selection.discarded {
            let entry = log
                .entry(LogLevel::Debug, "superseded within batch")
                .with_business_key(&discarded.business_key)
                .with_metadata("batch_id", &discarded.batch_id)
                .with_metadata("source_updated_at", discarded.source_updated_at.to_rfc3339());
            log.log(entry);
        }

        let touched: BTreeSet<String> = selection
            .winners
            .iter()
            .map(|(record, _)| record.business_key.clone())
            .collect();
        let open = store
            .open_versions(&touched)
            .map_err(|e| self.fail(e, Stage::Classify, ctx))?;
        let mut classified = self.classifier.classify_batch(selection.winners, &open);
        self.recognise_replays(store, &mut classified, log)
            .map_err(|e| self.fail(e, Stage::Classify, ctx))?;

        let mut late_arrivals = Vec::new();
        for item in &classified {
            match item.classification {
                Classification::NoChange => counts.unchanged += 1,
                Classification::OrderingViolation { current_valid_from } => {
                    counts.rejected += 1;
                    let entry = log
                        .entry(LogLevel::Warn, "out-of-order change not applied")
                        .with_business_key(&item.record.business_key)
                        .with_metadata("source_updated_at", item.record.source_updated_at.to_rfc3339())
                        .with_metadata("current_valid_from", current_valid_from.to_rfc3339());
                    log.log(entry);
                    late_arrivals.push(LateArrival {
                        record: item.record.clone(),
                        row_hash: item.row_hash,
                        current_valid_from,
                        run_id: ctx.run_id().to_string(),
                    });
                }
                Classification::Insert | Classification::Update { .. } => {}
            }
        }

        let summary = self
            .writer
            .write(store, &classified, self.classifier.tracked_columns(), ctx, log)
            .map_err(|e| self.fail(e, Stage::Write, ctx))?;
        counts.inserted = summary.inserted;
        counts.updated = summary.updated;
        counts.already_applied = summary.already_applied;

        for late in late_arrivals {
            store
                .record_late_arrival(late)
                .map_err(|e| self.fail(e, Stage::Write, ctx))?;
        }

        counts.closed = self
            .closer
            .close_keys(store, &touched, log)
            .map_err(|e| self.fail(e, Stage::CloseExpiry, ctx))?;

        self.verify(store, &touched)
            .map_err(|e| self.fail(e, Stage::Verify, ctx))?;

        log.info(format!(
            "historized {} records: {} inserted, {} updated, {} unchanged, {} rejected, {} closed",
            touched.len(),
            counts.inserted,
            counts.updated,
            counts.unchanged,
            counts.rejected,
            counts.closed
        ));
        Ok(counts)
    }

    /// An out-of-order record whose exact version is already stored was
    /// loaded by an earlier run; it is unchanged, not late.
    fn recognise_replays(
        &self,
        store: &dyn VersionStore,
        classified: &mut [ClassifiedRecord],
        log: &mut RunLog,
    ) -> Result<(), StorageError> {
        for item in classified.iter_mut() {
            if !matches!(item.classification, Classification::OrderingViolation { .. }) {
                continue;
            }
            let key = self.keys.generate(&item.record.business_key, item.record.source_updated_at);
            let stored = match store.get(&key)? {
                Some(stored) if stored.row_hash == item.row_hash => stored,
                _ => continue,
            };
            item.classification = Classification::NoChange;
            let entry = log
                .entry(LogLevel::Debug, "version already stored")
                .with_business_key(&item.record.business_key)
                .with_metadata("surrogate_key", stored.surrogate_key);
            log.log(entry);
        }
        Ok(())
    }

    fn fail(&self, error: impl Into<EngineError>, stage: Stage, ctx: &RunContext) -> EngineError {
        error.into().at_stage(&self.target, stage, ctx.window_end())
    }

    /// Every touched key must be left with exactly one open version
    fn verify(&self, store: &dyn VersionStore, touched: &BTreeSet<String>) -> Result<(), EngineError> {
        let open = store.open_versions(touched)?;
        let mut keys: Vec<&String> = open
            .iter()
            .filter(|(_, versions)| versions.len() != 1)
            .map(|(key, _)| key)
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        keys.sort();
        Err(EngineError::Inconsistent {
            target: self.target.clone(),
            reason: format!("more than one open version for {:?}", keys),
        })
    }
}
