//! Version writer: append-only inserts of new historized versions

use crate::classifier::ClassifiedRecord;
use crate::context::RunContext;
use crate::error::{EngineError, StorageError};
use crate::lifecycle::VersionState;
use crate::logging::{LogLevel, RunLog};
use crate::record::HistorizedVersion;
use crate::surrogate::SurrogateKeyGenerator;
use crate::traits::VersionStore;
use crate::types::ChangeKind;

/// What a write pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Versions found already stored with an identical payload
    pub already_applied: usize,
}

/// Appends INSERT and UPDATE outcomes as open versions. Never updates or
/// deletes a stored row.
#[derive(Debug, Clone, Default)]
pub struct VersionWriter {
    keys: SurrogateKeyGenerator,
}

impl VersionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The open version a classified record becomes
    pub fn build_version(&self, classified: &ClassifiedRecord, tracked: &[String], ctx: &RunContext) -> HistorizedVersion {
        let record = &classified.record;
        HistorizedVersion {
            surrogate_key: self.keys.generate(&record.business_key, record.source_updated_at),
            business_key: record.business_key.clone(),
            attributes: record.tracked_attributes(tracked),
            row_hash: classified.row_hash,
            valid_from: record.source_updated_at,
            state: VersionState::Open,
            audit: ctx.audit_for(record),
        }
    }

    /// Write every INSERT and UPDATE in `records`; other outcomes are skipped
    pub fn write(
        &self,
        store: &dyn VersionStore,
        records: &[ClassifiedRecord],
        tracked: &[String],
        ctx: &RunContext,
        log: &mut RunLog,
    ) -> Result<WriteSummary, EngineError> {
        let mut summary = WriteSummary::default();

        for classified in records {
            let kind = match classified.classification.change_kind() {
                Some(kind @ (ChangeKind::Insert | ChangeKind::Update)) => kind,
                _ => continue,
            };
            let version = self.build_version(classified, tracked, ctx);
            let key = version.surrogate_key;

            if insert_version(store, version, ctx.target())? {
                match kind {
                    ChangeKind::Insert => summary.inserted += 1,
                    _ => summary.updated += 1,
                }
                let entry = log
                    .entry(LogLevel::Debug, format!("{} written", kind))
                    .with_business_key(&classified.record.business_key)
                    .with_metadata("surrogate_key", key);
                log.log(entry);
            } else {
                summary.already_applied += 1;
                let entry = log
                    .entry(LogLevel::Info, "version already applied")
                    .with_business_key(&classified.record.business_key)
                    .with_metadata("surrogate_key", key);
                log.log(entry);
            }
        }

        Ok(summary)
    }
}

/// Insert `version`, treating a stored row with the same payload as success.
///
/// Returns `true` if the row was newly inserted, `false` if it was already there.
fn insert_version(store: &dyn VersionStore, version: HistorizedVersion, target: &str) -> Result<bool, EngineError> {
    let key = version.surrogate_key;
    let probe = version.clone();
    match store.insert(version) {
        Ok(()) => Ok(true),
        Err(StorageError::DuplicateKey { .. }) => match store.get(&key)? {
            Some(existing) if existing.same_payload(&probe) => Ok(false),
            Some(_) => Err(EngineError::KeyConflict {
                target: target.to_string(),
                key: key.to_string(),
            }),
            None => Err(StorageError::NotFound { key: key.to_string() }.into()),
        },
        Err(e) => Err(e.into()),
    }
}
