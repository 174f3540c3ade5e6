//! Change classification of incoming records against current versions

use std::collections::{BTreeMap, HashMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::hasher::RowHasher;
use crate::record::{HistorizedVersion, SourceRecord};
use crate::types::{ChangeKind, RowHash, SurrogateKey};

/// Outcome of comparing one record with the current version of its key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// No current version exists
    Insert,
    /// Current version exists with a different fingerprint
    Update { previous: SurrogateKey },
    /// Fingerprints match; nothing to write
    NoChange,
    /// Changed, but not newer than the current version; retained for audit only
    OrderingViolation { current_valid_from: DateTime<Utc> },
}

impl Classification {
    /// The write this classification leads to, if any
    pub fn change_kind(&self) -> Option<ChangeKind> {
        match self {
            Classification::Insert => Some(ChangeKind::Insert),
            Classification::Update { .. } => Some(ChangeKind::Update),
            Classification::NoChange => Some(ChangeKind::NoChange),
            Classification::OrderingViolation { .. } => None,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Classification::Insert | Classification::Update { .. })
    }
}

/// A record with its fingerprint and classification
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedRecord {
    pub record: SourceRecord,
    pub row_hash: RowHash,
    pub classification: Classification,
}

/// Result of collapsing a batch to one record per business key
#[derive(Debug, Clone, Default)]
pub struct BatchSelection {
    /// One record per business key, ordered by business key
    pub winners: Vec<(SourceRecord, RowHash)>,
    /// Records that lost the tie-break
    pub discarded: Vec<SourceRecord>,
}

/// The version treated as current: latest `valid_from` among open versions.
///
/// More than one version is open only between the writer and the closer.
pub fn current_of(open: &[HistorizedVersion]) -> Option<&HistorizedVersion> {
    open.iter()
        .max_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.surrogate_key.cmp(&b.surrogate_key)))
}

/// Labels incoming records INSERT / UPDATE / NO_CHANGE
#[derive(Debug, Clone)]
pub struct ChangeClassifier {
    hasher: RowHasher,
    tracked_columns: Vec<String>,
}

impl ChangeClassifier {
    pub fn new(hasher: RowHasher, tracked_columns: Vec<String>) -> Self {
        Self {
            hasher,
            tracked_columns,
        }
    }

    pub fn tracked_columns(&self) -> &[String] {
        &self.tracked_columns
    }

    /// Fingerprint of the tracked attributes of `record`
    pub fn fingerprint(&self, record: &SourceRecord) -> RowHash {
        self.hasher.hash_tracked(&record.attributes, &self.tracked_columns)
    }

    /// Keep only the latest record per business key.
    ///
    /// Ordered by `source_updated_at`, then ingestion timestamp, batch id and
    /// fingerprint, so the winner does not depend on arrival order.
    pub fn select_latest(&self, records: Vec<SourceRecord>) -> BatchSelection {
        let mut best: BTreeMap<String, (SourceRecord, RowHash)> = BTreeMap::new();
        let mut discarded = Vec::new();

        for record in records {
            let hash = self.fingerprint(&record);
            let wins = match best.get(&record.business_key) {
                Some((current, current_hash)) => precedence(&record, &hash) > precedence(current, current_hash),
                None => true,
            };

            if !wins {
                discarded.push(record);
            } else if let Some((previous, _)) = best.insert(record.business_key.clone(), (record, hash)) {
                discarded.push(previous);
            }
        }

        BatchSelection {
            winners: best.into_values().collect(),
            discarded,
        }
    }

    /// Classify one record given the current version of its key
    pub fn classify(
        &self,
        record: &SourceRecord,
        row_hash: RowHash,
        current: Option<&HistorizedVersion>,
    ) -> Classification {
        match current {
            None => Classification::Insert,
            Some(current) if current.row_hash == row_hash => Classification::NoChange,
            Some(current) if record.source_updated_at <= current.valid_from => {
                Classification::OrderingViolation {
                    current_valid_from: current.valid_from,
                }
            }
            Some(current) => Classification::Update {
                previous: current.surrogate_key,
            },
        }
    }

    /// Classify batch winners against the open versions of their keys
    pub fn classify_batch(
        &self,
        winners: Vec<(SourceRecord, RowHash)>,
        open: &HashMap<String, Vec<HistorizedVersion>>,
    ) -> Vec<ClassifiedRecord> {
        winners
            .into_iter()
            .map(|(record, row_hash)| {
                let current = open
                    .get(&record.business_key)
                    .and_then(|versions| current_of(versions));
                let classification = self.classify(&record, row_hash, current);
                ClassifiedRecord {
                    record,
                    row_hash,
                    classification,
                }
            })
            .collect()
    }
}

fn precedence<'a>(record: &'a SourceRecord, hash: &RowHash) -> (DateTime<Utc>, DateTime<Utc>, &'a str, RowHash) {
    (
        record.source_updated_at,
        record.ingestion_timestamp,
        record.batch_id.as_str(),
        *hash,
    )
}
