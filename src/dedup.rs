//! Deduplication of transactional deliveries

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use crate::hasher::RowHasher;
use crate::record::SourceRecord;
use crate::types::RowHash;

/// Result of collapsing deliveries to one per business key
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// Latest delivery per business key, ordered by business key
    pub kept: Vec<(SourceRecord, RowHash)>,
    pub discarded: Vec<SourceRecord>,
}

/// Latest `ingestion_timestamp` wins. Pure selection; attribute values of the
/// discarded deliveries are never merged into the winner.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    hasher: RowHasher,
    tracked_columns: Vec<String>,
}

impl Deduplicator {
    pub fn new(hasher: RowHasher, tracked_columns: Vec<String>) -> Self {
        Self {
            hasher,
            tracked_columns,
        }
    }

    pub fn fingerprint(&self, record: &SourceRecord) -> RowHash {
        self.hasher.hash_tracked(&record.attributes, &self.tracked_columns)
    }

    pub fn deduplicate(&self, records: Vec<SourceRecord>) -> DedupOutcome {
        let mut kept: BTreeMap<String, (SourceRecord, RowHash)> = BTreeMap::new();
        let mut discarded = Vec::new();

        for record in records {
            let hash = self.fingerprint(&record);
            let wins = match kept.get(&record.business_key) {
                Some((current, current_hash)) => rank(&record, &hash) > rank(current, current_hash),
                None => true,
            };

            if !wins {
                discarded.push(record);
            } else if let Some((previous, _)) = kept.insert(record.business_key.clone(), (record, hash)) {
                discarded.push(previous);
            }
        }

        DedupOutcome {
            kept: kept.into_values().collect(),
            discarded,
        }
    }
}

// Ties on ingestion time fall back to source time, batch id and fingerprint
fn rank<'a>(record: &'a SourceRecord, hash: &RowHash) -> (DateTime<Utc>, DateTime<Utc>, &'a str, RowHash) {
    (
        record.ingestion_timestamp,
        record.source_updated_at,
        record.batch_id.as_str(),
        *hash,
    )
}
