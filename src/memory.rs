//! In-memory implementations of the storage seams
//!
//! Used by tests, benches and the demo. Each store can be told to fail a
//! given operation so retry and crash paths can be exercised.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, RwLock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{EngineError, SerializationError, StorageError};
use crate::record::{HistorizedVersion, LateArrival, SourceRow, TransactionalRecord};
use crate::serialization::SnapshotCodec;
use crate::traits::{SourceExtract, TransactionalStore, VersionStore, WatermarkStore};
use crate::types::SurrogateKey;

fn poisoned(operation: &str) -> StorageError {
    StorageError::Unavailable {
        operation: operation.to_string(),
        reason: "lock poisoned".to_string(),
    }
}

/// Scripted failure of one kind of operation
#[derive(Debug, Default)]
struct FaultPlan {
    /// Number of calls that still succeed before failures start; `None` = never fail
    remaining: Mutex<Option<usize>>,
}

impl FaultPlan {
    fn fail_after(&self, successes: usize) {
        if let Ok(mut remaining) = self.remaining.lock() {
            *remaining = Some(successes);
        }
    }

    fn clear(&self) {
        if let Ok(mut remaining) = self.remaining.lock() {
            *remaining = None;
        }
    }

    fn check(&self, operation: &str) -> Result<(), StorageError> {
        let mut remaining = self.remaining.lock().map_err(|_| poisoned(operation))?;
        match remaining.as_mut() {
            None => Ok(()),
            Some(0) => Err(StorageError::Unavailable {
                operation: operation.to_string(),
                reason: "injected failure".to_string(),
            }),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
        }
    }
}

/// Extract source holding rows per target
#[derive(Debug, Default)]
pub struct MemorySource {
    schemas: RwLock<HashMap<String, Vec<String>>>,
    rows: RwLock<HashMap<String, Vec<SourceRow>>>,
    read_faults: FaultPlan,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the columns of `target`'s extract
    pub fn with_schema(self, target: &str, columns: &[&str]) -> Self {
        if let Ok(mut schemas) = self.schemas.write() {
            schemas.insert(target.to_string(), columns.iter().map(|c| c.to_string()).collect());
        }
        self
    }

    /// Append rows to the extract of `target`
    pub fn push(&self, target: &str, rows: impl IntoIterator<Item = SourceRow>) -> Result<(), StorageError> {
        let mut all = self.rows.write().map_err(|_| poisoned("push"))?;
        all.entry(target.to_string()).or_default().extend(rows);
        Ok(())
    }

    /// Let the next `successes` reads through, fail every one after
    pub fn fail_reads_after(&self, successes: usize) {
        self.read_faults.fail_after(successes);
    }

    pub fn clear_faults(&self) {
        self.read_faults.clear();
    }
}

impl SourceExtract for MemorySource {
    fn schema(&self, target: &str) -> Result<Vec<String>, StorageError> {
        let schemas = self.schemas.read().map_err(|_| poisoned("schema"))?;
        if let Some(columns) = schemas.get(target) {
            return Ok(columns.clone());
        }
        drop(schemas);

        // Without a declared schema, the union of columns seen so far
        let rows = self.rows.read().map_err(|_| poisoned("schema"))?;
        let columns: BTreeSet<String> = rows
            .get(target)
            .into_iter()
            .flatten()
            .flat_map(|row| row.values.keys().cloned())
            .collect();
        Ok(columns.into_iter().collect())
    }

    fn read_window(
        &self,
        target: &str,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> Result<Vec<SourceRow>, StorageError> {
        self.read_faults.check("read_window")?;
        let rows = self.rows.read().map_err(|_| poisoned("read_window"))?;
        Ok(rows
            .get(target)
            .into_iter()
            .flatten()
            .filter(|row| row.ingestion_timestamp > after && row.ingestion_timestamp <= up_to)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct VersionTable {
    versions: BTreeMap<SurrogateKey, HistorizedVersion>,
    by_business_key: BTreeMap<String, BTreeSet<SurrogateKey>>,
    late_arrivals: Vec<LateArrival>,
}

/// Serializable image of a [`MemoryVersionStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStoreSnapshot {
    /// Ordered by surrogate key
    pub versions: Vec<HistorizedVersion>,
    pub late_arrivals: Vec<LateArrival>,
}

/// Historized target table with a uniqueness constraint on the surrogate key
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    table: RwLock<VersionTable>,
    insert_faults: FaultPlan,
    close_faults: FaultPlan,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let the next `successes` inserts through, fail every one after
    pub fn fail_inserts_after(&self, successes: usize) {
        self.insert_faults.fail_after(successes);
    }

    /// Let the next `successes` closes through, fail every one after
    pub fn fail_closes_after(&self, successes: usize) {
        self.close_faults.fail_after(successes);
    }

    pub fn clear_faults(&self) {
        self.insert_faults.clear();
        self.close_faults.clear();
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.versions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Result<VersionStoreSnapshot, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("snapshot"))?;
        Ok(VersionStoreSnapshot {
            versions: table.versions.values().cloned().collect(),
            late_arrivals: table.late_arrivals.clone(),
        })
    }

    pub fn from_snapshot(snapshot: VersionStoreSnapshot) -> Self {
        let mut table = VersionTable::default();
        for version in snapshot.versions {
            table
                .by_business_key
                .entry(version.business_key.clone())
                .or_default()
                .insert(version.surrogate_key);
            table.versions.insert(version.surrogate_key, version);
        }
        table.late_arrivals = snapshot.late_arrivals;

        Self {
            table: RwLock::new(table),
            ..Default::default()
        }
    }

    /// Encode the whole table with `codec`
    pub fn export<C: SnapshotCodec>(&self, codec: &C) -> Result<Vec<u8>, EngineError> {
        Ok(codec.encode(&self.snapshot()?)?)
    }

    /// Rebuild a table from bytes produced by [`MemoryVersionStore::export`]
    pub fn import<C: SnapshotCodec>(codec: &C, bytes: &[u8]) -> Result<Self, SerializationError> {
        Ok(Self::from_snapshot(codec.decode(bytes)?))
    }
}

impl VersionStore for MemoryVersionStore {
    fn insert(&self, version: HistorizedVersion) -> Result<(), StorageError> {
        self.insert_faults.check("insert_version")?;
        let mut table = self.table.write().map_err(|_| poisoned("insert_version"))?;
        if table.versions.contains_key(&version.surrogate_key) {
            return Err(StorageError::DuplicateKey {
                key: version.surrogate_key.to_string(),
            });
        }
        table
            .by_business_key
            .entry(version.business_key.clone())
            .or_default()
            .insert(version.surrogate_key);
        table.versions.insert(version.surrogate_key, version);
        Ok(())
    }

    fn get(&self, key: &SurrogateKey) -> Result<Option<HistorizedVersion>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("get_version"))?;
        Ok(table.versions.get(key).cloned())
    }

    fn versions_of(&self, business_key: &str) -> Result<Vec<HistorizedVersion>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("versions_of"))?;
        let mut versions: Vec<HistorizedVersion> = table
            .by_business_key
            .get(business_key)
            .into_iter()
            .flatten()
            .filter_map(|key| table.versions.get(key).cloned())
            .collect();
        versions.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.surrogate_key.cmp(&b.surrogate_key)));
        Ok(versions)
    }

    fn open_versions(
        &self,
        business_keys: &BTreeSet<String>,
    ) -> Result<HashMap<String, Vec<HistorizedVersion>>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("open_versions"))?;
        let mut open = HashMap::new();
        for business_key in business_keys {
            let versions: Vec<HistorizedVersion> = table
                .by_business_key
                .get(business_key)
                .into_iter()
                .flatten()
                .filter_map(|key| table.versions.get(key))
                .filter(|v| v.is_current())
                .cloned()
                .collect();
            if !versions.is_empty() {
                open.insert(business_key.clone(), versions);
            }
        }
        Ok(open)
    }

    fn close(&self, key: &SurrogateKey, valid_to: DateTime<Utc>) -> Result<bool, StorageError> {
        self.close_faults.check("close_version")?;
        let mut table = self.table.write().map_err(|_| poisoned("close_version"))?;
        let version = table
            .versions
            .get_mut(key)
            .ok_or_else(|| StorageError::NotFound { key: key.to_string() })?;

        if !version.is_current() {
            return Ok(false);
        }
        version.close(valid_to).map_err(|e| StorageError::ConstraintViolation {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(true)
    }

    fn business_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("business_keys"))?;
        Ok(table.by_business_key.keys().cloned().collect())
    }

    fn all_versions(&self) -> Result<Vec<HistorizedVersion>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("all_versions"))?;
        Ok(table.versions.values().cloned().collect())
    }

    fn record_late_arrival(&self, late: LateArrival) -> Result<(), StorageError> {
        let mut table = self.table.write().map_err(|_| poisoned("record_late_arrival"))?;
        // Replays of the same window must not pile up audit rows
        let already_recorded = table.late_arrivals.iter().any(|existing| {
            existing.record.business_key == late.record.business_key
                && existing.row_hash == late.row_hash
                && existing.record.source_updated_at == late.record.source_updated_at
                && existing.record.ingestion_timestamp == late.record.ingestion_timestamp
        });
        if !already_recorded {
            table.late_arrivals.push(late);
        }
        Ok(())
    }

    fn late_arrivals(&self) -> Result<Vec<LateArrival>, StorageError> {
        let table = self.table.read().map_err(|_| poisoned("late_arrivals"))?;
        Ok(table.late_arrivals.clone())
    }
}

/// Transactional target table keeping every delivery
#[derive(Debug, Default)]
pub struct MemoryTransactionalStore {
    records: RwLock<BTreeMap<SurrogateKey, TransactionalRecord>>,
    insert_faults: FaultPlan,
}

impl MemoryTransactionalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_inserts_after(&self, successes: usize) {
        self.insert_faults.fail_after(successes);
    }

    pub fn clear_faults(&self) {
        self.insert_faults.clear();
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TransactionalStore for MemoryTransactionalStore {
    fn insert(&self, record: TransactionalRecord) -> Result<(), StorageError> {
        self.insert_faults.check("insert_record")?;
        let mut records = self.records.write().map_err(|_| poisoned("insert_record"))?;
        if records.contains_key(&record.record_key) {
            return Err(StorageError::DuplicateKey {
                key: record.record_key.to_string(),
            });
        }
        records.insert(record.record_key, record);
        Ok(())
    }

    fn get(&self, key: &SurrogateKey) -> Result<Option<TransactionalRecord>, StorageError> {
        let records = self.records.read().map_err(|_| poisoned("get_record"))?;
        Ok(records.get(key).cloned())
    }

    fn latest(&self, business_key: &str) -> Result<Option<TransactionalRecord>, StorageError> {
        let records = self.records.read().map_err(|_| poisoned("latest"))?;
        Ok(records
            .values()
            .filter(|r| r.business_key == business_key)
            .max_by(|a, b| a.recency().cmp(&b.recency()))
            .cloned())
    }

    fn latest_view(&self) -> Result<Vec<TransactionalRecord>, StorageError> {
        let records = self.records.read().map_err(|_| poisoned("latest_view"))?;
        let mut latest: BTreeMap<&str, &TransactionalRecord> = BTreeMap::new();
        for record in records.values() {
            let newer = latest
                .get(record.business_key.as_str())
                .map_or(true, |current| record.recency() > current.recency());
            if newer {
                latest.insert(record.business_key.as_str(), record);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    fn all_records(&self) -> Result<Vec<TransactionalRecord>, StorageError> {
        let records = self.records.read().map_err(|_| poisoned("all_records"))?;
        Ok(records.values().cloned().collect())
    }
}

/// Watermarks per target
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    watermarks: RwLock<HashMap<String, DateTime<Utc>>>,
    store_faults: FaultPlan,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_stores_after(&self, successes: usize) {
        self.store_faults.fail_after(successes);
    }

    pub fn clear_faults(&self) {
        self.store_faults.clear();
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self, target: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let watermarks = self.watermarks.read().map_err(|_| poisoned("load_watermark"))?;
        Ok(watermarks.get(target).copied())
    }

    fn store(&self, target: &str, watermark: DateTime<Utc>) -> Result<(), StorageError> {
        self.store_faults.check("store_watermark")?;
        let mut watermarks = self.watermarks.write().map_err(|_| poisoned("store_watermark"))?;
        watermarks.insert(target.to_string(), watermark);
        Ok(())
    }
}
