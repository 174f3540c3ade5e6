//! Storage and extract seams of the DHME

use std::collections::{BTreeSet, HashMap};
use chrono::{DateTime, Utc};
use crate::error::StorageError;
use crate::record::{HistorizedVersion, LateArrival, SourceRow, TransactionalRecord};
use crate::types::SurrogateKey;

/// Append-only extract produced by the ingestion layer
pub trait SourceExtract: Send + Sync {
    /// Column names the extract of `target` provides
    fn schema(&self, target: &str) -> Result<Vec<String>, StorageError>;

    /// Rows of `target` whose ingestion timestamp lies in `(after, up_to]`
    fn read_window(
        &self,
        target: &str,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> Result<Vec<SourceRow>, StorageError>;
}

/// Target table of a historized entity
///
/// Implementations must enforce uniqueness of `surrogate_key` and insert each
/// version atomically.
pub trait VersionStore: Send + Sync {
    /// Insert a new version; fails with `StorageError::DuplicateKey` if the
    /// surrogate key is already present
    fn insert(&self, version: HistorizedVersion) -> Result<(), StorageError>;

    fn get(&self, key: &SurrogateKey) -> Result<Option<HistorizedVersion>, StorageError>;

    /// All versions of one business key, ordered by `valid_from`
    fn versions_of(&self, business_key: &str) -> Result<Vec<HistorizedVersion>, StorageError>;

    /// Open versions for each of `business_keys` that has any
    fn open_versions(
        &self,
        business_keys: &BTreeSet<String>,
    ) -> Result<HashMap<String, Vec<HistorizedVersion>>, StorageError>;

    /// Conditionally close a version: applies only while it is still open.
    ///
    /// Returns `false` when the version was already closed.
    fn close(&self, key: &SurrogateKey, valid_to: DateTime<Utc>) -> Result<bool, StorageError>;

    fn business_keys(&self) -> Result<BTreeSet<String>, StorageError>;

    fn all_versions(&self) -> Result<Vec<HistorizedVersion>, StorageError>;

    fn record_late_arrival(&self, late: LateArrival) -> Result<(), StorageError>;

    fn late_arrivals(&self) -> Result<Vec<LateArrival>, StorageError>;
}

/// Target table of a transactional entity; every delivery is retained
pub trait TransactionalStore: Send + Sync {
    /// Insert a delivery; fails with `StorageError::DuplicateKey` if the
    /// record key is already present
    fn insert(&self, record: TransactionalRecord) -> Result<(), StorageError>;

    fn get(&self, key: &SurrogateKey) -> Result<Option<TransactionalRecord>, StorageError>;

    /// Newest delivery of `business_key`
    fn latest(&self, business_key: &str) -> Result<Option<TransactionalRecord>, StorageError>;

    /// Newest delivery of every business key, ordered by business key
    fn latest_view(&self) -> Result<Vec<TransactionalRecord>, StorageError>;

    fn all_records(&self) -> Result<Vec<TransactionalRecord>, StorageError>;
}

/// Persistent watermark per target
pub trait WatermarkStore: Send + Sync {
    fn load(&self, target: &str) -> Result<Option<DateTime<Utc>>, StorageError>;

    fn store(&self, target: &str, watermark: DateTime<Utc>) -> Result<(), StorageError>;
}
