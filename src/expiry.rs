//! Expiry closer: closes superseded versions after the writer commits

use std::collections::BTreeSet;
use chrono::{DateTime, Utc};
use crate::error::EngineError;
use crate::logging::{LogLevel, RunLog};
use crate::record::HistorizedVersion;
use crate::traits::VersionStore;
use crate::types::SurrogateKey;

/// A pending `Open -> Closed` transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closure {
    pub surrogate_key: SurrogateKey,
    pub valid_to: DateTime<Utc>,
}

/// Closes every open version that has a successor, at the successor's `valid_from`
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryCloser;

impl ExpiryCloser {
    pub fn new() -> Self {
        Self
    }

    /// Closures needed for the versions of one business key.
    ///
    /// The latest version is never closed. A version sharing its `valid_from`
    /// with the next one is left alone, since closing it would leave an empty
    /// interval.
    pub fn plan(versions: &[HistorizedVersion]) -> Vec<Closure> {
        let mut ordered: Vec<&HistorizedVersion> = versions.iter().collect();
        ordered.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.surrogate_key.cmp(&b.surrogate_key)));

        ordered
            .iter()
            .enumerate()
            .filter(|(_, version)| version.is_current())
            .filter_map(|(i, version)| {
                ordered[i + 1..]
                    .iter()
                    .find(|successor| successor.valid_from > version.valid_from)
                    .map(|successor| Closure {
                        surrogate_key: version.surrogate_key,
                        valid_to: successor.valid_from,
                    })
            })
            .collect()
    }

    /// Close superseded versions of `business_keys`. Returns how many closed.
    ///
    /// Safe to re-run: a version closed by an earlier attempt is skipped.
    pub fn close_keys(
        &self,
        store: &dyn VersionStore,
        business_keys: &BTreeSet<String>,
        log: &mut RunLog,
    ) -> Result<usize, EngineError> {
        let open = store.open_versions(business_keys)?;
        let mut closed = 0;

        for business_key in business_keys {
            // One open version means nothing is superseded
            if open.get(business_key).map_or(true, |versions| versions.len() < 2) {
                continue;
            }
            let versions = store.versions_of(business_key)?;
            for closure in Self::plan(&versions) {
                let version = match versions.iter().find(|v| v.surrogate_key == closure.surrogate_key) {
                    Some(version) => version,
                    None => continue,
                };
                if self.close_version(store, version, closure.valid_to)? {
                    closed += 1;
                    let entry = log
                        .entry(LogLevel::Debug, "version closed")
                        .with_business_key(business_key)
                        .with_metadata("surrogate_key", closure.surrogate_key)
                        .with_metadata("valid_to", closure.valid_to.to_rfc3339());
                    log.log(entry);
                }
            }
        }

        Ok(closed)
    }

    /// Apply one `Open -> Closed` transition. The lifecycle is checked before
    /// the store is touched; an already closed version is skipped.
    pub fn close_version(
        &self,
        store: &dyn VersionStore,
        version: &HistorizedVersion,
        valid_to: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        if !version.is_current() {
            return Ok(false);
        }
        version.state.close(&version.surrogate_key, version.valid_from, valid_to)?;
        Ok(store.close(&version.surrogate_key, valid_to)?)
    }

    /// Sweep every business key of the target
    pub fn repair_all(&self, store: &dyn VersionStore, log: &mut RunLog) -> Result<usize, EngineError> {
        let keys = store.business_keys()?;
        let closed = self.close_keys(store, &keys, log)?;
        if closed > 0 {
            log.warn(format!("repair closed {} dangling versions", closed));
        }
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LifecycleError;
    use crate::lifecycle::VersionState;
    use crate::memory::MemoryVersionStore;
    use crate::record::AuditFields;
    use crate::types::{Attributes, RowHash};
    use chrono::TimeZone;

    fn version(tag: u8, day: u32, state: VersionState) -> HistorizedVersion {
        HistorizedVersion {
            surrogate_key: SurrogateKey([tag; 32]),
            business_key: "C1".to_string(),
            attributes: Attributes::new(),
            row_hash: RowHash([tag; 32]),
            valid_from: Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap(),
            state,
            audit: AuditFields {
                loaded_at: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
                run_id: "run-test".to_string(),
                source_system: "crm".to_string(),
                batch_id: "b".to_string(),
            },
        }
    }

    #[test]
    fn test_plan_closes_each_open_predecessor_at_its_successor() {
        let versions = vec![
            version(3, 3, VersionState::Open),
            version(1, 1, VersionState::Open),
            version(2, 2, VersionState::Open),
        ];

        let plan = ExpiryCloser::plan(&versions);
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].surrogate_key, SurrogateKey([1; 32]));
        assert_eq!(plan[0].valid_to, versions[2].valid_from);
        assert_eq!(plan[1].surrogate_key, SurrogateKey([2; 32]));
        assert_eq!(plan[1].valid_to, versions[0].valid_from);
    }

    #[test]
    fn test_plan_is_empty_at_steady_state() {
        let closed_at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let versions = vec![
            version(1, 1, VersionState::Closed { valid_to: closed_at }),
            version(2, 2, VersionState::Open),
        ];
        assert!(ExpiryCloser::plan(&versions).is_empty());
    }

    #[test]
    fn test_empty_interval_surfaces_as_lifecycle_error() {
        let store = MemoryVersionStore::new();
        let open = version(1, 1, VersionState::Open);
        store.insert(open.clone()).unwrap();

        let err = ExpiryCloser::new().close_version(&store, &open, open.valid_from).unwrap_err();
        assert!(matches!(err, EngineError::Lifecycle(LifecycleError::EmptyInterval { .. })));
        assert!(store.get(&open.surrogate_key).unwrap().unwrap().is_current());
    }

    #[test]
    fn test_closing_a_closed_version_is_skipped() {
        let store = MemoryVersionStore::new();
        let closed_at = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        let closed = version(1, 1, VersionState::Closed { valid_to: closed_at });

        assert!(!ExpiryCloser::new().close_version(&store, &closed, closed_at).unwrap());
    }
}
