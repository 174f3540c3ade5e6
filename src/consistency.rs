//! Consistency checks and digests over target tables

use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::SerializationError;
use crate::record::{HistorizedVersion, TransactionalRecord};
use crate::serialization::{BincodeCodec, SnapshotCodec};
use crate::types::{SurrogateKey, TargetDigest};

const DIGEST_DOMAIN: &[u8] = b"dhme.target.v1";

/// A broken interval invariant on one business key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyIssue {
    NoCurrentVersion { business_key: String },
    MultipleCurrentVersions { business_key: String, count: usize },
    /// An open version that is not the latest by `valid_from`
    CurrentNotLatest { business_key: String, surrogate_key: SurrogateKey },
    /// A closed version ends before its successor starts
    Gap { business_key: String, surrogate_key: SurrogateKey },
    /// A closed version ends after its successor starts
    Overlap { business_key: String, surrogate_key: SurrogateKey },
}

impl ConsistencyIssue {
    pub fn business_key(&self) -> &str {
        match self {
            ConsistencyIssue::NoCurrentVersion { business_key }
            | ConsistencyIssue::MultipleCurrentVersions { business_key, .. }
            | ConsistencyIssue::CurrentNotLatest { business_key, .. }
            | ConsistencyIssue::Gap { business_key, .. }
            | ConsistencyIssue::Overlap { business_key, .. } => business_key,
        }
    }
}

/// Check single-current and contiguous intervals for every business key
pub fn check_versions(versions: &[HistorizedVersion]) -> Vec<ConsistencyIssue> {
    let mut by_key: BTreeMap<&str, Vec<&HistorizedVersion>> = BTreeMap::new();
    for version in versions {
        by_key.entry(version.business_key.as_str()).or_default().push(version);
    }

    let mut issues = Vec::new();
    for (business_key, mut history) in by_key {
        history.sort_by(|a, b| a.valid_from.cmp(&b.valid_from).then(a.surrogate_key.cmp(&b.surrogate_key)));

        let open = history.iter().filter(|v| v.is_current()).count();
        match open {
            0 => issues.push(ConsistencyIssue::NoCurrentVersion {
                business_key: business_key.to_string(),
            }),
            1 => {}
            count => issues.push(ConsistencyIssue::MultipleCurrentVersions {
                business_key: business_key.to_string(),
                count,
            }),
        }

        for pair in history.windows(2) {
            let (version, successor) = (pair[0], pair[1]);
            let issue = match version.state.valid_to(successor.valid_from) {
                _ if version.is_current() => Some(ConsistencyIssue::CurrentNotLatest {
                    business_key: business_key.to_string(),
                    surrogate_key: version.surrogate_key,
                }),
                valid_to if valid_to < successor.valid_from => Some(ConsistencyIssue::Gap {
                    business_key: business_key.to_string(),
                    surrogate_key: version.surrogate_key,
                }),
                valid_to if valid_to > successor.valid_from => Some(ConsistencyIssue::Overlap {
                    business_key: business_key.to_string(),
                    surrogate_key: version.surrogate_key,
                }),
                _ => None,
            };
            issues.extend(issue);
        }
    }

    issues
}

/// The version valid at `at` for each business key, ordered by business key
pub fn as_of<'a>(
    versions: &'a [HistorizedVersion],
    at: DateTime<Utc>,
    open_ended: DateTime<Utc>,
) -> Vec<&'a HistorizedVersion> {
    let mut valid: Vec<&HistorizedVersion> = versions
        .iter()
        .filter(|v| v.was_valid_at(at, open_ended))
        .collect();
    valid.sort_by(|a, b| a.business_key.cmp(&b.business_key));
    valid
}

/// Digest of a historized target, independent of row order
pub fn version_digest(versions: &[HistorizedVersion]) -> Result<TargetDigest, SerializationError> {
    let mut ordered: Vec<&HistorizedVersion> = versions.iter().collect();
    ordered.sort_by_key(|v| v.surrogate_key);
    digest(&ordered)
}

/// Digest of a transactional target, independent of row order
pub fn record_digest(records: &[TransactionalRecord]) -> Result<TargetDigest, SerializationError> {
    let mut ordered: Vec<&TransactionalRecord> = records.iter().collect();
    ordered.sort_by_key(|r| r.record_key);
    digest(&ordered)
}

fn digest<T: Serialize>(rows: &T) -> Result<TargetDigest, SerializationError> {
    let bytes = BincodeCodec::new().encode(rows)?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(DIGEST_DOMAIN);
    hasher.update(&bytes);
    Ok(TargetDigest(*hasher.finalize().as_bytes()))
}

/// Row-level comparison of two states of the same historized target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetComparison {
    pub baseline_digest: TargetDigest,
    pub comparison_digest: TargetDigest,
    pub only_in_baseline: Vec<SurrogateKey>,
    pub only_in_comparison: Vec<SurrogateKey>,
    /// Present on both sides with different content
    pub differing: Vec<SurrogateKey>,
}

impl TargetComparison {
    pub fn compare(
        baseline: &[HistorizedVersion],
        comparison: &[HistorizedVersion],
    ) -> Result<Self, SerializationError> {
        let left: BTreeMap<SurrogateKey, &HistorizedVersion> =
            baseline.iter().map(|v| (v.surrogate_key, v)).collect();
        let right: BTreeMap<SurrogateKey, &HistorizedVersion> =
            comparison.iter().map(|v| (v.surrogate_key, v)).collect();

        let only_in_baseline = left.keys().filter(|k| !right.contains_key(k)).copied().collect();
        let only_in_comparison = right.keys().filter(|k| !left.contains_key(k)).copied().collect();
        let differing = left
            .iter()
            .filter(|(key, version)| right.get(*key).is_some_and(|other| other != *version))
            .map(|(key, _)| *key)
            .collect();

        Ok(Self {
            baseline_digest: version_digest(baseline)?,
            comparison_digest: version_digest(comparison)?,
            only_in_baseline,
            only_in_comparison,
            differing,
        })
    }

    pub fn are_identical(&self) -> bool {
        self.baseline_digest == self.comparison_digest
    }

    pub fn summary(&self) -> String {
        if self.are_identical() {
            return "Targets are identical".to_string();
        }

        let mut parts = Vec::new();
        if !self.only_in_baseline.is_empty() {
            parts.push(format!("{} versions only in baseline", self.only_in_baseline.len()));
        }
        if !self.only_in_comparison.is_empty() {
            parts.push(format!("{} versions only in comparison", self.only_in_comparison.len()));
        }
        if !self.differing.is_empty() {
            parts.push(format!("{} versions differ", self.differing.len()));
        }
        format!("Targets differ: {}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::VersionState;
    use crate::record::AuditFields;
    use crate::types::{Attributes, RowHash};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, day, 0, 0, 0).unwrap()
    }

    fn version(tag: u8, from: u32, state: VersionState) -> HistorizedVersion {
        HistorizedVersion {
            surrogate_key: SurrogateKey([tag; 32]),
            business_key: "P1".to_string(),
            attributes: Attributes::new(),
            row_hash: RowHash([tag; 32]),
            valid_from: ts(from),
            state,
            audit: AuditFields {
                loaded_at: ts(28),
                run_id: "run-test".to_string(),
                source_system: "oracle".to_string(),
                batch_id: "b".to_string(),
            },
        }
    }

    #[test]
    fn test_contiguous_history_is_clean() {
        let versions = vec![
            version(1, 1, VersionState::Closed { valid_to: ts(2) }),
            version(2, 2, VersionState::Open),
        ];
        assert!(check_versions(&versions).is_empty());
        assert_eq!(as_of(&versions, ts(1), ts(31))[0].surrogate_key, SurrogateKey([1; 32]));
    }

    #[test]
    fn test_detects_gap_and_dangling_open() {
        let gap = vec![
            version(1, 1, VersionState::Closed { valid_to: ts(2) }),
            version(2, 3, VersionState::Open),
        ];
        assert!(matches!(check_versions(&gap)[0], ConsistencyIssue::Gap { .. }));

        let dangling = vec![version(1, 1, VersionState::Open), version(2, 3, VersionState::Open)];
        let issues = check_versions(&dangling);
        assert!(issues.contains(&ConsistencyIssue::MultipleCurrentVersions {
            business_key: "P1".to_string(),
            count: 2
        }));
        assert!(issues.iter().any(|i| matches!(i, ConsistencyIssue::CurrentNotLatest { .. })));
    }

    #[test]
    fn test_digest_ignores_row_order() {
        let a = version(1, 1, VersionState::Closed { valid_to: ts(2) });
        let b = version(2, 2, VersionState::Open);

        let comparison = TargetComparison::compare(&[a.clone(), b.clone()], &[b, a]).unwrap();
        assert!(comparison.are_identical());
        assert_eq!(comparison.summary(), "Targets are identical");
    }
}
