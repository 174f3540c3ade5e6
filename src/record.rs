//! Rows flowing through the engine: raw extract rows, source records,
//! historized versions and transactional records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::config::TargetConfig;
use crate::error::{LifecycleError, RecordError};
use crate::lifecycle::VersionState;
use crate::types::{AttributeValue, Attributes, RowHash, SurrogateKey, ValidationStatus};

/// One row as delivered by the ingestion layer, before configuration is applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    pub values: Attributes,
    pub ingestion_timestamp: DateTime<Utc>,
    pub batch_id: String,
    pub source_system: String,
}

impl SourceRow {
    pub fn new(
        values: Attributes,
        ingestion_timestamp: DateTime<Utc>,
        batch_id: impl Into<String>,
        source_system: impl Into<String>,
    ) -> Self {
        Self {
            values,
            ingestion_timestamp,
            batch_id: batch_id.into(),
            source_system: source_system.into(),
        }
    }
}

/// A source row with its business key and mutation time resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub business_key: String,
    pub attributes: Attributes,
    pub source_updated_at: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
    pub batch_id: String,
    pub source_system: String,
}

impl SourceRecord {
    /// Resolve the business key and `updated_at` columns named by `config`
    pub fn from_row(row: SourceRow, config: &TargetConfig) -> Result<Self, RecordError> {
        let business_key = match row.values.get(&config.business_key) {
            None | Some(AttributeValue::Null) => {
                return Err(RecordError::MissingColumn {
                    column: config.business_key.clone(),
                })
            }
            Some(AttributeValue::Text(s)) if s.trim().is_empty() => {
                return Err(RecordError::MissingColumn {
                    column: config.business_key.clone(),
                })
            }
            Some(AttributeValue::Text(s)) => s.clone(),
            Some(AttributeValue::Int(i)) => i.to_string(),
            Some(other) => {
                return Err(RecordError::InvalidValue {
                    column: config.business_key.clone(),
                    expected: "text or int".to_string(),
                    found: other.type_name().to_string(),
                })
            }
        };

        let source_updated_at = match row.values.get(&config.updated_at_column) {
            None | Some(AttributeValue::Null) => {
                return Err(RecordError::MissingColumn {
                    column: config.updated_at_column.clone(),
                })
            }
            Some(value) => value.as_timestamp().ok_or_else(|| RecordError::InvalidValue {
                column: config.updated_at_column.clone(),
                expected: "timestamp".to_string(),
                found: value.type_name().to_string(),
            })?,
        };

        Ok(Self {
            business_key,
            attributes: row.values,
            source_updated_at,
            ingestion_timestamp: row.ingestion_timestamp,
            batch_id: row.batch_id,
            source_system: row.source_system,
        })
    }

    /// The tracked subset of the attribute bag, missing columns as `Null`
    pub fn tracked_attributes(&self, tracked: &[String]) -> Attributes {
        tracked
            .iter()
            .map(|column| {
                let value = self.attributes.get(column).cloned().unwrap_or(AttributeValue::Null);
                (column.clone(), value)
            })
            .collect()
    }
}

/// Audit columns carried by every written row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFields {
    pub loaded_at: DateTime<Utc>,
    pub run_id: String,
    pub source_system: String,
    pub batch_id: String,
}

/// One version of a historized entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorizedVersion {
    pub surrogate_key: SurrogateKey,
    pub business_key: String,
    pub attributes: Attributes,
    pub row_hash: RowHash,
    pub valid_from: DateTime<Utc>,
    pub state: VersionState,
    pub audit: AuditFields,
}

impl HistorizedVersion {
    pub fn is_current(&self) -> bool {
        self.state.is_current()
    }

    pub fn valid_to(&self, open_ended: DateTime<Utc>) -> DateTime<Utc> {
        self.state.valid_to(open_ended)
    }

    /// Whether this version was the valid one at `at`
    pub fn was_valid_at(&self, at: DateTime<Utc>, open_ended: DateTime<Utc>) -> bool {
        self.valid_from <= at && at < self.valid_to(open_ended)
    }

    /// Close this version at `valid_to`
    pub fn close(&mut self, valid_to: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.state = self.state.close(&self.surrogate_key, self.valid_from, valid_to)?;
        Ok(())
    }

    /// Compare the version payload, ignoring lifecycle state and the
    /// load-specific audit columns (`loaded_at`, `run_id`)
    pub fn same_payload(&self, other: &HistorizedVersion) -> bool {
        self.surrogate_key == other.surrogate_key
            && self.business_key == other.business_key
            && self.attributes == other.attributes
            && self.row_hash == other.row_hash
            && self.valid_from == other.valid_from
            && self.audit.source_system == other.audit.source_system
            && self.audit.batch_id == other.audit.batch_id
    }
}

/// A record rejected by the ordering policy, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateArrival {
    pub record: SourceRecord,
    pub row_hash: RowHash,
    /// `valid_from` of the version that was current when the record arrived
    pub current_valid_from: DateTime<Utc>,
    pub run_id: String,
}

/// Deduplicated, validated row of an orders-like entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionalRecord {
    /// Surrogate over `(business_key, ingestion_timestamp)`, one per delivery
    pub record_key: SurrogateKey,
    pub business_key: String,
    pub attributes: Attributes,
    /// Values computed by the validator, e.g. `computed_total_amount`
    pub derived: Attributes,
    pub validation_status: ValidationStatus,
    /// Names of failing warning-level rules
    pub flags: Vec<String>,
    pub row_hash: RowHash,
    pub source_updated_at: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
    pub audit: AuditFields,
}

impl TransactionalRecord {
    pub fn is_valid(&self) -> bool {
        self.validation_status.is_valid()
    }

    /// Same comparison rules as [`HistorizedVersion::same_payload`]
    pub fn same_payload(&self, other: &TransactionalRecord) -> bool {
        self.record_key == other.record_key
            && self.business_key == other.business_key
            && self.attributes == other.attributes
            && self.derived == other.derived
            && self.validation_status == other.validation_status
            && self.flags == other.flags
            && self.row_hash == other.row_hash
            && self.source_updated_at == other.source_updated_at
            && self.audit.source_system == other.audit.source_system
            && self.audit.batch_id == other.audit.batch_id
    }

    /// Ordering used by the latest view: newest delivery wins
    pub(crate) fn recency(&self) -> (DateTime<Utc>, DateTime<Utc>, &str, RowHash) {
        (self.ingestion_timestamp, self.source_updated_at, self.audit.batch_id.as_str(), self.row_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TargetKind;
    use chrono::TimeZone;

    fn config() -> TargetConfig {
        TargetConfig::new("silver_customers", TargetKind::Historized, "customer_id", "updated_at")
            .with_tracked_columns(&["segment"])
    }

    fn row(values: &[(&str, AttributeValue)]) -> SourceRow {
        SourceRow::new(
            values.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            "batch-1",
            "oracle",
        )
    }

    #[test]
    fn test_from_row_resolves_key_and_timestamp() {
        let updated = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap();
        let record = SourceRecord::from_row(
            row(&[
                ("customer_id", "C1".into()),
                ("segment", "GOLD".into()),
                ("updated_at", updated.into()),
            ]),
            &config(),
        )
        .unwrap();

        assert_eq!(record.business_key, "C1");
        assert_eq!(record.source_updated_at, updated);
        assert_eq!(record.batch_id, "batch-1");
    }

    #[test]
    fn test_from_row_rejects_missing_key() {
        let result = SourceRecord::from_row(
            row(&[("segment", "GOLD".into()), ("updated_at", AttributeValue::Null)]),
            &config(),
        );
        assert_eq!(
            result,
            Err(RecordError::MissingColumn { column: "customer_id".to_string() })
        );
    }

    #[test]
    fn test_from_row_rejects_bad_timestamp() {
        let result = SourceRecord::from_row(
            row(&[("customer_id", AttributeValue::Int(7)), ("updated_at", "yesterday".into())]),
            &config(),
        );
        assert!(matches!(result, Err(RecordError::InvalidValue { .. })));
    }
}
