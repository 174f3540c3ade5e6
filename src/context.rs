//! Run context: the frozen clock and identity of one batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::record::{AuditFields, SourceRecord};
use crate::surrogate::SurrogateKeyGenerator;

/// Deterministic time provider with a frozen time value
///
/// Every row written by a run carries this time as `loaded_at`, so a replay
/// of the same window writes byte-identical rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicTime {
    current_time: DateTime<Utc>,
}

impl DeterministicTime {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { current_time: time }
    }

    /// Get the current frozen time
    pub fn current(&self) -> DateTime<Utc> {
        self.current_time
    }
}

/// Identity and window of one batch against one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    target: String,
    run_id: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    clock: DeterministicTime,
}

impl RunContext {
    /// Context for the window `(window_start, window_end]` of `target`.
    ///
    /// The run id is derived from the target and the window; `loaded_at` is
    /// the window end.
    pub fn new(target: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        let run_id = SurrogateKeyGenerator::new().run_id(target, window_start, window_end);
        Self {
            target: target.to_string(),
            run_id,
            window_start,
            window_end,
            clock: DeterministicTime::new(window_end),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn window_end(&self) -> DateTime<Utc> {
        self.window_end
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.clock.current()
    }

    /// Audit columns for a row written from `record`
    pub fn audit_for(&self, record: &SourceRecord) -> AuditFields {
        AuditFields {
            loaded_at: self.loaded_at(),
            run_id: self.run_id.clone(),
            source_system: record.source_system.clone(),
            batch_id: record.batch_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_context_is_deterministic() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = start + Duration::hours(6);

        let a = RunContext::new("silver_customers", start, end);
        let b = RunContext::new("silver_customers", start, end);

        assert_eq!(a, b);
        assert_eq!(a.loaded_at(), end);
        assert_ne!(a.run_id(), RunContext::new("silver_customers", start, end + Duration::hours(1)).run_id());
    }
}
