//! Version lifecycle: every historized version is written `Open` and makes
//! exactly one transition to `Closed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::LifecycleError;
use crate::types::SurrogateKey;

/// Two-state machine replacing the `is_current` / `valid_to` flag pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VersionState {
    /// Current version, `valid_to` is the open-ended sentinel
    Open,
    /// Superseded version
    Closed { valid_to: DateTime<Utc> },
}

impl VersionState {
    pub fn is_current(&self) -> bool {
        matches!(self, VersionState::Open)
    }

    /// End of validity, substituting `open_ended` while the version is current
    pub fn valid_to(&self, open_ended: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            VersionState::Open => open_ended,
            VersionState::Closed { valid_to } => *valid_to,
        }
    }

    /// The only legal transition: `Open -> Closed { valid_to }`.
    ///
    /// The resulting interval `[valid_from, valid_to)` must be non-empty.
    pub fn close(
        self,
        key: &SurrogateKey,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
    ) -> Result<VersionState, LifecycleError> {
        match self {
            VersionState::Closed { .. } => Err(LifecycleError::AlreadyClosed {
                key: key.to_string(),
            }),
            VersionState::Open if valid_to <= valid_from => Err(LifecycleError::EmptyInterval {
                key: key.to_string(),
                valid_from,
                valid_to,
            }),
            VersionState::Open => Ok(VersionState::Closed { valid_to }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_open_closes_once() {
        let key = SurrogateKey([7; 32]);
        let closed = VersionState::Open.close(&key, ts(1), ts(2)).unwrap();

        assert_eq!(closed, VersionState::Closed { valid_to: ts(2) });
        assert!(!closed.is_current());
        assert_eq!(
            closed.close(&key, ts(1), ts(3)),
            Err(LifecycleError::AlreadyClosed { key: key.to_string() })
        );
    }

    #[test]
    fn test_close_rejects_empty_interval() {
        let key = SurrogateKey([1; 32]);
        assert!(matches!(
            VersionState::Open.close(&key, ts(2), ts(2)),
            Err(LifecycleError::EmptyInterval { .. })
        ));
        assert!(VersionState::Open.close(&key, ts(3), ts(2)).is_err());
    }

    #[test]
    fn test_valid_to_uses_sentinel_while_open() {
        let sentinel = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(VersionState::Open.valid_to(sentinel), sentinel);
        assert_eq!(VersionState::Closed { valid_to: ts(5) }.valid_to(sentinel), ts(5));
    }
}
