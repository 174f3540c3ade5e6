//! Watermark tracking per target

use std::sync::Arc;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use crate::error::StorageError;
use crate::traits::WatermarkStore;

/// Cutoff of a target that has never been loaded
pub const EPOCH_ZERO: DateTime<Utc> = DateTime::<Utc>::UNIX_EPOCH;

/// Gates the extract window of each target
#[derive(Clone)]
pub struct WatermarkTracker {
    store: Arc<dyn WatermarkStore>,
}

impl std::fmt::Debug for WatermarkTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkTracker").finish_non_exhaustive()
    }
}

impl WatermarkTracker {
    pub fn new(store: Arc<dyn WatermarkStore>) -> Self {
        Self { store }
    }

    /// Last committed cutoff of `target`, or the epoch if it was never loaded
    pub fn get_cutoff(&self, target: &str) -> Result<DateTime<Utc>, StorageError> {
        Ok(self.store.load(target)?.unwrap_or(EPOCH_ZERO))
    }

    /// Move the watermark of `target` forward to `new_cutoff`.
    ///
    /// Call only once every write of the batch is committed. The watermark
    /// never moves backwards; a cutoff at or below the stored one is a no-op.
    /// Returns the watermark in effect afterwards.
    pub fn advance(&self, target: &str, new_cutoff: DateTime<Utc>) -> Result<DateTime<Utc>, StorageError> {
        let current = self.get_cutoff(target)?;
        if new_cutoff < current {
            warn!(target: "dhme", table = target, %current, requested = %new_cutoff, "refusing to move watermark backwards");
            return Ok(current);
        }
        if new_cutoff == current {
            return Ok(current);
        }

        self.store.store(target, new_cutoff)?;
        debug!(target: "dhme", table = target, from = %current, to = %new_cutoff, "watermark advanced");
        Ok(new_cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryWatermarkStore;
    use chrono::TimeZone;

    #[test]
    fn test_unloaded_target_starts_at_epoch() {
        let tracker = WatermarkTracker::new(Arc::new(MemoryWatermarkStore::new()));
        assert_eq!(tracker.get_cutoff("silver_customers").unwrap(), EPOCH_ZERO);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let tracker = WatermarkTracker::new(Arc::new(MemoryWatermarkStore::new()));
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        assert_eq!(tracker.advance("t", t2).unwrap(), t2);
        assert_eq!(tracker.advance("t", t1).unwrap(), t2);
        assert_eq!(tracker.get_cutoff("t").unwrap(), t2);
        assert_eq!(tracker.get_cutoff("other").unwrap(), EPOCH_ZERO);
    }
}
