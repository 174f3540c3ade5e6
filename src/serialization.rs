//! Pluggable codecs for target snapshots

use serde::de::DeserializeOwned;
use serde::Serialize;
use crate::error::SerializationError;

/// Encodes and decodes store snapshots and digest inputs
pub trait SnapshotCodec: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError>;

    /// Name of the encoding, e.g. `bincode`
    fn name(&self) -> &str;
}

/// Compact binary encoding; the input of every target digest
#[derive(Debug, Clone, Default)]
pub struct BincodeCodec;

impl BincodeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl SnapshotCodec for BincodeCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        bincode::serialize(value).map_err(|e| SerializationError::SerializationFailed {
            reason: format!("Bincode serialization failed: {}", e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        bincode::deserialize(bytes).map_err(|e| SerializationError::DeserializationFailed {
            reason: format!("Bincode deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "bincode"
    }
}

/// Human-readable encoding for exported snapshots
#[derive(Debug, Clone, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }
}

impl SnapshotCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializationError> {
        let result = if self.pretty {
            serde_json::to_vec_pretty(value)
        } else {
            serde_json::to_vec(value)
        };

        result.map_err(|e| SerializationError::SerializationFailed {
            reason: format!("JSON serialization failed: {}", e),
        })
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializationError> {
        serde_json::from_slice(bytes).map_err(|e| SerializationError::DeserializationFailed {
            reason: format!("JSON deserialization failed: {}", e),
        })
    }

    fn name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryVersionStore, VersionStoreSnapshot};

    #[test]
    fn test_empty_snapshot_through_both_codecs() {
        let snapshot = MemoryVersionStore::new().snapshot().unwrap();

        let bincode = BincodeCodec::new();
        let bytes = bincode.encode(&snapshot).unwrap();
        let decoded: VersionStoreSnapshot = bincode.decode(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let json = JsonCodec::new_pretty();
        let text = json.encode(&snapshot).unwrap();
        assert!(String::from_utf8(text.clone()).unwrap().contains("late_arrivals"));
        let decoded: VersionStoreSnapshot = json.decode(&text).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        let result: Result<VersionStoreSnapshot, _> = JsonCodec::new().decode(b"not json");
        assert!(matches!(result, Err(SerializationError::DeserializationFailed { .. })));
    }
}
