//! Deterministic surrogate keys and run identifiers

use blake3::Hasher as Blake3Hasher;
use chrono::{DateTime, SecondsFormat, Utc};
use crate::hasher::write_field;
use crate::types::SurrogateKey;

const SURROGATE_DOMAIN: &[u8] = b"dhme.surrogate.v1";
const RUN_DOMAIN: &[u8] = b"dhme.run.v1";

/// Derives version identity from `(business_key, timestamp)` only.
///
/// No clock or random input is involved, so reprocessing the same source
/// state always yields the same key.
#[derive(Debug, Clone, Default)]
pub struct SurrogateKeyGenerator;

impl SurrogateKeyGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Generate the surrogate key for `business_key` as of `at`
    pub fn generate(&self, business_key: &str, at: DateTime<Utc>) -> SurrogateKey {
        let mut hasher = Blake3Hasher::new();
        hasher.update(SURROGATE_DOMAIN);
        write_field(&mut hasher, business_key.as_bytes());
        write_field(&mut hasher, timestamp_bytes(at).as_bytes());
        SurrogateKey(*hasher.finalize().as_bytes())
    }

    /// Run identifier for a watermark window of a target
    pub fn run_id(&self, target: &str, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> String {
        let mut hasher = Blake3Hasher::new();
        hasher.update(RUN_DOMAIN);
        write_field(&mut hasher, target.as_bytes());
        write_field(&mut hasher, timestamp_bytes(window_start).as_bytes());
        write_field(&mut hasher, timestamp_bytes(window_end).as_bytes());
        let digest = hasher.finalize();
        format!("run-{}", hex::encode(&digest.as_bytes()[..8]))
    }
}

fn timestamp_bytes(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
