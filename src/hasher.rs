//! Row fingerprinting using Blake3

use blake3::Hasher as Blake3Hasher;
use chrono::SecondsFormat;
use crate::types::{AttributeValue, Attributes, RowHash};

/// Default number of decimal places numbers are rendered with before hashing
pub const DEFAULT_NUMERIC_SCALE: usize = 4;

/// RowHasher computes the fingerprint of a record's tracked attributes
///
/// The digest is taken over a canonical byte encoding of `(name, value)` pairs
/// in the order the caller supplies them, which is the configured tracked
/// column order. Map iteration order never reaches the hash.
///
/// Numbers are rendered as fixed-point decimal strings so that `100`,
/// `100.0` and `99.99999999` (at scale 4) are the same value to the hasher.
#[derive(Debug, Clone)]
pub struct RowHasher {
    numeric_scale: usize,
}

impl RowHasher {
    /// Create a RowHasher rendering numbers with `numeric_scale` decimals
    pub fn new(numeric_scale: usize) -> Self {
        Self { numeric_scale }
    }

    pub fn numeric_scale(&self) -> usize {
        self.numeric_scale
    }

    /// Hash an ordered list of attributes
    pub fn hash<'a, I>(&self, attributes: I) -> RowHash
    where
        I: IntoIterator<Item = (&'a str, &'a AttributeValue)>,
    {
        let mut hasher = Blake3Hasher::new();
        let mut count: u64 = 0;

        for (name, value) in attributes {
            write_field(&mut hasher, name.as_bytes());
            let (tag, canonical) = self.canonical(value);
            hasher.update(&[tag]);
            write_field(&mut hasher, canonical.as_bytes());
            count += 1;
        }

        // Distinguishes a trailing Null from an absent attribute list entry
        hasher.update(&count.to_le_bytes());
        RowHash(*hasher.finalize().as_bytes())
    }

    /// Hash the `tracked` columns of `attributes`, in `tracked` order.
    ///
    /// Columns missing from the bag hash as `Null`; columns not in `tracked`
    /// are ignored entirely.
    pub fn hash_tracked(&self, attributes: &Attributes, tracked: &[String]) -> RowHash {
        self.hash(tracked.iter().map(|column| {
            let value = attributes.get(column).unwrap_or(&AttributeValue::Null);
            (column.as_str(), value)
        }))
    }

    /// Fixed-point rendering of a number at the configured scale
    pub fn canonical_number(&self, value: f64) -> String {
        if value.is_nan() {
            return "NaN".to_string();
        }
        if value.is_infinite() {
            return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
        }

        let rendered = format!("{:.*}", self.numeric_scale, value);
        // -0.0000 and 0.0000 are the same value
        match rendered.strip_prefix('-') {
            Some(unsigned) if unsigned.chars().all(|c| c == '0' || c == '.') => unsigned.to_string(),
            _ => rendered,
        }
    }

    /// Exact fixed-point rendering of an integer, matching `canonical_number`
    /// for every integer an `f64` represents exactly
    pub fn canonical_int(&self, value: i64) -> String {
        if self.numeric_scale == 0 {
            value.to_string()
        } else {
            format!("{}.{}", value, "0".repeat(self.numeric_scale))
        }
    }

    fn canonical(&self, value: &AttributeValue) -> (u8, String) {
        match value {
            AttributeValue::Null => (0, String::new()),
            AttributeValue::Bool(b) => (1, if *b { "1" } else { "0" }.to_string()),
            AttributeValue::Int(i) => (2, self.canonical_int(*i)),
            AttributeValue::Number(n) => (2, self.canonical_number(*n)),
            AttributeValue::Text(s) => (3, s.clone()),
            AttributeValue::Date(d) => (4, d.format("%Y-%m-%d").to_string()),
            AttributeValue::Timestamp(t) => (5, t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        }
    }
}

impl Default for RowHasher {
    fn default() -> Self {
        Self::new(DEFAULT_NUMERIC_SCALE)
    }
}

/// Length-prefixed write so adjacent fields cannot run into each other
pub(crate) fn write_field(hasher: &mut Blake3Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag(pairs: &[(&str, AttributeValue)]) -> Attributes {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_hash_consistency() {
        let hasher = RowHasher::default();
        let attributes = bag(&[("segment", "GOLD".into()), ("city", "Recife".into())]);
        let tracked = vec!["segment".to_string(), "city".to_string()];

        assert_eq!(
            hasher.hash_tracked(&attributes, &tracked),
            hasher.hash_tracked(&attributes, &tracked)
        );
    }

    #[test]
    fn test_untracked_columns_ignored() {
        let hasher = RowHasher::default();
        let tracked = vec!["segment".to_string()];
        let a = bag(&[("segment", "GOLD".into()), ("_batch_id", "b-1".into())]);
        let b = bag(&[("segment", "GOLD".into()), ("_batch_id", "b-2".into())]);

        assert_eq!(hasher.hash_tracked(&a, &tracked), hasher.hash_tracked(&b, &tracked));
    }

    #[test]
    fn test_numeric_canonicalization() {
        let hasher = RowHasher::new(2);
        let tracked = vec!["price".to_string()];
        let int = bag(&[("price", AttributeValue::Int(100))]);
        let float = bag(&[("price", AttributeValue::Number(100.0))]);
        let noisy = bag(&[("price", AttributeValue::Number(100.000_000_1))]);

        let expected = hasher.hash_tracked(&int, &tracked);
        assert_eq!(hasher.hash_tracked(&float, &tracked), expected);
        assert_eq!(hasher.hash_tracked(&noisy, &tracked), expected);
        assert_eq!(hasher.canonical_number(-0.0), "0.00");
        assert_eq!(hasher.canonical_number(-0.001), "0.00");
        assert_eq!(hasher.canonical_number(-1.5), "-1.50");
    }

    #[test]
    fn test_column_order_matters() {
        let hasher = RowHasher::default();
        let attributes = bag(&[("a", "x".into()), ("b", "y".into())]);

        let forward = hasher.hash_tracked(&attributes, &["a".to_string(), "b".to_string()]);
        let backward = hasher.hash_tracked(&attributes, &["b".to_string(), "a".to_string()]);
        assert_ne!(forward, backward);
    }

    #[test]
    fn test_missing_column_hashes_as_null() {
        let hasher = RowHasher::default();
        let tracked = vec!["segment".to_string(), "city".to_string()];
        let missing = bag(&[("segment", "GOLD".into())]);
        let null = bag(&[("segment", "GOLD".into()), ("city", AttributeValue::Null)]);
        let empty_text = bag(&[("segment", "GOLD".into()), ("city", "".into())]);

        assert_eq!(hasher.hash_tracked(&missing, &tracked), hasher.hash_tracked(&null, &tracked));
        assert_ne!(hasher.hash_tracked(&null, &tracked), hasher.hash_tracked(&empty_text, &tracked));
    }
}
