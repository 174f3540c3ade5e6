use chrono::{Duration, TimeZone, Utc};
use dhme::{AttributeValue, Attributes, RowHasher, SurrogateKeyGenerator};
use proptest::prelude::*;

fn tracked() -> Vec<String> {
    vec!["segment".to_string(), "city".to_string(), "credit_limit".to_string()]
}

fn arb_bag() -> impl Strategy<Value = Attributes> {
    ("[A-Z]{3,8}", "[a-z]{3,12}", -1_000_000i64..1_000_000).prop_map(|(segment, city, cents)| {
        let mut bag = Attributes::new();
        bag.insert("segment".into(), segment.into());
        bag.insert("city".into(), city.into());
        bag.insert("credit_limit".into(), AttributeValue::Number(cents as f64 / 100.0));
        bag
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Columns outside the tracked list never influence the fingerprint
    #[test]
    fn property_untracked_columns_are_ignored(
        bag in arb_bag(),
        noise in "[a-z0-9 ]{0,20}",
        loaded in 0i64..1_000_000
    ) {
        let hasher = RowHasher::default();
        let mut noisy = bag.clone();
        noisy.insert("notes".into(), noise.into());
        noisy.insert("loaded_at".into(), (Utc.timestamp_opt(0, 0).unwrap() + Duration::seconds(loaded)).into());

        prop_assert_eq!(hasher.hash_tracked(&bag, &tracked()), hasher.hash_tracked(&noisy, &tracked()));
    }

    /// Any change to a tracked value changes the fingerprint
    #[test]
    fn property_tracked_change_is_detected(bag in arb_bag(), suffix in "[a-z]{1,4}") {
        let hasher = RowHasher::default();
        let mut changed = bag.clone();
        let city = bag["city"].as_str().unwrap().to_string();
        changed.insert("city".into(), format!("{}{}", city, suffix).into());

        prop_assert_ne!(hasher.hash_tracked(&bag, &tracked()), hasher.hash_tracked(&changed, &tracked()));
    }

    /// Integers and floats of the same value hash alike, and float noise
    /// below the numeric scale is absorbed
    #[test]
    fn property_numeric_representation_is_canonical(units in -100_000i64..100_000) {
        let hasher = RowHasher::default();
        let as_int = AttributeValue::Int(units);
        let as_float = AttributeValue::Number(units as f64);
        let with_noise = AttributeValue::Number(units as f64 + 1e-9);

        let h = |value: &AttributeValue| hasher.hash([("credit_limit", value)]);
        prop_assert_eq!(h(&as_int), h(&as_float));
        prop_assert_eq!(h(&as_float), h(&with_noise));
    }

    /// Distinct integers never collide, however large, and an integer still
    /// hashes like a float holding exactly the same value
    #[test]
    fn property_integers_hash_exactly(a in any::<i64>(), b in any::<i64>()) {
        let hasher = RowHasher::default();
        let h = |value: &AttributeValue| hasher.hash([("loyalty_id", value)]);

        if a != b {
            prop_assert_ne!(h(&AttributeValue::Int(a)), h(&AttributeValue::Int(b)));
        }
        prop_assert_ne!(h(&AttributeValue::Int(a)), h(&AttributeValue::Int(a.wrapping_add(1))));
        if (a as f64) as i128 == a as i128 {
            prop_assert_eq!(h(&AttributeValue::Int(a)), h(&AttributeValue::Number(a as f64)));
        }
    }

    /// Surrogate keys depend on the business key and the timestamp only
    #[test]
    fn property_surrogate_key_identity(
        key in "[A-Z][0-9]{1,6}",
        other in "[A-Z][0-9]{1,6}",
        seconds in 0i64..2_000_000_000,
        shift in 1i64..86_400
    ) {
        let generator = SurrogateKeyGenerator::new();
        let at = Utc.timestamp_opt(seconds, 0).unwrap();

        prop_assert_eq!(generator.generate(&key, at), SurrogateKeyGenerator::new().generate(&key, at));
        prop_assert_ne!(generator.generate(&key, at), generator.generate(&key, at + Duration::seconds(shift)));
        if key != other {
            prop_assert_ne!(generator.generate(&key, at), generator.generate(&other, at));
        }
    }
}

#[test]
fn test_integers_beyond_float_precision_stay_distinct() {
    let hasher = RowHasher::default();
    let a = AttributeValue::Int(9_007_199_254_740_993);
    let b = AttributeValue::Int(9_007_199_254_740_992);

    assert_eq!(hasher.canonical_int(9_007_199_254_740_993), "9007199254740993.0000");
    assert_ne!(hasher.hash([("loyalty_id", &a)]), hasher.hash([("loyalty_id", &b)]));
    assert_eq!(RowHasher::new(0).canonical_int(-42), "-42");
}

#[test]
fn test_null_differs_from_empty_text() {
    let hasher = RowHasher::default();
    let null = AttributeValue::Null;
    let empty = AttributeValue::text("");

    assert_ne!(hasher.hash([("city", &null)]), hasher.hash([("city", &empty)]));
}

#[test]
fn test_missing_tracked_column_hashes_as_null() {
    let hasher = RowHasher::default();
    let tracked = vec!["segment".to_string(), "city".to_string()];
    let mut with_null = Attributes::new();
    with_null.insert("segment".into(), "GOLD".into());
    with_null.insert("city".into(), AttributeValue::Null);
    let mut without = Attributes::new();
    without.insert("segment".into(), "GOLD".into());

    assert_eq!(hasher.hash_tracked(&with_null, &tracked), hasher.hash_tracked(&without, &tracked));
}

#[test]
fn test_run_id_format() {
    let generator = SurrogateKeyGenerator::new();
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let id = generator.run_id("silver_customers", start, start + Duration::days(1));

    assert!(id.starts_with("run-"));
    assert_eq!(id.len(), 4 + 16);
    assert_ne!(id, generator.run_id("silver_products", start, start + Duration::days(1)));
}
