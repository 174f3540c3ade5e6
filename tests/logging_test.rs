mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::{customer_row, fixture, ts, CUSTOMERS};
use dhme::{LogLevel, RunLog};
use proptest::prelude::*;

// Helper to create arbitrary DateTime
fn arbitrary_datetime() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..2_000_000_000).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
}

// Helper to create arbitrary LogLevel
fn arbitrary_log_level() -> impl Strategy<Value = LogLevel> {
    prop_oneof![
        Just(LogLevel::Trace),
        Just(LogLevel::Debug),
        Just(LogLevel::Info),
        Just(LogLevel::Warn),
        Just(LogLevel::Error),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// An entry is kept exactly when its level meets the minimum, and every
    /// kept entry carries the run's frozen timestamp
    #[test]
    fn property_min_level_filtering(
        timestamp in arbitrary_datetime(),
        min_level in arbitrary_log_level(),
        entries in prop::collection::vec(
            (arbitrary_log_level(), "[a-z ]{5,30}", prop::option::of("[A-Z][0-9]{1,4}")),
            0..30
        )
    ) {
        let mut log = RunLog::new("silver_customers", timestamp, min_level);
        for (level, message, key) in &entries {
            let mut entry = log.entry(*level, message.clone());
            if let Some(key) = key {
                entry = entry.with_business_key(key);
            }
            log.log(entry);
        }

        let expected = entries.iter().filter(|(level, _, _)| *level >= min_level).count();
        prop_assert_eq!(log.len(), expected);
        prop_assert!(log.entries().iter().all(|e| e.timestamp == timestamp));
        prop_assert!(log.entries().iter().all(|e| e.target == "silver_customers"));
    }

    /// Filtering by business key returns only entries about that key
    #[test]
    fn property_business_key_filter(
        keys in prop::collection::vec(prop::sample::select(vec!["C1", "C2", "C3"]), 1..20)
    ) {
        let mut log = RunLog::new("silver_customers", ts(1, 0), LogLevel::Trace);
        for key in &keys {
            let entry = log.entry(LogLevel::Info, "row seen").with_business_key(key);
            log.log(entry);
        }

        let about_c1 = log.filter_by_business_key("C1");
        prop_assert_eq!(about_c1.len(), keys.iter().filter(|k| **k == "C1").count());
        prop_assert!(about_c1.iter().all(|e| e.business_key.as_deref() == Some("C1")));
    }
}

#[test]
fn test_run_report_log_is_stamped_with_window_end() {
    let fx = fixture();
    fx.source.push(CUSTOMERS, [customer_row("C1", "BRONZE", ts(1, 8), ts(1, 9))]).unwrap();

    let report = fx.engine.run(CUSTOMERS, ts(2, 0)).unwrap();

    assert!(!report.log.is_empty());
    assert!(report.log.iter().all(|e| e.timestamp == ts(2, 0)));
    let started = report.log.iter().find(|e| e.message == "run started").unwrap();
    assert_eq!(started.metadata_value("run_id"), Some(report.run_id.as_str()));
}

#[test]
fn test_metadata_lookup() {
    let log = RunLog::new("silver_orders", ts(1, 0), LogLevel::Info);
    let entry = log
        .entry(LogLevel::Warn, "delivery older than stored latest")
        .with_metadata("batch_id", "oms-0301")
        .with_metadata("attempt", 2);

    assert_eq!(entry.metadata_value("batch_id"), Some("oms-0301"));
    assert_eq!(entry.metadata_value("attempt"), Some("2"));
    assert_eq!(entry.metadata_value("missing"), None);
}

#[test]
fn test_level_filter_is_exact() {
    let mut log = RunLog::new("silver_orders", ts(1, 0), LogLevel::Debug);
    log.debug("extracted 3 records");
    log.info("loaded 3 deliveries");
    log.warn("row rejected");

    assert_eq!(log.filter_by_level(LogLevel::Warn).len(), 1);
    assert_eq!(log.filter_by_level(LogLevel::Trace).len(), 0);
    assert_eq!(log.into_entries().len(), 3);
}
