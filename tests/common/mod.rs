#![allow(dead_code)]

use std::sync::Arc;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use dhme::config::{EngineConfig, TargetConfig, ORDERS_TARGET};
use dhme::{
    AttributeValue, Attributes, Engine, LogLevel, MemorySource, MemoryTransactionalStore, MemoryVersionStore,
    MemoryWatermarkStore, SourceRow, TargetKind,
};

pub const CUSTOMERS: &str = "customers";

pub const CUSTOMER_COLUMNS: [&str; 4] = ["customer_id", "segment", "city", "updated_at"];

pub const ORDER_COLUMNS: [&str; 11] = [
    "order_id",
    "customer_id",
    "order_date",
    "order_status",
    "shipping_address",
    "payment_method",
    "subtotal",
    "discount_amount",
    "shipping_cost",
    "total_amount",
    "updated_at",
];

pub fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

pub fn customers_config() -> TargetConfig {
    TargetConfig::new(CUSTOMERS, TargetKind::Historized, "customer_id", "updated_at")
        .with_tracked_columns(&["segment", "city"])
}

pub fn engine_config() -> EngineConfig {
    let retail = EngineConfig::retail();
    let orders = retail.target(ORDERS_TARGET).unwrap().clone();
    EngineConfig::new().with_target(customers_config()).with_target(orders)
}

/// Customer row ingested at `ingested`, changed at source at `updated`
pub fn customer_row(key: &str, segment: &str, updated: DateTime<Utc>, ingested: DateTime<Utc>) -> SourceRow {
    let mut values = Attributes::new();
    values.insert("customer_id".into(), key.into());
    values.insert("segment".into(), segment.into());
    values.insert("city".into(), "Campinas".into());
    values.insert("updated_at".into(), updated.into());
    SourceRow::new(values, ingested, format!("batch-{}", ingested.format("%d%H")), "oracle")
}

pub fn order_values(key: &str, subtotal: f64, discount: f64, shipping: f64, total: f64) -> Attributes {
    let mut values = Attributes::new();
    values.insert("order_id".into(), key.into());
    values.insert("customer_id".into(), "C1".into());
    values.insert(
        "order_date".into(),
        AttributeValue::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
    );
    values.insert("order_status".into(), "CONFIRMED".into());
    values.insert("shipping_address".into(), "Rua A, 1".into());
    values.insert("payment_method".into(), "PIX".into());
    values.insert("subtotal".into(), AttributeValue::Number(subtotal));
    values.insert("discount_amount".into(), AttributeValue::Number(discount));
    values.insert("shipping_cost".into(), AttributeValue::Number(shipping));
    values.insert("total_amount".into(), AttributeValue::Number(total));
    values.insert("updated_at".into(), ts(1, 0).into());
    values
}

pub fn order_row(values: Attributes, ingested: DateTime<Utc>) -> SourceRow {
    SourceRow::new(values, ingested, format!("batch-{}", ingested.format("%d%H")), "sqlserver")
}

pub struct Fixture {
    pub engine: Engine,
    pub source: Arc<MemorySource>,
    pub customers: Arc<MemoryVersionStore>,
    pub orders: Arc<MemoryTransactionalStore>,
    pub watermarks: Arc<MemoryWatermarkStore>,
}

pub fn fixture() -> Fixture {
    fixture_with(engine_config())
}

pub fn fixture_with(config: EngineConfig) -> Fixture {
    let source = Arc::new(
        MemorySource::new()
            .with_schema(CUSTOMERS, &CUSTOMER_COLUMNS)
            .with_schema(ORDERS_TARGET, &ORDER_COLUMNS),
    );
    let customers = Arc::new(MemoryVersionStore::new());
    let orders = Arc::new(MemoryTransactionalStore::new());
    let watermarks = Arc::new(MemoryWatermarkStore::new());

    let engine = Engine::builder()
        .with_config(config)
        .with_source(source.clone())
        .with_watermark_store(watermarks.clone())
        .with_version_store(CUSTOMERS, customers.clone())
        .with_transactional_store(ORDERS_TARGET, orders.clone())
        .with_log_level(LogLevel::Debug)
        .build()
        .unwrap();

    Fixture {
        engine,
        source,
        customers,
        orders,
        watermarks,
    }
}
