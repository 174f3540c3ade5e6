//! Retail Batches Example
//!
//! Loads three daily extracts of a small retail platform:
//! - Customers and products are historized, every change becomes a version
//! - Orders are deduplicated and validated, invalid totals are labelled
//! - A late, older customer change is kept for audit only
//! - A replay of an already loaded window leaves the targets unchanged
//!
//! Run with `RUST_LOG=dhme=debug` to see the engine's own events.

use std::sync::Arc;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use tracing_subscriber::prelude::*;

use dhme::config::{EngineConfig, CUSTOMERS_TARGET, ORDERS_TARGET, PRODUCTS_TARGET};
use dhme::{
    AttributeValue, Attributes, Engine, MemorySource, MemoryTransactionalStore, MemoryVersionStore,
    MemoryWatermarkStore, RunReport, SourceRow,
};

// ============================================================================
// Extract rows
// ============================================================================

fn day(n: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, n, hour, 0, 0).single().unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn date(y: i32, m: u32, d: u32) -> AttributeValue {
    NaiveDate::from_ymd_opt(y, m, d).map_or(AttributeValue::Null, AttributeValue::Date)
}

fn customer(id: &str, first: &str, last: &str, state: &str, segment: &str, updated: DateTime<Utc>) -> SourceRow {
    let mut values = Attributes::new();
    values.insert("customer_id".into(), id.into());
    values.insert("first_name".into(), first.into());
    values.insert("last_name".into(), last.into());
    values.insert("email".into(), format!("{}.{}@example.com", first, last).to_lowercase().into());
    values.insert("phone".into(), "+55 11 99999-0000".into());
    values.insert("address_line1".into(), "Rua das Flores, 100".into());
    values.insert("city".into(), "Sao Paulo".into());
    values.insert("state".into(), state.into());
    values.insert("postal_code".into(), "01000-000".into());
    values.insert("country_code".into(), "BR".into());
    values.insert("customer_segment".into(), segment.into());
    values.insert("registration_date".into(), date(2023, 1, 15));
    values.insert("is_active".into(), true.into());
    values.insert("updated_at".into(), updated.into());
    SourceRow::new(values, updated + Duration::hours(1), format!("crm-{}", updated.format("%m%d")), "oracle")
}

fn product(id: &str, name: &str, price: f64, stock: i64, updated: DateTime<Utc>) -> SourceRow {
    let mut values = Attributes::new();
    values.insert("product_id".into(), id.into());
    values.insert("product_name".into(), name.into());
    values.insert("category_id".into(), "CAT-01".into());
    values.insert("category_name".into(), "Electronics".into());
    values.insert("subcategory_name".into(), "Audio".into());
    values.insert("brand".into(), "Acme".into());
    values.insert("unit_price".into(), price.into());
    values.insert("unit_cost".into(), (price * 0.6).into());
    values.insert("stock_quantity".into(), stock.into());
    values.insert("is_active".into(), true.into());
    values.insert("updated_at".into(), updated.into());
    SourceRow::new(values, updated + Duration::hours(1), format!("erp-{}", updated.format("%m%d")), "postgres")
}

fn order(id: &str, customer: &str, subtotal: f64, discount: f64, shipping: f64, total: f64, at: DateTime<Utc>) -> SourceRow {
    let mut values = Attributes::new();
    values.insert("order_id".into(), id.into());
    values.insert("customer_id".into(), customer.into());
    values.insert("order_date".into(), at.into());
    values.insert("order_status".into(), "CONFIRMED".into());
    values.insert("shipping_address".into(), "Rua das Flores, 100".into());
    values.insert("payment_method".into(), "PIX".into());
    values.insert("subtotal".into(), subtotal.into());
    values.insert("discount_amount".into(), discount.into());
    values.insert("shipping_cost".into(), shipping.into());
    values.insert("total_amount".into(), total.into());
    values.insert("updated_at".into(), at.into());
    SourceRow::new(values, at + Duration::minutes(30), format!("oms-{}", at.format("%m%d%H")), "sqlserver")
}

// ============================================================================
// Output
// ============================================================================

fn print_report(report: &RunReport) {
    let c = &report.counts;
    println!(
        "  {:<18} {}  inserted={} updated={} unchanged={} rejected={} flagged={} dup={} closed={}",
        report.target,
        report.run_id,
        c.inserted,
        c.updated,
        c.unchanged,
        c.rejected,
        c.flagged,
        c.duplicates_discarded,
        c.closed
    );
}

fn run_day(engine: &Engine, cutoff: DateTime<Utc>) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Batch up to {} ===", cutoff.to_rfc3339());
    for (_, result) in engine.run_all(cutoff) {
        print_report(&result?);
    }
    println!();
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "dhme=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    println!("=== Retail Batches Example ===\n");

    let config = EngineConfig::retail();
    let source = Arc::new(
        config
            .targets
            .iter()
            .fold(MemorySource::new(), |source, target| {
                source.with_schema(&target.target, &target.referenced_columns())
            }),
    );
    let customers = Arc::new(MemoryVersionStore::new());
    let products = Arc::new(MemoryVersionStore::new());
    let orders = Arc::new(MemoryTransactionalStore::new());

    let engine = Engine::builder()
        .with_config(config)
        .with_source(source.clone())
        .with_watermark_store(Arc::new(MemoryWatermarkStore::new()))
        .with_version_store(CUSTOMERS_TARGET, customers.clone())
        .with_version_store(PRODUCTS_TARGET, products.clone())
        .with_transactional_store(ORDERS_TARGET, orders.clone())
        .build()?;

    // Day 1: initial extracts
    source.push(
        CUSTOMERS_TARGET,
        [
            customer("C001", "Ana", "Souza", "SP", "BRONZE", day(1, 8)),
            customer("C002", "Bruno", "Lima", "BA", "SILVER", day(1, 9)),
        ],
    )?;
    source.push(
        PRODUCTS_TARGET,
        [
            product("P001", "Headphones", 249.9, 40, day(1, 7)),
            product("P002", "Cable", 19.9, 5, day(1, 7)),
        ],
    )?;
    source.push(
        ORDERS_TARGET,
        [
            order("O001", "C001", 269.8, 0.0, 15.0, 284.8, day(1, 10)),
            order("O002", "C002", 249.9, 20.0, 0.0, 235.0, day(1, 11)),
        ],
    )?;
    run_day(&engine, day(2, 0))?;

    // Day 2: segment change, a price change, a redelivered order
    source.push(CUSTOMERS_TARGET, [customer("C001", "Ana", "Souza", "SP", "GOLD", day(2, 8))])?;
    source.push(PRODUCTS_TARGET, [product("P001", "Headphones", 229.9, 35, day(2, 7))])?;
    source.push(ORDERS_TARGET, [order("O001", "C001", 269.8, 0.0, 9.9, 279.7, day(2, 10))])?;
    run_day(&engine, day(3, 0))?;

    // Day 3: a change to C002 older than its loaded version arrives late
    let mut late = customer("C002", "Bruno", "Lima", "BA", "BRONZE", day(1, 6));
    late.ingestion_timestamp = day(3, 10);
    source.push(CUSTOMERS_TARGET, [late])?;
    run_day(&engine, day(4, 0))?;

    println!("=== Replay of day 2 ===");
    let replay = engine.replay_window(CUSTOMERS_TARGET, day(2, 0), day(3, 0))?;
    print_report(&replay);
    println!("  versions: {}, late arrivals: {}\n", customers.len(), customers.snapshot()?.late_arrivals.len());

    println!("=== Consistency ===");
    for target in [CUSTOMERS_TARGET, PRODUCTS_TARGET] {
        let issues = engine.check(target)?;
        println!("  {:<18} {} issues", target, issues.len());
    }
    println!();

    let as_of = NaiveDate::from_ymd_opt(2024, 6, 4).ok_or("invalid as_of date")?;
    println!("=== Enriched views as of {} ===", as_of);
    for target in [CUSTOMERS_TARGET, PRODUCTS_TARGET, ORDERS_TARGET] {
        println!("{}:", target);
        for row in engine.enrich(target, as_of)? {
            let derived: Vec<String> = row.derived.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            println!("  {:<6} {}", row.business_key, derived.join(" "));
        }
    }

    println!("\n{} orders stored, {} in latest view", orders.len(), engine.latest_view(ORDERS_TARGET)?.len());
    Ok(())
}
