use chrono::NaiveDate;
use crate::types::{AttributeValue, Attributes};
use super::{round2, Enricher, TierScale};

/// Below this many units a product is `LOW` on stock
pub const LOW_STOCK_THRESHOLD: i64 = 20;

/// Margin, price tier, category path and stock status of a product
#[derive(Debug, Clone)]
pub struct ProductEnricher {
    target: String,
    price_tiers: TierScale,
}

impl ProductEnricher {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            price_tiers: TierScale::new(&[(50.0, "BUDGET"), (200.0, "STANDARD"), (1000.0, "PREMIUM")], "LUXURY"),
        }
    }
}

impl Enricher for ProductEnricher {
    fn target(&self) -> &str {
        &self.target
    }

    fn derive(&self, attributes: &Attributes, _as_of: NaiveDate) -> Attributes {
        let mut derived = Attributes::new();
        let price = attributes.get("unit_price").and_then(AttributeValue::as_f64);
        let cost = attributes.get("unit_cost").and_then(AttributeValue::as_f64);

        let margin = match (price, cost) {
            (Some(price), Some(cost)) if price > 0.0 => {
                AttributeValue::Number(round2((price - cost) / price * 100.0))
            }
            _ => AttributeValue::Null,
        };
        derived.insert("margin_pct".to_string(), margin);

        let tier = price.map_or(AttributeValue::Null, |p| AttributeValue::text(self.price_tiers.classify(p)));
        derived.insert("price_tier".to_string(), tier);

        let path: Vec<&str> = ["category_name", "subcategory_name", "brand"]
            .iter()
            .filter_map(|column| attributes.get(*column).and_then(AttributeValue::as_str))
            .filter(|part| !part.trim().is_empty())
            .collect();
        derived.insert("category_path".to_string(), AttributeValue::text(path.join(" > ")));

        let stock = match attributes.get("stock_quantity").and_then(AttributeValue::as_f64) {
            None => "UNKNOWN",
            Some(quantity) if quantity <= 0.0 => "OUT_OF_STOCK",
            Some(quantity) if quantity < LOW_STOCK_THRESHOLD as f64 => "LOW",
            Some(_) => "IN_STOCK",
        };
        derived.insert("stock_status".to_string(), AttributeValue::text(stock));

        derived
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_derivations() {
        let mut attributes = Attributes::new();
        attributes.insert("unit_price".into(), AttributeValue::Number(250.0));
        attributes.insert("unit_cost".into(), AttributeValue::Number(150.0));
        attributes.insert("category_name".into(), "Electronics".into());
        attributes.insert("subcategory_name".into(), "Audio".into());
        attributes.insert("brand".into(), "Acme".into());
        attributes.insert("stock_quantity".into(), AttributeValue::Int(5));

        let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let derived = ProductEnricher::new("silver_products").derive(&attributes, as_of);

        assert_eq!(derived["margin_pct"], AttributeValue::Number(40.0));
        assert_eq!(derived["price_tier"], AttributeValue::text("PREMIUM"));
        assert_eq!(derived["category_path"], AttributeValue::text("Electronics > Audio > Acme"));
        assert_eq!(derived["stock_status"], AttributeValue::text("LOW"));
    }

    #[test]
    fn test_zero_price_has_no_margin() {
        let mut attributes = Attributes::new();
        attributes.insert("unit_price".into(), AttributeValue::Int(0));
        attributes.insert("stock_quantity".into(), AttributeValue::Int(0));

        let as_of = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let derived = ProductEnricher::new("silver_products").derive(&attributes, as_of);

        assert_eq!(derived["margin_pct"], AttributeValue::Null);
        assert_eq!(derived["stock_status"], AttributeValue::text("OUT_OF_STOCK"));
    }
}
