use chrono::NaiveDate;
use crate::types::{AttributeValue, Attributes};
use super::{days_between, round2, Enricher, TierScale};

/// Value band, age, validity and net amount of an order
#[derive(Debug, Clone)]
pub struct OrderEnricher {
    target: String,
    value_bands: TierScale,
    age_buckets: TierScale,
}

impl OrderEnricher {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            value_bands: TierScale::new(&[(100.0, "SMALL"), (500.0, "MEDIUM"), (2000.0, "LARGE")], "XLARGE"),
            age_buckets: TierScale::new(&[(7.0, "RECENT"), (30.0, "MONTH"), (90.0, "QUARTER")], "OLDER"),
        }
    }
}

impl Enricher for OrderEnricher {
    fn target(&self) -> &str {
        &self.target
    }

    fn derive(&self, attributes: &Attributes, as_of: NaiveDate) -> Attributes {
        let mut derived = Attributes::new();
        let number = |column: &str| attributes.get(column).and_then(AttributeValue::as_f64);

        let band = number("total_amount")
            .map_or(AttributeValue::Null, |total| AttributeValue::text(self.value_bands.classify(total)));
        derived.insert("order_value_band".to_string(), band);

        match attributes.get("order_date").and_then(AttributeValue::as_date) {
            Some(ordered) => {
                let days = days_between(ordered, as_of);
                derived.insert("order_age_days".to_string(), AttributeValue::Int(days));
                derived.insert(
                    "order_age_bucket".to_string(),
                    AttributeValue::text(self.age_buckets.classify(days as f64)),
                );
            }
            None => {
                derived.insert("order_age_days".to_string(), AttributeValue::Null);
                derived.insert("order_age_bucket".to_string(), AttributeValue::Null);
            }
        }

        let valid = attributes
            .get("validation_status")
            .and_then(AttributeValue::as_str)
            .is_some_and(|status| status == "VALID");
        derived.insert("is_valid".to_string(), AttributeValue::Bool(valid));

        // Net of discount, before shipping
        let net = match (number("subtotal"), number("discount_amount")) {
            (Some(subtotal), discount) => AttributeValue::Number(round2(subtotal - discount.unwrap_or(0.0))),
            (None, _) => AttributeValue::Null,
        };
        derived.insert("net_amount".to_string(), net);

        derived
    }
}
