use chrono::NaiveDate;
use crate::types::{AttributeValue, Attributes};
use super::{days_between, Enricher, TierScale};

const SEGMENTS: [&str; 4] = ["BRONZE", "SILVER", "GOLD", "PLATINUM"];

const REGIONS: [(&str, &[&str]); 5] = [
    ("NORTE", &["AC", "AP", "AM", "PA", "RO", "RR", "TO"]),
    ("NORDESTE", &["AL", "BA", "CE", "MA", "PB", "PE", "PI", "RN", "SE"]),
    ("CENTRO_OESTE", &["DF", "GO", "MT", "MS"]),
    ("SUDESTE", &["ES", "MG", "RJ", "SP"]),
    ("SUL", &["PR", "RS", "SC"]),
];

/// Region of a Brazilian state code, `UNKNOWN` otherwise
pub fn region_of(state: &str) -> &'static str {
    let state = state.trim().to_ascii_uppercase();
    REGIONS
        .iter()
        .find(|(_, states)| states.contains(&state.as_str()))
        .map_or("UNKNOWN", |(region, _)| region)
}

/// Full name, tenure, segment rank and region of a customer
#[derive(Debug, Clone)]
pub struct CustomerEnricher {
    target: String,
    tenure: TierScale,
}

impl CustomerEnricher {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            tenure: TierScale::new(&[(90.0, "NEW"), (365.0, "ESTABLISHED"), (1095.0, "LOYAL")], "VETERAN"),
        }
    }
}

impl Enricher for CustomerEnricher {
    fn target(&self) -> &str {
        &self.target
    }

    fn derive(&self, attributes: &Attributes, as_of: NaiveDate) -> Attributes {
        let mut derived = Attributes::new();

        let name_parts: Vec<&str> = ["first_name", "last_name"]
            .iter()
            .filter_map(|column| attributes.get(*column).and_then(AttributeValue::as_str))
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        let full_name = if name_parts.is_empty() {
            AttributeValue::Null
        } else {
            AttributeValue::text(name_parts.join(" "))
        };
        derived.insert("full_name".to_string(), full_name);

        match attributes.get("registration_date").and_then(AttributeValue::as_date) {
            Some(registered) => {
                let days = days_between(registered, as_of);
                derived.insert("tenure_days".to_string(), AttributeValue::Int(days));
                derived.insert(
                    "tenure_bucket".to_string(),
                    AttributeValue::text(self.tenure.classify(days as f64)),
                );
            }
            None => {
                derived.insert("tenure_days".to_string(), AttributeValue::Null);
                derived.insert("tenure_bucket".to_string(), AttributeValue::Null);
            }
        }

        let rank = attributes
            .get("customer_segment")
            .and_then(AttributeValue::as_str)
            .and_then(|segment| SEGMENTS.iter().position(|s| *s == segment))
            .map_or(AttributeValue::Null, |i| AttributeValue::Int(i as i64 + 1));
        derived.insert("segment_rank".to_string(), rank);

        let region = attributes
            .get("state")
            .and_then(AttributeValue::as_str)
            .map_or("UNKNOWN", region_of);
        derived.insert("region".to_string(), AttributeValue::text(region));

        derived
    }
}
