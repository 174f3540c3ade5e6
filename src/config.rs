//! Static engine configuration: targets, tracked columns, rules and tolerances

use std::collections::HashSet;
use std::path::Path;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;
use crate::hasher::DEFAULT_NUMERIC_SCALE;
use crate::rule_set::{AmountComponent, RuleDescriptor, RulePredicate, RuleSet};
use crate::types::TargetKind;

/// Default tolerance for numeric reconciliation
pub const DEFAULT_EPSILON: f64 = 0.01;

/// Largest supported numeric scale for hashing
const MAX_NUMERIC_SCALE: usize = 12;

pub const CUSTOMERS_TARGET: &str = "silver_customers";
pub const PRODUCTS_TARGET: &str = "silver_products";
pub const ORDERS_TARGET: &str = "silver_orders";

pub const ORDER_STATUSES: [&str; 6] = ["PENDING", "CONFIRMED", "SHIPPED", "DELIVERED", "CANCELLED", "RETURNED"];
pub const PAYMENT_METHODS: [&str; 5] = ["CREDIT_CARD", "DEBIT_CARD", "PIX", "BOLETO", "WALLET"];

fn default_epsilon() -> f64 {
    DEFAULT_EPSILON
}

fn default_numeric_scale() -> usize {
    DEFAULT_NUMERIC_SCALE
}

/// `9999-12-31T23:59:59Z`, the `valid_to` of every open version
pub fn default_open_ended() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Configuration of one target table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub target: String,
    pub kind: TargetKind,
    pub business_key: String,
    pub tracked_columns: Vec<String>,
    pub updated_at_column: String,
    #[serde(default)]
    pub rules: Vec<RuleDescriptor>,
}

impl TargetConfig {
    pub fn new(target: &str, kind: TargetKind, business_key: &str, updated_at_column: &str) -> Self {
        Self {
            target: target.to_string(),
            kind,
            business_key: business_key.to_string(),
            tracked_columns: Vec::new(),
            updated_at_column: updated_at_column.to_string(),
            rules: Vec::new(),
        }
    }

    pub fn with_tracked_columns(mut self, columns: &[&str]) -> Self {
        self.tracked_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_rule(mut self, rule: RuleDescriptor) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rule_set(&self) -> RuleSet {
        RuleSet::new(self.rules.clone())
    }

    /// Every column the target reads from the extract
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut columns = vec![self.business_key.as_str(), self.updated_at_column.as_str()];
        columns.extend(self.tracked_columns.iter().map(String::as_str));
        for rule in &self.rules {
            columns.extend(rule.predicate.columns());
        }

        let mut seen = HashSet::new();
        columns.retain(|c| seen.insert(*c));
        columns
    }

    /// Structural checks that do not need the extract schema
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.business_key.trim().is_empty() {
            return Err(ConfigError::MissingBusinessKey {
                target: self.target.clone(),
            });
        }
        if self.tracked_columns.is_empty() {
            return Err(ConfigError::MissingTrackedColumns {
                target: self.target.clone(),
            });
        }
        if self.updated_at_column.trim().is_empty() {
            return Err(ConfigError::InvalidSetting {
                setting: format!("{}.updated_at_column", self.target),
                reason: "must name a column".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for column in &self.tracked_columns {
            if !seen.insert(column.as_str()) {
                return Err(ConfigError::DuplicateColumn {
                    target: self.target.clone(),
                    column: column.clone(),
                });
            }
        }

        if self.kind == TargetKind::Historized {
            if let Some(rule) = self.rules.first() {
                return Err(ConfigError::InvalidRule {
                    target: self.target.clone(),
                    rule: rule.name.clone(),
                    reason: "rules are only evaluated for transactional targets".to_string(),
                });
            }
        }

        let mut names = HashSet::new();
        for rule in &self.rules {
            rule.check(&self.target)?;
            if !names.insert(rule.name.as_str()) {
                return Err(ConfigError::InvalidRule {
                    target: self.target.clone(),
                    rule: rule.name.clone(),
                    reason: "rule name used twice".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Fail fast when a configured column is absent from the extract schema
    pub fn validate_schema(&self, schema: &[String]) -> Result<(), ConfigError> {
        let available: HashSet<&str> = schema.iter().map(String::as_str).collect();
        match self.referenced_columns().into_iter().find(|c| !available.contains(c)) {
            Some(column) => Err(ConfigError::UnknownColumn {
                target: self.target.clone(),
                column: column.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Engine-wide settings plus every target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tolerance for amount reconciliation
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Decimal places numbers are rendered with before hashing
    #[serde(default = "default_numeric_scale")]
    pub numeric_scale: usize,
    #[serde(default = "default_open_ended")]
    pub open_ended_valid_to: DateTime<Utc>,
    pub targets: Vec<TargetConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            numeric_scale: DEFAULT_NUMERIC_SCALE,
            open_ended_valid_to: default_open_ended(),
            targets: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_open_ended_valid_to(mut self, open_ended: DateTime<Utc>) -> Self {
        self.open_ended_valid_to = open_ended;
        self
    }

    pub fn target(&self, name: &str) -> Result<&TargetConfig, ConfigError> {
        self.targets
            .iter()
            .find(|t| t.target == name)
            .ok_or_else(|| ConfigError::UnknownTarget {
                target: name.to_string(),
            })
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|t| t.target.as_str()).collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::InvalidSetting {
                setting: "epsilon".to_string(),
                reason: format!("must be a non-negative finite number, got {}", self.epsilon),
            });
        }
        if self.numeric_scale > MAX_NUMERIC_SCALE {
            return Err(ConfigError::InvalidSetting {
                setting: "numeric_scale".to_string(),
                reason: format!("must be at most {}, got {}", MAX_NUMERIC_SCALE, self.numeric_scale),
            });
        }
        if self.open_ended_valid_to <= DateTime::<Utc>::UNIX_EPOCH {
            return Err(ConfigError::InvalidSetting {
                setting: "open_ended_valid_to".to_string(),
                reason: "must lie after the epoch".to_string(),
            });
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            if !names.insert(target.target.as_str()) {
                return Err(ConfigError::DuplicateTarget {
                    target: target.target.clone(),
                });
            }
            target.validate()?;
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&json)
    }

    /// Customers and products historized, orders deduplicated and validated
    pub fn retail() -> Self {
        let customers = TargetConfig::new(CUSTOMERS_TARGET, TargetKind::Historized, "customer_id", "updated_at")
            .with_tracked_columns(&[
                "first_name",
                "last_name",
                "email",
                "phone",
                "address_line1",
                "city",
                "state",
                "postal_code",
                "country_code",
                "customer_segment",
                "registration_date",
                "is_active",
            ]);

        let products = TargetConfig::new(PRODUCTS_TARGET, TargetKind::Historized, "product_id", "updated_at")
            .with_tracked_columns(&[
                "product_name",
                "category_id",
                "category_name",
                "subcategory_name",
                "brand",
                "unit_price",
                "unit_cost",
                "stock_quantity",
                "is_active",
            ]);

        let orders = TargetConfig::new(ORDERS_TARGET, TargetKind::Transactional, "order_id", "updated_at")
            .with_tracked_columns(&[
                "customer_id",
                "order_date",
                "order_status",
                "shipping_address",
                "payment_method",
                "subtotal",
                "discount_amount",
                "shipping_cost",
                "total_amount",
            ])
            .with_rule(
                RuleDescriptor::error(
                    "INVALID_TOTAL",
                    RulePredicate::AmountReconciles {
                        declared: "total_amount".to_string(),
                        components: vec![
                            AmountComponent::plus("subtotal"),
                            AmountComponent::minus("discount_amount"),
                            AmountComponent::plus("shipping_cost"),
                        ],
                    },
                )
                .with_description("total = subtotal - discount + shipping"),
            )
            .with_rule(RuleDescriptor::error(
                "INVALID_STATUS",
                RulePredicate::OneOf {
                    column: "order_status".to_string(),
                    values: ORDER_STATUSES.iter().map(|s| s.to_string()).collect(),
                },
            ))
            .with_rule(RuleDescriptor::error(
                "INVALID_PAYMENT",
                RulePredicate::OneOf {
                    column: "payment_method".to_string(),
                    values: PAYMENT_METHODS.iter().map(|s| s.to_string()).collect(),
                },
            ))
            .with_rule(RuleDescriptor::warning(
                "MISSING_CUSTOMER",
                RulePredicate::NotNull {
                    column: "customer_id".to_string(),
                },
            ))
            .with_rule(RuleDescriptor::warning(
                "NEGATIVE_SHIPPING",
                RulePredicate::NonNegative {
                    column: "shipping_cost".to_string(),
                },
            ));

        Self::new()
            .with_target(customers)
            .with_target(products)
            .with_target(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retail_preset_is_valid() {
        let config = EngineConfig::retail();
        assert!(config.validate().is_ok());
        assert_eq!(config.target_names(), vec![CUSTOMERS_TARGET, PRODUCTS_TARGET, ORDERS_TARGET]);
        assert_eq!(config.target(ORDERS_TARGET).unwrap().rules.len(), 5);
    }

    #[test]
    fn test_missing_tracked_columns_rejected() {
        let config = EngineConfig::new().with_target(TargetConfig::new(
            "t",
            TargetKind::Historized,
            "id",
            "updated_at",
        ));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTrackedColumns { .. })
        ));
    }

    #[test]
    fn test_schema_validation_names_missing_column() {
        let target = TargetConfig::new("t", TargetKind::Historized, "id", "updated_at")
            .with_tracked_columns(&["segment", "city"]);
        let schema: Vec<String> = ["id", "updated_at", "segment"].iter().map(|s| s.to_string()).collect();

        match target.validate_schema(&schema) {
            Err(ConfigError::UnknownColumn { column, .. }) => assert_eq!(column, "city"),
            other => panic!("expected UnknownColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let json = r#"{
            "targets": [{
                "target": "silver_customers",
                "kind": "historized",
                "business_key": "customer_id",
                "tracked_columns": ["customer_segment"],
                "updated_at_column": "updated_at"
            }]
        }"#;
        let config = EngineConfig::from_json_str(json).unwrap();

        assert_eq!(config.epsilon, DEFAULT_EPSILON);
        assert_eq!(config.numeric_scale, DEFAULT_NUMERIC_SCALE);
        assert_eq!(config.open_ended_valid_to, default_open_ended());
        assert_eq!(config.targets[0].kind, TargetKind::Historized);
    }

    #[test]
    fn test_rules_on_historized_target_rejected() {
        let target = TargetConfig::new("t", TargetKind::Historized, "id", "updated_at")
            .with_tracked_columns(&["a"])
            .with_rule(RuleDescriptor::error(
                "A_SET",
                RulePredicate::NotNull { column: "a".to_string() },
            ));
        assert!(matches!(target.validate(), Err(ConfigError::InvalidRule { .. })));
    }
}
