//! Declarative validation rules

use serde::{Deserialize, Serialize};
use crate::error::ConfigError;
use crate::types::{AttributeValue, Attributes};

/// Slack added to the configured epsilon to absorb binary float error
const FLOAT_SLACK: f64 = 1e-9;

/// What a failing rule does to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// First failing error rule becomes the record's validation status
    #[default]
    Error,
    /// Failure is recorded as a flag, status unaffected
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sign {
    Plus,
    Minus,
}

/// One addend of a reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountComponent {
    pub column: String,
    pub sign: Sign,
}

impl AmountComponent {
    pub fn plus(column: &str) -> Self {
        Self { column: column.to_string(), sign: Sign::Plus }
    }

    pub fn minus(column: &str) -> Self {
        Self { column: column.to_string(), sign: Sign::Minus }
    }
}

/// Predicate evaluated by the generic rule engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RulePredicate {
    /// `declared` equals the signed sum of `components` within epsilon
    AmountReconciles {
        declared: String,
        components: Vec<AmountComponent>,
    },
    /// Text value is one of `values`
    OneOf { column: String, values: Vec<String> },
    NotNull { column: String },
    NonNegative { column: String },
}

/// Result of evaluating one predicate against one record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PredicateOutcome {
    pub passed: bool,
    /// Values the rule computed, stored alongside the record
    pub derived: Attributes,
    /// Replacements applied to the record's own attributes
    pub substitutions: Attributes,
}

impl PredicateOutcome {
    fn pass() -> Self {
        Self { passed: true, ..Default::default() }
    }

    fn fail() -> Self {
        Self::default()
    }
}

impl RulePredicate {
    /// Columns this predicate reads
    pub fn columns(&self) -> Vec<&str> {
        match self {
            RulePredicate::AmountReconciles { declared, components } => {
                let mut columns = vec![declared.as_str()];
                columns.extend(components.iter().map(|c| c.column.as_str()));
                columns
            }
            RulePredicate::OneOf { column, .. }
            | RulePredicate::NotNull { column }
            | RulePredicate::NonNegative { column } => vec![column.as_str()],
        }
    }

    pub fn evaluate(&self, attributes: &Attributes, epsilon: f64) -> PredicateOutcome {
        match self {
            RulePredicate::AmountReconciles { declared, components } => {
                reconcile(attributes, declared, components, epsilon)
            }
            RulePredicate::OneOf { column, values } => {
                match attributes.get(column).and_then(AttributeValue::as_str) {
                    Some(value) if values.iter().any(|allowed| allowed == value) => PredicateOutcome::pass(),
                    _ => PredicateOutcome::fail(),
                }
            }
            RulePredicate::NotNull { column } => match attributes.get(column) {
                None | Some(AttributeValue::Null) => PredicateOutcome::fail(),
                Some(AttributeValue::Text(s)) if s.trim().is_empty() => PredicateOutcome::fail(),
                Some(_) => PredicateOutcome::pass(),
            },
            RulePredicate::NonNegative { column } => {
                match attributes.get(column).and_then(AttributeValue::as_f64) {
                    Some(value) if value >= 0.0 => PredicateOutcome::pass(),
                    _ => PredicateOutcome::fail(),
                }
            }
        }
    }
}

fn reconcile(
    attributes: &Attributes,
    declared: &str,
    components: &[AmountComponent],
    epsilon: f64,
) -> PredicateOutcome {
    let computed: Option<f64> = components.iter().try_fold(0.0, |sum, component| {
        let value = attributes.get(&component.column).and_then(AttributeValue::as_f64)?;
        Some(match component.sign {
            Sign::Plus => sum + value,
            Sign::Minus => sum - value,
        })
    });

    // Without every component there is nothing to reconcile against
    let Some(computed) = computed else {
        return PredicateOutcome::fail();
    };

    let mut outcome = PredicateOutcome::default();
    outcome
        .derived
        .insert(format!("computed_{}", declared), AttributeValue::Number(computed));

    let declared_value = attributes.get(declared).and_then(AttributeValue::as_f64);
    outcome.passed = matches!(declared_value, Some(v) if (v - computed).abs() <= epsilon + FLOAT_SLACK);

    if !outcome.passed {
        let original = attributes.get(declared).cloned().unwrap_or(AttributeValue::Null);
        outcome.derived.insert(format!("declared_{}", declared), original);
        outcome
            .substitutions
            .insert(declared.to_string(), AttributeValue::Number(computed));
    }

    outcome
}

/// A named rule: predicate plus severity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub name: String,
    pub predicate: RulePredicate,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
}

impl RuleDescriptor {
    pub fn error(name: &str, predicate: RulePredicate) -> Self {
        Self {
            name: name.to_string(),
            predicate,
            severity: Severity::Error,
            description: None,
        }
    }

    pub fn warning(name: &str, predicate: RulePredicate) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(name, predicate)
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub(crate) fn check(&self, target: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidRule {
            target: target.to_string(),
            rule: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("rule name is empty"));
        }
        if self.name == "VALID" {
            return Err(invalid("VALID is reserved for passing records"));
        }
        match &self.predicate {
            RulePredicate::AmountReconciles { components, .. } if components.is_empty() => {
                Err(invalid("amount reconciliation needs at least one component"))
            }
            RulePredicate::OneOf { values, .. } if values.is_empty() => {
                Err(invalid("one_of needs at least one allowed value"))
            }
            _ => Ok(()),
        }
    }
}

/// Ordered rules for one target
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    rules: Vec<RuleDescriptor>,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleDescriptor>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[RuleDescriptor] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
