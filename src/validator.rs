//! Generic rule engine evaluating declared business rules per record

use serde::{Deserialize, Serialize};
use crate::rule_set::{RuleSet, Severity};
use crate::types::{Attributes, ValidationStatus};

/// Result of validating one record. The record is never dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    /// Failing warning-level rules, in rule order
    pub flags: Vec<String>,
    /// Record attributes with rule substitutions applied
    pub attributes: Attributes,
    /// Values computed by the rules
    pub derived: Attributes,
}

/// Evaluates an ordered rule set with a numeric tolerance
#[derive(Debug, Clone)]
pub struct Validator {
    rules: RuleSet,
    epsilon: f64,
}

impl Validator {
    pub fn new(rules: RuleSet, epsilon: f64) -> Self {
        Self { rules, epsilon }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every rule against the attributes as delivered.
    ///
    /// Status is the name of the first failing error rule, or `VALID`.
    /// Substitutions are applied after all rules ran, so later rules never
    /// see values computed by earlier ones.
    pub fn validate(&self, attributes: &Attributes) -> ValidationOutcome {
        let mut status = ValidationStatus::Valid;
        let mut flags = Vec::new();
        let mut derived = Attributes::new();
        let mut substitutions = Attributes::new();

        for rule in self.rules.rules() {
            let outcome = rule.predicate.evaluate(attributes, self.epsilon);
            derived.extend(outcome.derived);

            if outcome.passed {
                continue;
            }
            substitutions.extend(outcome.substitutions);
            match rule.severity {
                Severity::Error if status.is_valid() => {
                    status = ValidationStatus::Invalid(rule.name.clone());
                }
                Severity::Error => {}
                Severity::Warning => flags.push(rule.name.clone()),
            }
        }

        let mut attributes = attributes.clone();
        attributes.extend(substitutions);

        ValidationOutcome {
            status,
            flags,
            attributes,
            derived,
        }
    }
}
