//! Condition checkers
//!
//! Pure predicates over frames used to gate `conditional` outputs.
//!
//! - **NumberCompareCondition**: compare the latest value of a numeric field
//!   against a constant
//! - **MultipleCondition**: AND/OR combination of child conditions
//!
//! A condition never fails. A missing or non-numeric field evaluates to
//! `false`. An empty AND is `true`, an empty OR is `false`.

use crate::frame::Frame;
use crate::strategy::ConditionChecker;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator of `numberCompare` and `threshold`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberCompareOp {
    Eq,
    Ne,
    Gt,
    #[serde(alias = "ge")]
    Gte,
    Lt,
    #[serde(alias = "le")]
    Lte,
}

impl NumberCompareOp {
    /// Apply the operator as `lhs <op> rhs`
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Gt => lhs > rhs,
            Self::Gte => lhs >= rhs,
            Self::Lt => lhs < rhs,
            Self::Lte => lhs <= rhs,
        }
    }
}

impl fmt::Display for NumberCompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        };
        f.write_str(op)
    }
}

/// How child conditions of `multiple` are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionType {
    /// All children must hold
    #[default]
    #[serde(rename = "and", alias = "AND", alias = "all")]
    And,
    /// Any child must hold
    #[serde(rename = "or", alias = "OR", alias = "any")]
    Or,
}

// ============================================================================
// Number Compare
// ============================================================================

/// Compares the most recent non-null value of a numeric field
#[derive(Debug, Clone)]
pub struct NumberCompareCondition {
    field_name: String,
    op: NumberCompareOp,
    value: f64,
}

impl NumberCompareCondition {
    pub fn new(field_name: impl Into<String>, op: NumberCompareOp, value: f64) -> Self {
        Self {
            field_name: field_name.into(),
            op,
            value,
        }
    }

    /// Evaluate against a raw sample
    pub fn holds_for(&self, sample: f64) -> bool {
        self.op.compare(sample, self.value)
    }

    /// Representative value of the watched field, if any
    pub fn sample(&self, frame: &Frame) -> Option<f64> {
        frame.field(&self.field_name).and_then(|f| f.last_number())
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }
}

impl ConditionChecker for NumberCompareCondition {
    fn check(&self, frame: &Frame) -> bool {
        self.sample(frame)
            .map(|sample| self.holds_for(sample))
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "numberCompare"
    }
}

// ============================================================================
// Multiple (Composite)
// ============================================================================

/// AND/OR composite of child conditions
pub struct MultipleCondition {
    condition_type: ConditionType,
    conditions: Vec<Box<dyn ConditionChecker>>,
}

impl MultipleCondition {
    pub fn new(condition_type: ConditionType, conditions: Vec<Box<dyn ConditionChecker>>) -> Self {
        Self {
            condition_type,
            conditions,
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl ConditionChecker for MultipleCondition {
    fn check(&self, frame: &Frame) -> bool {
        match self.condition_type {
            ConditionType::And => self.conditions.iter().all(|c| c.check(frame)),
            ConditionType::Or => self.conditions.iter().any(|c| c.check(frame)),
        }
    }

    fn name(&self) -> &'static str {
        "multiple"
    }
}
