//! # Filter Expression AST
//!
//! Structured form of `$filter`. Adapters receive this tree and translate
//! it into their own query language; [`FilterExpr::matches`] evaluates it
//! directly against JSON documents for in-memory backends.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOperator {
    /// Parse the OData keyword
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "eq" => Some(FilterOperator::Eq),
            "ne" => Some(FilterOperator::Ne),
            "gt" => Some(FilterOperator::Gt),
            "ge" => Some(FilterOperator::Ge),
            "lt" => Some(FilterOperator::Lt),
            "le" => Some(FilterOperator::Le),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Gt => "gt",
            FilterOperator::Ge => "ge",
            FilterOperator::Lt => "lt",
            FilterOperator::Le => "le",
        }
    }

    /// Operator with operands swapped (`5 lt x` == `x gt 5`)
    pub fn flipped(&self) -> Self {
        match self {
            FilterOperator::Gt => FilterOperator::Lt,
            FilterOperator::Ge => FilterOperator::Le,
            FilterOperator::Lt => FilterOperator::Gt,
            FilterOperator::Le => FilterOperator::Ge,
            other => *other,
        }
    }
}

/// String predicates usable inside `$filter`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringFunction {
    Contains,
    StartsWith,
    EndsWith,
}

impl StringFunction {
    fn apply(&self, haystack: &str, needle: &str) -> bool {
        match self {
            StringFunction::Contains => haystack.contains(needle),
            StringFunction::StartsWith => haystack.starts_with(needle),
            StringFunction::EndsWith => haystack.ends_with(needle),
        }
    }
}

/// A filter expression tree
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterExpr {
    /// No `$filter`; matches everything
    #[default]
    All,

    /// `field op literal`
    Compare {
        field: String,
        operator: FilterOperator,
        value: Value,
    },

    /// `contains(field, 'x') eq true` and friends
    Function {
        function: StringFunction,
        field: String,
        argument: String,
        expected: bool,
    },

    And {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },

    Or {
        left: Box<FilterExpr>,
        right: Box<FilterExpr>,
    },

    Not {
        expr: Box<FilterExpr>,
    },
}

impl FilterExpr {
    pub fn compare(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        FilterExpr::Compare {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::compare(field, FilterOperator::Eq, value)
    }

    pub fn and(self, other: FilterExpr) -> Self {
        FilterExpr::And {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn or(self, other: FilterExpr) -> Self {
        FilterExpr::Or {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    pub fn negate(self) -> Self {
        FilterExpr::Not {
            expr: Box::new(self),
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, FilterExpr::All)
    }

    /// The id literal when this is exactly `_id eq <literal>`
    pub fn entity_id(&self) -> Option<&Value> {
        match self {
            FilterExpr::Compare {
                field,
                operator: FilterOperator::Eq,
                value,
            } if field == "_id" => Some(value),
            _ => None,
        }
    }

    /// Check if a document matches this filter
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            FilterExpr::All => true,
            FilterExpr::Compare {
                field,
                operator,
                value,
            } => {
                let field_value = lookup(doc, field).unwrap_or(&Value::Null);
                match operator {
                    FilterOperator::Eq => loosely_equal(field_value, value),
                    FilterOperator::Ne => !loosely_equal(field_value, value),
                    FilterOperator::Gt => {
                        compare_json_values(field_value, value) == Some(Ordering::Greater)
                    }
                    FilterOperator::Ge => matches!(
                        compare_json_values(field_value, value),
                        Some(Ordering::Greater | Ordering::Equal)
                    ),
                    FilterOperator::Lt => {
                        compare_json_values(field_value, value) == Some(Ordering::Less)
                    }
                    FilterOperator::Le => matches!(
                        compare_json_values(field_value, value),
                        Some(Ordering::Less | Ordering::Equal)
                    ),
                }
            }
            FilterExpr::Function {
                function,
                field,
                argument,
                expected,
            } => {
                let hit = lookup(doc, field)
                    .and_then(Value::as_str)
                    .map(|s| function.apply(s, argument))
                    .unwrap_or(false);
                hit == *expected
            }
            FilterExpr::And { left, right } => left.matches(doc) && right.matches(doc),
            FilterExpr::Or { left, right } => left.matches(doc) || right.matches(doc),
            FilterExpr::Not { expr } => !expr.matches(doc),
        }
    }
}

/// Resolve a dotted member path
pub fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |current, segment| current.get(segment))
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            compare_json_values(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Compare two JSON values for ordering
pub fn compare_json_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            let a_f = a.as_f64().unwrap_or(0.0);
            let b_f = b.as_f64().unwrap_or(0.0);
            a_f.partial_cmp(&b_f)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
