//! Filter predicates over raw documents.
//!
//! A [`Criteria`] is a conjunction of per-field [`Condition`]s. It is built
//! either programmatically or from a where-clause document in the remote
//! store's syntax (`{"field": value}` or `{"field": {"$gt": value}}`).

use serde_json::Value;
use std::cmp::Ordering;

use super::pattern::{eval_regex, get_or_compile_regex};
use super::sort::compare_values;
use crate::core::document::reference_id;
use crate::core::{Document, ObjectId, OdmError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Exists(bool),
    Regex { pattern: String, options: String },
    /// Field holds a reference (pointer, bare id, or array of either) to the
    /// given identifier.
    References(ObjectId),
}

impl Condition {
    fn evaluate(&self, value: Option<&Value>) -> Result<bool> {
        let value = value.filter(|v| !v.is_null());

        let result = match self {
            Condition::Eq(expected) => value.is_some_and(|v| contains_equal(v, expected)),
            Condition::Ne(expected) => !value.is_some_and(|v| contains_equal(v, expected)),
            Condition::Gt(bound) => compare(value, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compare(value, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compare(value, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compare(value, bound, |o| o != Ordering::Greater),
            Condition::In(options) => {
                value.is_some_and(|v| options.iter().any(|o| contains_equal(v, o)))
            }
            Condition::NotIn(options) => {
                !value.is_some_and(|v| options.iter().any(|o| contains_equal(v, o)))
            }
            Condition::Exists(expected) => value.is_some() == *expected,
            Condition::Regex { pattern, options } => match value.and_then(Value::as_str) {
                Some(text) => eval_regex(text, pattern, options)?,
                None => false,
            },
            Condition::References(id) => value.is_some_and(|v| references(v, id)),
        };

        Ok(result)
    }
}

fn compare(value: Option<&Value>, bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    value
        .and_then(|v| compare_values(v, bound))
        .is_some_and(accept)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Object(_), _) | (_, Value::Object(_)) => {
            match (pointer_id(a), pointer_id(b)) {
                (Some(x), Some(y)) => x == y,
                _ => a == b,
            }
        }
        _ => a == b,
    }
}

fn pointer_id(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) if map.get("__type").and_then(Value::as_str) == Some("Pointer") => {
            reference_id(value)
        }
        _ => None,
    }
}

/// Array fields match when any element matches.
fn contains_equal(value: &Value, expected: &Value) -> bool {
    match (value, expected) {
        (Value::Array(items), expected) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        _ => values_equal(value, expected),
    }
}

fn references(value: &Value, id: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| references(item, id)),
        other => reference_id(other) == Some(id),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    clauses: Vec<(String, Condition)>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, condition: Condition) -> Self {
        self.clauses.push((name.into(), condition));
        self
    }

    /// Conjunction of both criteria
    pub fn and(mut self, other: Criteria) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    pub fn matches(&self, document: &Document) -> Result<bool> {
        for (field, condition) in &self.clauses {
            if !condition.evaluate(document.get(field))? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Parse a where-clause document.
    ///
    /// Regex patterns are compiled here so that a bad pattern is reported
    /// while the mapping is loaded.
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::new()),
            Value::Object(map) => map,
            other => {
                return Err(OdmError::Mapping(format!(
                    "Criteria must be an object, got {}",
                    other
                )));
            }
        };

        let mut criteria = Self::new();
        for (field, spec) in map {
            match spec {
                Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for condition in parse_operators(field, ops)? {
                        criteria.clauses.push((field.clone(), condition));
                    }
                }
                other => criteria.clauses.push((field.clone(), Condition::Eq(other.clone()))),
            }
        }
        Ok(criteria)
    }
}

fn parse_operators(field: &str, ops: &serde_json::Map<String, Value>) -> Result<Vec<Condition>> {
    let list = |op: &str, v: &Value| -> Result<Vec<Value>> {
        v.as_array().cloned().ok_or_else(|| {
            OdmError::Mapping(format!("Operator {} on '{}' expects an array", op, field))
        })
    };

    let mut conditions = Vec::with_capacity(ops.len());
    for (op, operand) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => Condition::In(list(op, operand)?),
            "$nin" => Condition::NotIn(list(op, operand)?),
            "$exists" => Condition::Exists(operand.as_bool().ok_or_else(|| {
                OdmError::Mapping(format!("$exists on '{}' expects a boolean", field))
            })?),
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| {
                    OdmError::Mapping(format!("$regex on '{}' expects a string", field))
                })?;
                let options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
                get_or_compile_regex(pattern, options)?;
                Condition::Regex {
                    pattern: pattern.to_string(),
                    options: options.to_string(),
                }
            }
            "$options" => continue,
            other => {
                return Err(OdmError::Mapping(format!(
                    "Unsupported operator {} on '{}'",
                    other, field
                )));
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}
