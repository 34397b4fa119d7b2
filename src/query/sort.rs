// ============================================================================
// src/query/sort.rs - Document ordering
// ============================================================================
//
// - Multi-key sorting (stable, keeps relative order of equal documents)
// - Missing/null values last for ASC, first for DESC
// - Numbers, strings, booleans, Date structures and pointers compare within
//   their own kind; mixed kinds fall back to a fixed kind rank so the order
//   stays total
//
// ============================================================================

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::core::Document;
use crate::core::document::reference_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[serde(alias = "ASC", alias = "1")]
    Asc,
    #[serde(alias = "DESC", alias = "-1")]
    Desc,
}

/// Strategy for placing missing values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullOrdering {
    NullsFirst,
    NullsLast,
}

impl NullOrdering {
    pub fn default_for_direction(direction: SortDirection) -> Self {
        match direction {
            SortDirection::Asc => Self::NullsLast,
            SortDirection::Desc => Self::NullsFirst,
        }
    }
}

/// One (field, direction) pair of a sort specification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Desc)
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let left = a.get(&self.field).filter(|v| !v.is_null());
        let right = b.get(&self.field).filter(|v| !v.is_null());
        let nulls = NullOrdering::default_for_direction(self.direction);

        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => match nulls {
                NullOrdering::NullsFirst => Ordering::Less,
                NullOrdering::NullsLast => Ordering::Greater,
            },
            (Some(_), None) => match nulls {
                NullOrdering::NullsFirst => Ordering::Greater,
                NullOrdering::NullsLast => Ordering::Less,
            },
            (Some(l), Some(r)) => {
                let ordering = total_order(l, r);
                match self.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            }
        }
    }
}

/// Stable multi-key sort
pub fn sort_documents(documents: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    documents.sort_by(|a, b| compare_documents(a, b, keys));
}

/// Ordering of two documents under a multi-key sort
pub fn compare_documents(a: &Document, b: &Document, keys: &[SortKey]) -> Ordering {
    for key in keys {
        match key.compare(a, b) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

enum Scalar<'a> {
    Number(f64),
    Text(&'a str),
    Boolean(bool),
    Date(DateTime<FixedOffset>),
    Reference(&'a str),
}

impl Scalar<'_> {
    fn rank(&self) -> u8 {
        match self {
            Self::Number(_) => 0,
            Self::Text(_) => 1,
            Self::Boolean(_) => 2,
            Self::Date(_) => 3,
            Self::Reference(_) => 4,
        }
    }
}

fn scalar(value: &Value) -> Option<Scalar<'_>> {
    match value {
        Value::Number(n) => n.as_f64().map(Scalar::Number),
        Value::String(s) => Some(Scalar::Text(s)),
        Value::Bool(b) => Some(Scalar::Boolean(*b)),
        Value::Object(map) => match map.get("__type").and_then(Value::as_str) {
            Some("Date") => map
                .get("iso")
                .and_then(Value::as_str)
                .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
                .map(Scalar::Date),
            Some("Pointer") => reference_id(value).map(Scalar::Reference),
            _ => None,
        },
        _ => None,
    }
}

/// Ordering between two values of the same kind, `None` when they are not
/// comparable (different kinds, arrays, plain objects).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (scalar(a)?, scalar(b)?) {
        (Scalar::Number(x), Scalar::Number(y)) => x.partial_cmp(&y),
        (Scalar::Text(x), Scalar::Text(y)) => Some(x.cmp(y)),
        (Scalar::Boolean(x), Scalar::Boolean(y)) => Some(x.cmp(&y)),
        (Scalar::Date(x), Scalar::Date(y)) => Some(x.cmp(&y)),
        (Scalar::Reference(x), Scalar::Reference(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn total_order(a: &Value, b: &Value) -> Ordering {
    if let Some(ordering) = compare_values(a, b) {
        return ordering;
    }
    let rank = |v: &Value| scalar(v).map(|s| s.rank()).unwrap_or(u8::MAX);
    rank(a).cmp(&rank(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn names(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d["name"].as_str().unwrap()).collect()
    }

    #[test]
    fn test_sort_desc_nulls_first() {
        let mut docs = vec![
            doc(json!({"name": "a", "score": 1})),
            doc(json!({"name": "b"})),
            doc(json!({"name": "c", "score": 3})),
        ];
        sort_documents(&mut docs, &[SortKey::desc("score")]);
        assert_eq!(names(&docs), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_sort_asc_nulls_last() {
        let mut docs = vec![
            doc(json!({"name": "a", "score": null})),
            doc(json!({"name": "b", "score": 2})),
            doc(json!({"name": "c", "score": 1.5})),
        ];
        sort_documents(&mut docs, &[SortKey::asc("score")]);
        assert_eq!(names(&docs), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_sort_multiple_keys_is_stable() {
        let mut docs = vec![
            doc(json!({"name": "a", "group": 1, "rank": 2})),
            doc(json!({"name": "b", "group": 0, "rank": 1})),
            doc(json!({"name": "c", "group": 1, "rank": 1})),
            doc(json!({"name": "d", "group": 1, "rank": 1})),
        ];
        sort_documents(&mut docs, &[SortKey::asc("group"), SortKey::asc("rank")]);
        assert_eq!(names(&docs), vec!["b", "c", "d", "a"]);
    }

    #[test]
    fn test_date_structures_compare_chronologically() {
        let earlier = json!({"__type": "Date", "iso": "2024-01-01T10:00:00+02:00"});
        let later = json!({"__type": "Date", "iso": "2024-01-01T09:00:00Z"});
        assert_eq!(compare_values(&earlier, &later), Some(Ordering::Less));
    }

    #[test]
    fn test_mixed_kinds_are_not_comparable() {
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(compare_values(&json!([1]), &json!([1])), None);
    }

    #[test]
    fn test_direction_aliases() {
        let keys: Vec<SortKey> =
            serde_json::from_value(json!([{"field": "a", "direction": "DESC"}])).unwrap();
        assert_eq!(keys[0].direction, SortDirection::Desc);
    }
}
