pub mod criteria;
pub mod pattern;
pub mod sort;

pub use criteria::{Condition, Criteria};
pub use sort::{SortDirection, SortKey, sort_documents};

use crate::core::{Document, Result};

/// Query shape sent to the storage adapter: criteria ∧ sort ∧ skip ∧ limit
/// over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub criteria: Criteria,
    pub sort: Vec<SortKey>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            criteria: Criteria::new(),
            sort: Vec::new(),
            limit: None,
            skip: None,
        }
    }

    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.criteria = self.criteria.and(criteria);
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.sort = keys;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn skip(mut self, skip: Option<usize>) -> Self {
        self.skip = skip;
        self
    }

    /// True when the query neither filters, orders nor pages.
    pub fn is_unconstrained(&self) -> bool {
        self.criteria.is_empty() && self.sort.is_empty() && self.limit.is_none() && self.skip.is_none()
    }

    /// Evaluate the query over an in-memory sequence of documents
    ///
    /// Order of application: filter, sort, skip, limit.
    pub fn apply<I>(&self, documents: I) -> Result<Vec<Document>>
    where
        I: IntoIterator<Item = Document>,
    {
        let mut matched = Vec::new();
        for document in documents {
            if self.criteria.matches(&document)? {
                matched.push(document);
            }
        }

        sort_documents(&mut matched, &self.sort);

        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }

    /// Like [`Query::apply`], but returns positions into `documents` in
    /// result order, leaving the input untouched
    pub fn apply_indexed(&self, documents: &[Document]) -> Result<Vec<usize>> {
        let mut matched = Vec::new();
        for (index, document) in documents.iter().enumerate() {
            if self.criteria.matches(document)? {
                matched.push(index);
            }
        }

        matched.sort_by(|a, b| sort::compare_documents(&documents[*a], &documents[*b], &self.sort));

        let skip = self.skip.unwrap_or(0);
        let limit = self.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn docs() -> Vec<Document> {
        (1..=5)
            .map(|i| {
                json!({"n": i, "even": i % 2 == 0})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_apply_filter_sort_skip_limit() {
        let query = Query::new("items")
            .criteria(Criteria::from_json(&json!({"even": false})).unwrap())
            .sort(vec![SortKey::desc("n")])
            .skip(Some(1))
            .limit(Some(1));

        let result = query.apply(docs()).unwrap();
        let ns: Vec<&Value> = result.iter().map(|d| &d["n"]).collect();
        assert_eq!(ns, vec![&json!(3)]);
    }

    #[test]
    fn test_apply_indexed_keeps_positions() {
        let query = Query::new("items").sort(vec![SortKey::desc("n")]).limit(Some(2));
        assert_eq!(query.apply_indexed(&docs()).unwrap(), vec![4, 3]);
    }

    #[test]
    fn test_unconstrained() {
        assert!(Query::new("items").is_unconstrained());
        assert!(!Query::new("items").limit(Some(1)).is_unconstrained());
        assert_eq!(Query::new("items").apply(docs()).unwrap().len(), 5);
    }
}
