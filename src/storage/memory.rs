use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::StorageAdapter;
use crate::core::document::document_id;
use crate::core::{Document, OBJECT_ID, ObjectId, OdmError, Result};
use crate::query::Query;

#[derive(Default)]
struct Collection {
    documents: HashMap<ObjectId, Document>,
    /// Insertion order, the natural order of unsorted queries
    order: Vec<ObjectId>,
}

/// Call counters, mainly for asserting fetch behavior in tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub fetches: usize,
    pub queries: usize,
    pub persists: usize,
    pub removes: usize,
}

#[derive(Default)]
struct Counters {
    fetches: AtomicUsize,
    queries: AtomicUsize,
    persists: AtomicUsize,
    removes: AtomicUsize,
}

/// Process-local document store
pub struct InMemoryStorage {
    collections: RwLock<HashMap<String, Collection>>,
    counters: Counters,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            fetches: self.counters.fetches.load(Ordering::SeqCst),
            queries: self.counters.queries.load(Ordering::SeqCst),
            persists: self.counters.persists.load(Ordering::SeqCst),
            removes: self.counters.removes.load(Ordering::SeqCst),
        }
    }

    pub fn reset_stats(&self) {
        self.counters.fetches.store(0, Ordering::SeqCst);
        self.counters.queries.store(0, Ordering::SeqCst);
        self.counters.persists.store(0, Ordering::SeqCst);
        self.counters.removes.store(0, Ordering::SeqCst);
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or(0)
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let collections = self.collections.read().await;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStorage {
    async fn fetch_by_identifier(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.documents.get(id))
            .cloned())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        self.counters.queries.fetch_add(1, Ordering::SeqCst);
        let collections = self.collections.read().await;
        let Some(collection) = collections.get(&query.collection) else {
            return Ok(Vec::new());
        };

        let documents = collection
            .order
            .iter()
            .filter_map(|id| collection.documents.get(id))
            .cloned();
        query.apply(documents)
    }

    async fn persist(&self, collection: &str, mut document: Document) -> Result<ObjectId> {
        self.counters.persists.fetch_add(1, Ordering::SeqCst);

        let id = match document_id(&document) {
            Some(id) if !id.is_empty() => id.to_string(),
            Some(_) => {
                return Err(OdmError::Storage(format!(
                    "Empty {} in document for collection '{}'",
                    OBJECT_ID, collection
                )));
            }
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        document.insert(OBJECT_ID.to_string(), Value::String(id.clone()));

        let mut collections = self.collections.write().await;
        let target = collections.entry(collection.to_string()).or_default();
        if target.documents.insert(id.clone(), document).is_none() {
            target.order.push(id.clone());
        }
        Ok(id)
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        self.counters.removes.fetch_add(1, Ordering::SeqCst);
        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Ok(false);
        };
        if target.documents.remove(id).is_some() {
            target.order.retain(|existing| existing != id);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections.remove(collection);
        Ok(())
    }
}
