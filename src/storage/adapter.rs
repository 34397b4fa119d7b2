use async_trait::async_trait;

use crate::core::{Document, ObjectId, Result};
use crate::query::Query;

/// Storage adapter trait - the only path to the remote document store
///
/// Transport, authentication, timeouts and retries belong to the
/// implementation; the mapping engine only sees documents.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Fetch one document by identifier, `None` when it does not exist
    async fn fetch_by_identifier(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Run a query and return the matching documents in query order
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Insert or update a document, returning its identifier
    ///
    /// A document carrying an identifier replaces the stored one; otherwise a
    /// new identifier is assigned.
    async fn persist(&self, collection: &str, document: Document) -> Result<ObjectId>;

    /// Remove a document, returning whether it existed
    async fn remove(&self, collection: &str, id: &str) -> Result<bool>;

    /// Drop a whole collection
    async fn drop_collection(&self, collection: &str) -> Result<()>;
}
