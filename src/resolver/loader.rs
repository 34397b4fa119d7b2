use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Document, Result};
use crate::storage::StorageAdapter;

/// Inputs handed to a custom repository method
pub struct LoaderContext<'a> {
    pub owner_class: &'a str,
    /// `None` while the owner is not persisted
    pub owner_id: Option<&'a str>,
    pub property: &'a str,
    /// Value stored under the reference key on the owner, if any
    pub raw: Option<&'a Value>,
    /// Collection of the target class
    pub collection: &'a str,
    pub storage: &'a dyn StorageAdapter,
}

/// Custom loader named by an association's `repository_method`
///
/// Registered on the resolver under (repository name, method name).
#[async_trait]
pub trait ReferenceLoader: Send + Sync {
    async fn load(&self, context: LoaderContext<'_>) -> Result<Vec<Document>>;
}
