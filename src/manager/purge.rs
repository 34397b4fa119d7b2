use std::sync::Arc;
use tracing::{Level, event};

use crate::core::Result;
use crate::mapping::MetadataRegistry;
use crate::storage::StorageAdapter;

/// Drops the collections of mapped classes
pub struct SchemaPurger {
    registry: Arc<MetadataRegistry>,
    storage: Arc<dyn StorageAdapter>,
}

impl SchemaPurger {
    pub fn new(registry: Arc<MetadataRegistry>, storage: Arc<dyn StorageAdapter>) -> Self {
        Self { registry, storage }
    }

    /// Drop the collection of every class whose metadata is loaded
    pub async fn purge(&self) -> Result<Vec<String>> {
        let collections: Vec<String> = self
            .registry
            .loaded_classes()?
            .iter()
            .map(|metadata| metadata.collection_name.clone())
            .collect();
        self.drop_all(collections).await
    }

    /// Load every class the mapping source declares, then drop them all
    pub async fn purge_all(&self) -> Result<Vec<String>> {
        let collections: Vec<String> = self
            .registry
            .validate_all()?
            .iter()
            .map(|metadata| metadata.collection_name.clone())
            .collect();
        self.drop_all(collections).await
    }

    async fn drop_all(&self, mut collections: Vec<String>) -> Result<Vec<String>> {
        collections.sort();
        collections.dedup();
        for collection in &collections {
            self.storage.drop_collection(collection).await?;
            event!(Level::INFO, collection = %collection, "collection dropped");
        }
        Ok(collections)
    }
}
