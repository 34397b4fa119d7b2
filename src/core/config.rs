use serde::{Deserialize, Serialize};

use super::Result;

/// Mapping engine configuration
///
/// Holds the defaults applied while building class metadata and the limits
/// used by the association resolver. Every field has a default, so a partial
/// JSON document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OdmConfig {
    /// Prefix prepended to every derived collection name
    pub collection_prefix: Option<String>,

    /// Lazy-load flag for ONE references that do not declare one
    pub lazy_one_by_default: bool,

    /// Lazy-load flag for MANY references that do not declare one
    pub lazy_many_by_default: bool,

    /// Upper bound on concurrent element fetches while materializing a collection
    pub max_concurrent_fetches: usize,
}

impl Default for OdmConfig {
    fn default() -> Self {
        Self {
            collection_prefix: None,
            lazy_one_by_default: false,
            lazy_many_by_default: true,
            max_concurrent_fetches: 8,
        }
    }
}

impl OdmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the collection prefix
    pub fn collection_prefix(mut self, prefix: &str) -> Self {
        self.collection_prefix = Some(prefix.to_string());
        self
    }

    /// Set the default lazy flag for ONE references
    pub fn lazy_one_by_default(mut self, lazy: bool) -> Self {
        self.lazy_one_by_default = lazy;
        self
    }

    /// Set the default lazy flag for MANY references
    pub fn lazy_many_by_default(mut self, lazy: bool) -> Self {
        self.lazy_many_by_default = lazy;
        self
    }

    /// Set the fetch concurrency limit (clamped to at least 1)
    pub fn max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    /// Parse from a JSON document
    ///
    /// # Examples
    ///
    /// ```
    /// # use parse_odm::OdmConfig;
    /// let config = OdmConfig::from_json(r#"{"collectionPrefix": "app_"}"#).unwrap();
    /// assert_eq!(config.collection_prefix.as_deref(), Some("app_"));
    /// assert!(config.lazy_many_by_default);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.max_concurrent_fetches = config.max_concurrent_fetches.max(1);
        Ok(config)
    }

    /// Collection name for a class, honoring the configured prefix
    pub fn collection_name_for(&self, base: &str) -> String {
        match &self.collection_prefix {
            Some(prefix) => format!("{}{}", prefix, base),
            None => base.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OdmConfig::default();
        assert!(!config.lazy_one_by_default);
        assert!(config.lazy_many_by_default);
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.collection_name_for("Post"), "Post");
    }

    #[test]
    fn test_builder_methods() {
        let config = OdmConfig::new()
            .collection_prefix("tenant1_")
            .lazy_one_by_default(true)
            .max_concurrent_fetches(0);

        assert!(config.lazy_one_by_default);
        assert_eq!(config.max_concurrent_fetches, 1);
        assert_eq!(config.collection_name_for("Post"), "tenant1_Post");
    }

    #[test]
    fn test_from_json_partial() {
        let config = OdmConfig::from_json(r#"{"lazyManyByDefault": false, "maxConcurrentFetches": 0}"#)
            .unwrap();
        assert!(!config.lazy_many_by_default);
        assert_eq!(config.max_concurrent_fetches, 1);
        assert_eq!(config.collection_prefix, None);
    }

    #[test]
    fn test_from_json_invalid() {
        assert!(OdmConfig::from_json("{not json").is_err());
    }
}
