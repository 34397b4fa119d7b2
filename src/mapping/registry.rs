use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use super::class_metadata::ClassMetadata;
use super::source::MappingSource;
use crate::core::{OdmConfig, OdmError, Result};

/// Process-lifetime cache of class metadata
///
/// Metadata is built on first use and never mutated afterwards. Readers take
/// the cache read lock only; construction is serialized by `build_lock` and
/// re-checks the cache, so concurrent first users observe a single build.
pub struct MetadataRegistry {
    source: Arc<dyn MappingSource>,
    config: OdmConfig,
    cache: RwLock<HashMap<String, Arc<ClassMetadata>>>,
    build_lock: Mutex<()>,
}

impl MetadataRegistry {
    pub fn new(source: Arc<dyn MappingSource>, config: OdmConfig) -> Self {
        Self {
            source,
            config,
            cache: RwLock::new(HashMap::new()),
            build_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    pub fn get_metadata_for(&self, class_name: &str) -> Result<Arc<ClassMetadata>> {
        if let Some(metadata) = self.cache.read()?.get(class_name) {
            return Ok(Arc::clone(metadata));
        }

        let _guard = self.build_lock.lock()?;

        // Another caller may have finished the build while we waited.
        if let Some(metadata) = self.cache.read()?.get(class_name) {
            return Ok(Arc::clone(metadata));
        }

        let declaration = self.source.load(class_name)?.ok_or_else(|| {
            OdmError::Mapping(format!("Class '{}' is not a mapped class", class_name))
        })?;
        if declaration.class_name != class_name {
            return Err(OdmError::Mapping(format!(
                "Mapping source returned '{}' for class '{}'",
                declaration.class_name, class_name
            )));
        }

        let metadata = match ClassMetadata::build(&declaration, &self.config) {
            Ok(metadata) => Arc::new(metadata),
            Err(err) => {
                warn!("Rejected mapping for class {}: {}", class_name, err);
                return Err(err);
            }
        };

        debug!(
            "Built metadata for class {} ({} properties, collection {})",
            class_name,
            metadata.properties().count(),
            metadata.collection_name
        );

        self.cache
            .write()?
            .insert(class_name.to_string(), Arc::clone(&metadata));
        Ok(metadata)
    }

    /// True once metadata for the class has been built and cached
    pub fn has_metadata_for(&self, class_name: &str) -> Result<bool> {
        Ok(self.cache.read()?.contains_key(class_name))
    }

    /// True when the mapping source has no declaration for the class
    pub fn is_transient(&self, class_name: &str) -> Result<bool> {
        Ok(self.source.load(class_name)?.is_none())
    }

    /// Drop one cached class, e.g. after a schema reload
    pub fn invalidate(&self, class_name: &str) -> Result<bool> {
        let _guard = self.build_lock.lock()?;
        Ok(self.cache.write()?.remove(class_name).is_some())
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.build_lock.lock()?;
        self.cache.write()?.clear();
        Ok(())
    }

    pub fn loaded_classes(&self) -> Result<Vec<Arc<ClassMetadata>>> {
        let cache = self.cache.read()?;
        let mut loaded: Vec<Arc<ClassMetadata>> = cache.values().cloned().collect();
        loaded.sort_by(|a, b| a.class_name.cmp(&b.class_name));
        Ok(loaded)
    }

    /// Load every class of the source and check cross-class consistency:
    /// targets exist and both sides of a bidirectional association agree.
    pub fn validate_all(&self) -> Result<Vec<Arc<ClassMetadata>>> {
        let mut all = Vec::new();
        for class_name in self.source.class_names() {
            all.push(self.get_metadata_for(&class_name)?);
        }

        for metadata in &all {
            for association in metadata.associations() {
                let mut targets: Vec<&str> = association.target_class.iter().map(String::as_str).collect();
                if let Some(discriminator) = &association.discriminator {
                    targets.extend(discriminator.classes());
                }
                for target in &targets {
                    self.get_metadata_for(target).map_err(|_| {
                        OdmError::Mapping(format!(
                            "'{}.{}' references unmapped class '{}'",
                            metadata.class_name,
                            association.name(),
                            target
                        ))
                    })?;
                }

                let Some(target) = association.target_class.as_deref() else {
                    continue;
                };
                let target_metadata = self.get_metadata_for(target)?;
                let counterpart = association
                    .mapped_by
                    .as_deref()
                    .or(association.inversed_by.as_deref());
                if let Some(counterpart) = counterpart {
                    let other = target_metadata.association(counterpart).map_err(|_| {
                        OdmError::Mapping(format!(
                            "'{}.{}' names '{}.{}' as its other side, which is not a reference",
                            metadata.class_name,
                            association.name(),
                            target,
                            counterpart
                        ))
                    })?;
                    if association.is_inverse_side() && other.is_inverse_side() {
                        return Err(OdmError::Mapping(format!(
                            "'{}.{}' and '{}.{}' are both inverse sides",
                            metadata.class_name,
                            association.name(),
                            target,
                            counterpart
                        )));
                    }
                }
            }
        }

        Ok(all)
    }
}
