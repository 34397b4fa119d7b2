//! Discriminator-based polymorphism for references.
//!
//! The discriminator map is the closed set of classes a polymorphic
//! reference may point to. Stored tags are only ever looked up in that map;
//! an unknown tag never becomes a class name by itself.

use std::collections::BTreeMap;

use crate::core::{OdmError, Result};

/// Tag value → concrete class name
pub type DiscriminatorMap = BTreeMap<String, String>;

/// Resolve the class for a stored tag.
///
/// Lookup order: the stored tag, then the default. The default may be given
/// either as a tag or as one of the classes listed in the map.
pub fn resolve<'a>(
    map: &'a DiscriminatorMap,
    stored: Option<&str>,
    default: Option<&'a str>,
) -> Result<&'a str> {
    if let Some(class_name) = stored.and_then(|tag| map.get(tag)) {
        return Ok(class_name);
    }

    if let Some(default) = default {
        if let Some(class_name) = map.get(default) {
            return Ok(class_name);
        }
        if let Some(class_name) = map.values().find(|c| c.as_str() == default) {
            return Ok(class_name);
        }
    }

    Err(OdmError::UnresolvedDiscriminator {
        value: stored.map(str::to_string),
    })
}

/// Reverse lookup used when writing a reference
pub fn tag_for<'a>(map: &'a DiscriminatorMap, class_name: &str) -> Option<&'a str> {
    map.iter()
        .find(|(_, class)| class.as_str() == class_name)
        .map(|(tag, _)| tag.as_str())
}

/// Discriminator settings of one association
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discriminator {
    /// Key inside the stored reference (or target document) holding the tag
    pub field: String,
    pub map: DiscriminatorMap,
    pub default_value: Option<String>,
}

impl Discriminator {
    pub fn resolve(&self, stored: Option<&str>) -> Result<&str> {
        resolve(&self.map, stored, self.default_value.as_deref())
    }

    pub fn tag_for(&self, class_name: &str) -> Option<&str> {
        tag_for(&self.map, class_name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.map.values().map(String::as_str)
    }

    pub(crate) fn validate(&self, property: &str) -> Result<()> {
        if self.map.is_empty() {
            return Err(OdmError::Mapping(format!(
                "Discriminator map of '{}' is empty",
                property
            )));
        }
        if let Some(default) = &self.default_value {
            let known = self.map.contains_key(default) || self.map.values().any(|c| c == default);
            if !known {
                return Err(OdmError::Mapping(format!(
                    "Default discriminator value '{}' of '{}' is not part of its map",
                    default, property
                )));
            }
        }
        Ok(())
    }
}
