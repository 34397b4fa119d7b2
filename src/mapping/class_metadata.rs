use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::association::AssociationDescriptor;
use super::declaration::ClassDeclaration;
use super::field::FieldDescriptor;
use crate::core::{OBJECT_ID, OdmConfig, OdmError, Result};

/// A mapped property: plain field or reference
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Field(FieldDescriptor),
    Association(Arc<AssociationDescriptor>),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::Field(field) => &field.name,
            Property::Association(association) => association.name(),
        }
    }

    pub fn store_as(&self) -> &str {
        match self {
            Property::Field(field) => &field.store_as,
            Property::Association(association) => association.store_as(),
        }
    }
}

/// Mapping descriptor of one class
///
/// Immutable once built; shared as `Arc<ClassMetadata>` by the resolver,
/// the cascade planner and the document manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetadata {
    pub class_name: String,
    pub collection_name: String,
    pub repository_class: Option<String>,
    /// Ordered by property name so traversal order is deterministic
    properties: BTreeMap<String, Property>,
}

impl ClassMetadata {
    pub fn build(declaration: &ClassDeclaration, config: &OdmConfig) -> Result<Self> {
        let class_name = declaration.class_name.trim();
        if class_name.is_empty() {
            return Err(OdmError::Mapping("Class declaration without a class name".to_string()));
        }

        let collection_name = config.collection_name_for(
            declaration.collection.as_deref().unwrap_or(class_name),
        );

        let mut properties = BTreeMap::new();
        let mut stored_keys = HashSet::new();

        let mut add = |property: Property| -> Result<()> {
            let name = property.name().to_string();
            if name.is_empty() {
                return Err(OdmError::Mapping(format!(
                    "Class '{}' declares a property with an empty name",
                    class_name
                )));
            }
            if property.store_as() == OBJECT_ID {
                return Err(OdmError::Mapping(format!(
                    "Property '{}.{}' cannot be stored under the reserved key '{}'",
                    class_name, name, OBJECT_ID
                )));
            }
            if !stored_keys.insert(property.store_as().to_string()) {
                return Err(OdmError::Mapping(format!(
                    "Class '{}' maps two properties onto the stored key '{}'",
                    class_name,
                    property.store_as()
                )));
            }
            if properties.insert(name.clone(), property).is_some() {
                return Err(OdmError::Mapping(format!(
                    "Property '{}' is declared twice on class '{}'",
                    name, class_name
                )));
            }
            Ok(())
        };

        for field in &declaration.fields {
            let mut descriptor = FieldDescriptor::new(field.name.as_str(), field.field_type);
            descriptor.nullable = field.nullable;
            if let Some(key) = &field.store_as {
                descriptor.store_as = key.clone();
            }
            add(Property::Field(descriptor))?;
        }

        for reference in &declaration.references {
            let descriptor = AssociationDescriptor::from_declaration(reference, config).map_err(|err| {
                match err {
                    OdmError::Mapping(msg) => {
                        OdmError::Mapping(format!("Class '{}': {}", class_name, msg))
                    }
                    other => other,
                }
            })?;
            add(Property::Association(Arc::new(descriptor)))?;
        }

        Ok(Self {
            class_name: class_name.to_string(),
            collection_name,
            repository_class: declaration.repository_class.clone(),
            properties,
        })
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        match self.properties.get(name) {
            Some(Property::Field(field)) => Some(field),
            _ => None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.properties.values().filter_map(|p| match p {
            Property::Field(field) => Some(field),
            Property::Association(_) => None,
        })
    }

    pub fn associations(&self) -> impl Iterator<Item = &Arc<AssociationDescriptor>> {
        self.properties.values().filter_map(|p| match p {
            Property::Association(association) => Some(association),
            Property::Field(_) => None,
        })
    }

    pub fn association(&self, name: &str) -> Result<&Arc<AssociationDescriptor>> {
        match self.properties.get(name) {
            Some(Property::Association(association)) => Ok(association),
            _ => Err(OdmError::Mapping(format!(
                "'{}' is not a reference of class '{}'",
                name, self.class_name
            ))),
        }
    }

    /// Key under which custom loaders for this class are registered
    pub fn repository_name(&self) -> &str {
        self.repository_class.as_deref().unwrap_or(&self.class_name)
    }
}
