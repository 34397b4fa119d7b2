use std::collections::BTreeMap;

use super::declaration::ClassDeclaration;
use crate::core::{OdmError, Result};

/// Supplies the raw declarations of mapped classes
pub trait MappingSource: Send + Sync {
    /// Declaration for a class, `None` when the class is not mapped
    fn load(&self, class_name: &str) -> Result<Option<ClassDeclaration>>;

    /// Every class this source knows about
    fn class_names(&self) -> Vec<String>;
}

/// Declarations held in memory, built in code or parsed from JSON
#[derive(Debug, Clone, Default)]
pub struct StaticMappingSource {
    declarations: BTreeMap<String, ClassDeclaration>,
}

impl StaticMappingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, declaration: ClassDeclaration) -> Self {
        self.add(declaration);
        self
    }

    /// Register a declaration, replacing any previous one for the class
    pub fn add(&mut self, declaration: ClassDeclaration) {
        self.declarations
            .insert(declaration.class_name.clone(), declaration);
    }

    /// Parse a JSON array of class declarations
    pub fn from_json(json: &str) -> Result<Self> {
        let declarations: Vec<ClassDeclaration> = serde_json::from_str(json)
            .map_err(|err| OdmError::Mapping(format!("Malformed mapping document: {}", err)))?;

        let mut source = Self::new();
        for declaration in declarations {
            if source.declarations.contains_key(&declaration.class_name) {
                return Err(OdmError::Mapping(format!(
                    "Class '{}' is declared twice",
                    declaration.class_name
                )));
            }
            source.add(declaration);
        }
        Ok(source)
    }
}

impl MappingSource for StaticMappingSource {
    fn load(&self, class_name: &str) -> Result<Option<ClassDeclaration>> {
        Ok(self.declarations.get(class_name).cloned())
    }

    fn class_names(&self) -> Vec<String> {
        self.declarations.keys().cloned().collect()
    }
}
