//! Declarative mapping input.
//!
//! A [`ClassDeclaration`] is the raw, unvalidated description of one mapped
//! class as supplied by a [`MappingSource`](super::MappingSource). It can be
//! deserialized from JSON or assembled with the builder methods below;
//! validation happens when it is turned into [`ClassMetadata`](super::ClassMetadata).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::association::Cardinality;
use super::discriminator::DiscriminatorMap;
use super::field::FieldType;
use crate::query::SortKey;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassDeclaration {
    pub class_name: String,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub repository_class: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDeclaration>,
    #[serde(default)]
    pub references: Vec<ReferenceDeclaration>,
}

impl ClassDeclaration {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn repository_class(mut self, repository: impl Into<String>) -> Self {
        self.repository_class = Some(repository.into());
        self
    }

    pub fn field(mut self, field: FieldDeclaration) -> Self {
        self.fields.push(field);
        self
    }

    pub fn reference(mut self, reference: ReferenceDeclaration) -> Self {
        self.references.push(reference);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDeclaration {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub store_as: Option<String>,
}

impl FieldDeclaration {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            ..Default::default()
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.store_as = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeDeclaration {
    Persist,
    Remove,
    Refresh,
    Detach,
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceDeclaration {
    pub name: String,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub target_class: Option<String>,
    #[serde(default)]
    pub simple: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub store_as: Option<String>,
    #[serde(default)]
    pub discriminator_field: Option<String>,
    #[serde(default)]
    pub discriminator_map: Option<DiscriminatorMap>,
    #[serde(default)]
    pub default_discriminator_value: Option<String>,
    #[serde(default)]
    pub cascade: Vec<CascadeDeclaration>,
    #[serde(default)]
    pub orphan_removal: bool,
    #[serde(default)]
    pub inversed_by: Option<String>,
    #[serde(default)]
    pub mapped_by: Option<String>,
    #[serde(default)]
    pub lazy_load: Option<bool>,
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub criteria: Value,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub skip: Option<usize>,
    #[serde(default)]
    pub repository_method: Option<String>,
}

impl ReferenceDeclaration {
    fn new(name: impl Into<String>, cardinality: Cardinality) -> Self {
        Self {
            name: name.into(),
            cardinality,
            target_class: None,
            simple: false,
            nullable: false,
            store_as: None,
            discriminator_field: None,
            discriminator_map: None,
            default_discriminator_value: None,
            cascade: Vec::new(),
            orphan_removal: false,
            inversed_by: None,
            mapped_by: None,
            lazy_load: None,
            sort: Vec::new(),
            criteria: Value::Null,
            limit: None,
            skip: None,
            repository_method: None,
        }
    }

    /// Single-valued reference
    pub fn one(name: impl Into<String>) -> Self {
        Self::new(name, Cardinality::One)
    }

    /// Multi-valued reference
    pub fn many(name: impl Into<String>) -> Self {
        Self::new(name, Cardinality::Many)
    }

    pub fn target(mut self, class_name: impl Into<String>) -> Self {
        self.target_class = Some(class_name.into());
        self
    }

    pub fn simple(mut self) -> Self {
        self.simple = true;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn store_as(mut self, key: impl Into<String>) -> Self {
        self.store_as = Some(key.into());
        self
    }

    pub fn discriminator_field(mut self, field: impl Into<String>) -> Self {
        self.discriminator_field = Some(field.into());
        self
    }

    pub fn discriminator<I, T, C>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (T, C)>,
        T: Into<String>,
        C: Into<String>,
    {
        self.discriminator_map = Some(
            entries
                .into_iter()
                .map(|(tag, class)| (tag.into(), class.into()))
                .collect(),
        );
        self
    }

    pub fn default_discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.default_discriminator_value = Some(value.into());
        self
    }

    pub fn cascade<I: IntoIterator<Item = CascadeDeclaration>>(mut self, ops: I) -> Self {
        self.cascade.extend(ops);
        self
    }

    pub fn cascade_all(self) -> Self {
        self.cascade([CascadeDeclaration::All])
    }

    pub fn orphan_removal(mut self) -> Self {
        self.orphan_removal = true;
        self
    }

    pub fn inversed_by(mut self, property: impl Into<String>) -> Self {
        self.inversed_by = Some(property.into());
        self
    }

    pub fn mapped_by(mut self, property: impl Into<String>) -> Self {
        self.mapped_by = Some(property.into());
        self
    }

    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy_load = Some(lazy);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn criteria(mut self, criteria: Value) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn repository_method(mut self, method: impl Into<String>) -> Self {
        self.repository_method = Some(method.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_class_declaration() {
        let declaration: ClassDeclaration = serde_json::from_value(json!({
            "className": "Post",
            "collection": "posts",
            "fields": [
                {"name": "title"},
                {"name": "createdAt", "type": "date", "nullable": true}
            ],
            "references": [
                {"name": "author", "cardinality": "one", "targetClass": "User", "cascade": ["persist"]},
                {
                    "name": "comments",
                    "cardinality": "many",
                    "targetClass": "Comment",
                    "mappedBy": "post",
                    "sort": [{"field": "createdAt", "direction": "desc"}],
                    "limit": 10
                }
            ]
        }))
        .unwrap();

        assert_eq!(declaration.collection.as_deref(), Some("posts"));
        assert_eq!(declaration.fields[0].field_type, FieldType::String);
        assert_eq!(declaration.fields[1].field_type, FieldType::Date);
        assert_eq!(declaration.references[0].cascade, vec![CascadeDeclaration::Persist]);
        assert_eq!(declaration.references[1].cardinality, Cardinality::Many);
        assert_eq!(declaration.references[1].limit, Some(10));
        assert_eq!(declaration.references[1].lazy_load, None);
    }

    #[test]
    fn test_builder_matches_json() {
        let built = ClassDeclaration::new("Post").reference(
            ReferenceDeclaration::one("author")
                .target("User")
                .cascade([CascadeDeclaration::Persist]),
        );
        let parsed: ClassDeclaration = serde_json::from_value(json!({
            "className": "Post",
            "references": [
                {"name": "author", "cardinality": "one", "targetClass": "User", "cascade": ["persist"]}
            ]
        }))
        .unwrap();
        assert_eq!(built, parsed);
    }
}
