use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::declaration::{CascadeDeclaration, ReferenceDeclaration};
use super::discriminator::Discriminator;
use super::field::{FieldDescriptor, FieldType};
use crate::core::{OdmConfig, OdmError, Result};
use crate::query::{Criteria, Query, SortKey};

/// Tag key used when a discriminator map is declared without a field name
pub const DEFAULT_DISCRIMINATOR_FIELD: &str = "_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// Operations that can propagate along an association
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CascadeOp {
    Persist,
    Remove,
    Refresh,
    Detach,
}

impl CascadeOp {
    pub const ALL: [CascadeOp; 4] = [Self::Persist, Self::Remove, Self::Refresh, Self::Detach];
}

pub type CascadeSet = BTreeSet<CascadeOp>;

/// Reference semantics of one mapped property
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDescriptor {
    pub field: FieldDescriptor,
    pub cardinality: Cardinality,
    /// Stores bare identifiers instead of pointer structures
    pub simple: bool,
    pub target_class: Option<String>,
    pub discriminator: Option<Discriminator>,
    pub cascade: CascadeSet,
    pub orphan_removal: bool,
    pub inversed_by: Option<String>,
    pub mapped_by: Option<String>,
    pub lazy_load: bool,
    pub sort: Vec<SortKey>,
    pub criteria: Criteria,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub repository_method: Option<String>,
}

impl AssociationDescriptor {
    /// Build and validate a descriptor from its declaration
    pub fn from_declaration(declaration: &ReferenceDeclaration, config: &OdmConfig) -> Result<Self> {
        let name = declaration.name.as_str();
        if name.is_empty() {
            return Err(OdmError::Mapping("Reference with an empty name".to_string()));
        }

        let discriminator = match (&declaration.discriminator_map, &declaration.discriminator_field) {
            (Some(map), field) => Some(Discriminator {
                field: field
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DISCRIMINATOR_FIELD.to_string()),
                map: map.clone(),
                default_value: declaration.default_discriminator_value.clone(),
            }),
            (None, Some(_)) => {
                return Err(OdmError::Mapping(format!(
                    "'{}' declares a discriminator field without a discriminator map",
                    name
                )));
            }
            (None, None) => {
                if declaration.default_discriminator_value.is_some() {
                    return Err(OdmError::Mapping(format!(
                        "'{}' declares a default discriminator value without a discriminator map",
                        name
                    )));
                }
                None
            }
        };

        let mut cascade = CascadeSet::new();
        for op in &declaration.cascade {
            match op {
                CascadeDeclaration::Persist => cascade.insert(CascadeOp::Persist),
                CascadeDeclaration::Remove => cascade.insert(CascadeOp::Remove),
                CascadeDeclaration::Refresh => cascade.insert(CascadeOp::Refresh),
                CascadeDeclaration::Detach => cascade.insert(CascadeOp::Detach),
                CascadeDeclaration::All => {
                    cascade.extend(CascadeOp::ALL);
                    true
                }
            };
        }

        let field_type = match declaration.cardinality {
            Cardinality::Many => FieldType::Array,
            Cardinality::One if declaration.simple => FieldType::String,
            Cardinality::One => FieldType::Object,
        };
        let mut field = FieldDescriptor::new(name, field_type);
        field.nullable = declaration.nullable;
        if let Some(key) = &declaration.store_as {
            field.store_as = key.clone();
        }

        let lazy_load = declaration.lazy_load.unwrap_or(match declaration.cardinality {
            Cardinality::One => config.lazy_one_by_default,
            Cardinality::Many => config.lazy_many_by_default,
        });

        let descriptor = Self {
            field,
            cardinality: declaration.cardinality,
            simple: declaration.simple,
            target_class: declaration.target_class.clone(),
            discriminator,
            cascade,
            orphan_removal: declaration.orphan_removal,
            inversed_by: declaration.inversed_by.clone(),
            mapped_by: declaration.mapped_by.clone(),
            lazy_load,
            sort: declaration.sort.clone(),
            criteria: Criteria::from_json(&declaration.criteria).map_err(|err| match err {
                OdmError::Mapping(msg) => OdmError::Mapping(format!("'{}': {}", name, msg)),
                other => other,
            })?,
            limit: declaration.limit,
            skip: declaration.skip,
            repository_method: declaration.repository_method.clone(),
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Check the descriptor invariants
    pub fn validate(&self) -> Result<()> {
        let name = self.name();
        let fail = |msg: &str| Err(OdmError::Mapping(format!("'{}' {}", name, msg)));

        if self.inversed_by.is_some() && self.mapped_by.is_some() {
            return fail("cannot declare both inversedBy and mappedBy");
        }
        if self.target_class.is_none() && self.discriminator.is_none() {
            return fail("needs a target class or a discriminator map");
        }
        if self.is_many() && self.simple && self.discriminator.is_some() {
            return fail("cannot combine simple references with a discriminator map");
        }
        if self.simple && self.mapped_by.is_some() {
            return fail("is an inverse side and stores nothing, so it cannot be simple");
        }
        if self.orphan_removal && self.is_inverse_side() && !self.cascades(CascadeOp::Remove) {
            return fail("uses orphanRemoval on an inverse side without cascading remove");
        }
        if self.is_one() && self.has_query_shape() {
            return fail("is a ONE reference and cannot declare sort, criteria, limit or skip");
        }
        if self.target_class.is_none() && (self.mapped_by.is_some() || self.repository_method.is_some()) {
            return fail("needs a target class to be loaded by query or repository method");
        }
        if let Some(discriminator) = &self.discriminator {
            discriminator.validate(name)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    /// Key of the reference in the owner's stored representation
    pub fn store_as(&self) -> &str {
        &self.field.store_as
    }

    pub fn nullable(&self) -> bool {
        self.field.nullable
    }

    pub fn is_reference(&self) -> bool {
        true
    }

    pub fn is_one(&self) -> bool {
        self.cardinality == Cardinality::One
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Owning sides (and unidirectional references) store the pointer
    pub fn is_owning_side(&self) -> bool {
        self.mapped_by.is_none()
    }

    pub fn is_inverse_side(&self) -> bool {
        self.mapped_by.is_some()
    }

    pub fn is_bidirectional(&self) -> bool {
        self.inversed_by.is_some() || self.mapped_by.is_some()
    }

    pub fn cascades(&self, op: CascadeOp) -> bool {
        self.cascade.contains(&op)
    }

    pub fn has_query_shape(&self) -> bool {
        !self.sort.is_empty() || !self.criteria.is_empty() || self.limit.is_some() || self.skip.is_some()
    }

    /// Concrete target class for a stored discriminator tag
    pub fn resolve_target(&self, tag: Option<&str>) -> Result<&str> {
        match (&self.discriminator, &self.target_class) {
            (Some(discriminator), _) => discriminator.resolve(tag),
            (None, Some(target)) => Ok(target),
            (None, None) => Err(OdmError::Mapping(format!(
                "'{}' has no target class",
                self.name()
            ))),
        }
    }

    /// Query shape over the given collection
    pub fn query_for(&self, collection: &str) -> Query {
        Query::new(collection)
            .criteria(self.criteria.clone())
            .sort(self.sort.clone())
            .limit(self.limit)
            .skip(self.skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(declaration: ReferenceDeclaration) -> Result<AssociationDescriptor> {
        AssociationDescriptor::from_declaration(&declaration, &OdmConfig::default())
    }

    #[test]
    fn test_lazy_defaults_follow_cardinality() {
        let one = build(ReferenceDeclaration::one("author").target("User")).unwrap();
        let many = build(ReferenceDeclaration::many("tags").target("Tag")).unwrap();
        assert!(!one.lazy_load);
        assert!(many.lazy_load);
        assert!(one.is_reference());
        assert_eq!(many.field.field_type, FieldType::Array);
    }

    #[test]
    fn test_explicit_lazy_overrides_default() {
        let one = build(ReferenceDeclaration::one("author").target("User").lazy(true)).unwrap();
        assert!(one.lazy_load);
    }

    #[test]
    fn test_both_sides_declared_is_rejected() {
        let err = build(
            ReferenceDeclaration::one("author")
                .target("User")
                .inversed_by("posts")
                .mapped_by("posts"),
        )
        .unwrap_err();
        assert!(matches!(err, OdmError::Mapping(msg) if msg.contains("inversedBy")));
    }

    #[test]
    fn test_missing_target_is_rejected() {
        assert!(matches!(
            build(ReferenceDeclaration::one("author")),
            Err(OdmError::Mapping(_))
        ));
    }

    #[test]
    fn test_discriminator_without_target_is_allowed() {
        let descriptor = build(
            ReferenceDeclaration::one("media")
                .discriminator_field("kind")
                .discriminator([("img", "Image"), ("vid", "Video")]),
        )
        .unwrap();
        assert_eq!(descriptor.resolve_target(Some("vid")).unwrap(), "Video");
        assert!(descriptor.resolve_target(Some("doc")).is_err());
    }

    #[test]
    fn test_default_discriminator_field_name() {
        let descriptor = build(
            ReferenceDeclaration::one("media").discriminator([("img", "Image")]),
        )
        .unwrap();
        assert_eq!(
            descriptor.discriminator.unwrap().field,
            DEFAULT_DISCRIMINATOR_FIELD
        );
    }

    #[test]
    fn test_simple_many_with_discriminator_is_rejected() {
        let err = build(
            ReferenceDeclaration::many("media")
                .simple()
                .discriminator([("img", "Image")]),
        )
        .unwrap_err();
        assert!(matches!(err, OdmError::Mapping(msg) if msg.contains("simple")));
    }

    #[test]
    fn test_simple_one_with_discriminator_is_allowed() {
        assert!(build(
            ReferenceDeclaration::one("media")
                .simple()
                .discriminator([("img", "Image")])
                .default_discriminator_value("img"),
        )
        .is_ok());
    }

    #[test]
    fn test_discriminator_field_without_map_is_rejected() {
        assert!(build(
            ReferenceDeclaration::one("media")
                .target("Image")
                .discriminator_field("kind")
        )
        .is_err());
    }

    #[test]
    fn test_query_shape_on_one_is_rejected() {
        assert!(build(ReferenceDeclaration::one("author").target("User").limit(1)).is_err());
        assert!(build(
            ReferenceDeclaration::one("author")
                .target("User")
                .criteria(json!({"active": true}))
        )
        .is_err());
    }

    #[test]
    fn test_inverse_orphan_removal_requires_cascade_remove() {
        assert!(build(
            ReferenceDeclaration::many("comments")
                .target("Comment")
                .mapped_by("post")
                .orphan_removal()
        )
        .is_err());

        assert!(build(
            ReferenceDeclaration::many("comments")
                .target("Comment")
                .mapped_by("post")
                .orphan_removal()
                .cascade([CascadeDeclaration::Remove])
        )
        .is_ok());
    }

    #[test]
    fn test_simple_inverse_side_is_rejected() {
        assert!(build(
            ReferenceDeclaration::many("comments")
                .target("Comment")
                .mapped_by("post")
                .simple()
        )
        .is_err());
    }

    #[test]
    fn test_cascade_all_expands() {
        let descriptor = build(ReferenceDeclaration::one("author").target("User").cascade_all()).unwrap();
        for op in CascadeOp::ALL {
            assert!(descriptor.cascades(op));
        }
    }

    #[test]
    fn test_query_for_carries_shape() {
        let descriptor = build(
            ReferenceDeclaration::many("comments")
                .target("Comment")
                .mapped_by("post")
                .sort(SortKey::desc("createdAt"))
                .criteria(json!({"approved": true}))
                .limit(2)
                .skip(1),
        )
        .unwrap();

        let query = descriptor.query_for("comments");
        assert_eq!(query.collection, "comments");
        assert_eq!(query.limit, Some(2));
        assert_eq!(query.skip, Some(1));
        assert_eq!(query.sort, vec![SortKey::desc("createdAt")]);
        assert_eq!(query.criteria.clauses().len(), 1);
        assert!(descriptor.is_inverse_side());
        assert!(descriptor.is_bidirectional());
    }

    #[test]
    fn test_invalid_criteria_names_property() {
        let err = build(
            ReferenceDeclaration::many("comments")
                .target("Comment")
                .criteria(json!({"a": {"$bogus": 1}})),
        )
        .unwrap_err();
        assert!(matches!(err, OdmError::Mapping(msg) if msg.contains("comments")));
    }
}
