// ============================================================================
// parse_odm Library
// ============================================================================

//! Object-document mapping for Parse-style document stores.
//!
//! Mapped classes are described by [`ClassDeclaration`]s and compiled into
//! immutable [`ClassMetadata`] by the [`MetadataRegistry`]. The
//! [`AssociationResolver`] turns stored documents into managed instances,
//! following pointers eagerly or through lazy handles, and the
//! [`CascadePlanner`] orders persist/remove work across an object graph.
//! [`DocumentManager`] ties them together over a [`StorageAdapter`].
//!
//! ```
//! use std::sync::Arc;
//! use parse_odm::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let source = StaticMappingSource::new()
//!     .with_class(
//!         ClassDeclaration::new("Post")
//!             .field(FieldDeclaration::new("title", FieldType::String))
//!             .reference(ReferenceDeclaration::one("author").target("User").cascade_all()),
//!     )
//!     .with_class(ClassDeclaration::new("User"));
//!
//! let registry = Arc::new(MetadataRegistry::new(Arc::new(source), OdmConfig::default()));
//! let manager = DocumentManager::new(registry, Arc::new(InMemoryStorage::new()));
//!
//! let author = manager.create("User")?;
//! let post = manager.create("Post")?;
//! manager.set_field(post, "title", "Hello".into())?;
//! manager.set_reference(post, "author", Some(author))?;
//!
//! let plan = manager.persist(post).await?;
//! assert!(plan.position(author, CascadeOp::Persist) < plan.position(post, CascadeOp::Persist));
//! assert!(manager.id(post)?.is_some());
//! # Ok::<(), OdmError>(())
//! # }).unwrap();
//! ```

pub mod cascade;
pub mod core;
pub mod graph;
pub mod manager;
pub mod mapping;
pub mod prelude;
pub mod query;
pub mod resolver;
pub mod storage;

pub use cascade::{CascadePlan, CascadePlanner, PlannedOperation};
pub use crate::core::{Document, OdmConfig, OdmError, ObjectId, Pointer, Result};
pub use graph::{InstanceKey, ObjectGraph};
pub use manager::{DocumentManager, SchemaPurger};
pub use mapping::{
    AssociationDescriptor, Cardinality, CascadeOp, ClassDeclaration, ClassMetadata,
    MappingSource, MetadataRegistry, ReferenceDeclaration, StaticMappingSource,
};
pub use resolver::{AssociationResolver, ReferenceLoader, ResolutionWarning, Resolved};
pub use storage::{InMemoryStorage, StorageAdapter};
