//! Mapping metadata: field and association descriptors, class metadata and
//! the registry that builds and caches them.

pub mod association;
pub mod class_metadata;
pub mod declaration;
pub mod discriminator;
pub mod field;
pub mod registry;
pub mod source;

pub use association::{AssociationDescriptor, Cardinality, CascadeOp, CascadeSet};
pub use class_metadata::{ClassMetadata, Property};
pub use declaration::{CascadeDeclaration, ClassDeclaration, FieldDeclaration, ReferenceDeclaration};
pub use discriminator::{Discriminator, DiscriminatorMap};
pub use field::{FieldDescriptor, FieldType};
pub use registry::MetadataRegistry;
pub use source::{MappingSource, StaticMappingSource};
