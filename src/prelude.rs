//! Everything needed to declare mappings and work with a document manager.

pub use crate::cascade::{CascadePlan, CascadePlanner, PlannedOperation};
pub use crate::core::{Document, OdmConfig, OdmError, ObjectId, Pointer, Result};
pub use crate::graph::InstanceKey;
pub use crate::manager::{DocumentManager, SchemaPurger};
pub use crate::mapping::{
    CascadeDeclaration, CascadeOp, ClassDeclaration, FieldDeclaration, FieldType,
    MetadataRegistry, ReferenceDeclaration, StaticMappingSource,
};
pub use crate::query::{Condition, Criteria, SortKey};
pub use crate::resolver::{LoaderContext, ReferenceLoader};
pub use crate::storage::{InMemoryStorage, StorageAdapter};
