//! Lazy handles.
//!
//! A handle starts unresolved and resolves exactly once. Both handle types
//! wrap a shared `tokio::sync::OnceCell`: concurrent first accesses wait on
//! the single in-flight load instead of issuing their own, and a failed load
//! leaves the cell empty so a later access can try again.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::AssociationResolver;
use crate::core::{ObjectId, Pointer, Result};
use crate::graph::InstanceKey;
use crate::mapping::AssociationDescriptor;

/// How the target of a ONE reference is located
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceTarget {
    /// Stored pointer on the owning side
    Pointer(Pointer),
    /// Inverse side: query the target collection for a back-reference
    Inverse,
    /// Custom repository method, fed with the raw stored value
    Loader(Option<Value>),
}

/// Everything needed to load a ONE reference later
#[derive(Debug, Clone)]
pub struct ReferenceRequest {
    pub owner: InstanceKey,
    pub owner_class: String,
    pub owner_id: Option<ObjectId>,
    pub descriptor: Arc<AssociationDescriptor>,
    pub target: ReferenceTarget,
}

/// Deferred single-valued reference
#[derive(Clone)]
pub struct LazyReference {
    request: Arc<ReferenceRequest>,
    cell: Arc<OnceCell<Option<InstanceKey>>>,
}

impl LazyReference {
    pub fn new(request: ReferenceRequest) -> Self {
        Self {
            request: Arc::new(request),
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub fn request(&self) -> &ReferenceRequest {
        &self.request
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    /// Resolved target without triggering a load
    pub fn peek(&self) -> Option<Option<InstanceKey>> {
        self.cell.get().copied()
    }

    /// Both handles share the same resolution cell
    pub fn ptr_eq(&self, other: &LazyReference) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    /// Resolve on first access, then return the cached target
    pub async fn get(&self, resolver: &AssociationResolver) -> Result<Option<InstanceKey>> {
        let target = self
            .cell
            .get_or_try_init(|| resolver.load_reference(&self.request))
            .await?;
        Ok(*target)
    }
}

impl fmt::Debug for LazyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyReference")
            .field("property", &self.request.descriptor.name())
            .field("target", &self.request.target)
            .field("resolved", &self.peek())
            .finish()
    }
}

/// Everything needed to (re)load a MANY reference
#[derive(Debug, Clone)]
pub struct CollectionRequest {
    pub owner: InstanceKey,
    pub owner_class: String,
    pub owner_id: Option<ObjectId>,
    pub descriptor: Arc<AssociationDescriptor>,
    /// Stored pointer array (owning side) or raw value handed to a loader
    pub raw: Option<Value>,
}

/// Deferred multi-valued reference
#[derive(Clone)]
pub struct LazyCollection {
    request: Option<Arc<CollectionRequest>>,
    cell: Arc<OnceCell<Vec<InstanceKey>>>,
}

impl LazyCollection {
    pub fn new(request: CollectionRequest) -> Self {
        Self {
            request: Some(Arc::new(request)),
            cell: Arc::new(OnceCell::new()),
        }
    }

    /// Handle that is resolved from the start
    pub fn initialized(request: Option<Arc<CollectionRequest>>, elements: Vec<InstanceKey>) -> Self {
        Self {
            request,
            cell: Arc::new(OnceCell::new_with(Some(elements))),
        }
    }

    pub fn request(&self) -> Option<&Arc<CollectionRequest>> {
        self.request.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }

    pub fn peek(&self) -> Option<&Vec<InstanceKey>> {
        self.cell.get()
    }

    /// Materialize on first access, then return the cached elements
    pub async fn get(&self, resolver: &AssociationResolver) -> Result<Vec<InstanceKey>> {
        let elements = match &self.request {
            Some(request) => {
                self.cell
                    .get_or_try_init(|| resolver.load_collection(request))
                    .await?
            }
            None => self.cell.get_or_init(|| async { Vec::new() }).await,
        };
        Ok(elements.clone())
    }

    /// Fresh unresolved handle over the same request
    ///
    /// A handle without a request has nothing to reload from and is kept.
    pub fn reset(&self) -> Self {
        match &self.request {
            Some(request) => Self {
                request: Some(Arc::clone(request)),
                cell: Arc::new(OnceCell::new()),
            },
            None => self.clone(),
        }
    }
}

impl fmt::Debug for LazyCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_resolved() { "resolved" } else { "unresolved" };
        f.debug_struct("LazyCollection")
            .field("state", &state)
            .field(
                "property",
                &self.request.as_ref().map(|r| r.descriptor.name().to_string()),
            )
            .field("elements", &self.peek())
            .finish()
    }
}
