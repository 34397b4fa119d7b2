use std::sync::Arc;

use super::InstanceKey;
use crate::core::{OdmError, Result};
use crate::resolver::lazy::{CollectionRequest, LazyCollection, LazyReference};

/// State of a single-valued reference
#[derive(Debug, Clone)]
pub enum OneState {
    Empty,
    Loaded(InstanceKey),
    Lazy(LazyReference),
}

impl OneState {
    pub fn from_target(target: Option<InstanceKey>) -> Self {
        match target {
            Some(key) => Self::Loaded(key),
            None => Self::Empty,
        }
    }

    /// Target when known without fetching; `None` for an unresolved handle
    pub fn known_target(&self) -> Option<Option<InstanceKey>> {
        match self {
            Self::Empty => Some(None),
            Self::Loaded(key) => Some(Some(*key)),
            Self::Lazy(handle) => handle.peek(),
        }
    }

    /// Whether both states certainly point at the same target
    pub fn same_target(&self, other: &OneState) -> bool {
        if let (Self::Lazy(a), Self::Lazy(b)) = (self, other) {
            if a.ptr_eq(b) {
                return true;
            }
        }
        match (self.known_target(), other.known_target()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Single-valued reference with the state it had when loaded
#[derive(Debug, Clone)]
pub struct ReferenceOne {
    current: OneState,
    snapshot: OneState,
}

impl ReferenceOne {
    pub fn new(state: OneState) -> Self {
        Self {
            snapshot: state.clone(),
            current: state,
        }
    }

    pub fn empty() -> Self {
        Self::new(OneState::Empty)
    }

    pub fn current(&self) -> &OneState {
        &self.current
    }

    pub fn snapshot(&self) -> &OneState {
        &self.snapshot
    }

    pub fn set(&mut self, target: Option<InstanceKey>) {
        self.current = OneState::from_target(target);
    }

    pub fn is_dirty(&self) -> bool {
        !self.current.same_target(&self.snapshot)
    }

    /// Accept the current state as the stored one
    pub fn commit(&mut self) {
        self.snapshot = self.current.clone();
    }
}

/// Multi-valued reference: the loaded element list plus pending in-memory edits
#[derive(Debug, Clone)]
pub struct PersistentCollection {
    loaded: LazyCollection,
    pending: Option<Vec<InstanceKey>>,
}

impl PersistentCollection {
    /// Collection of a transient owner: initialized and empty
    pub fn new_empty() -> Self {
        Self {
            loaded: LazyCollection::initialized(None, Vec::new()),
            pending: None,
        }
    }

    pub fn from_handle(handle: LazyCollection) -> Self {
        Self {
            loaded: handle,
            pending: None,
        }
    }

    pub fn handle(&self) -> &LazyCollection {
        &self.loaded
    }

    pub fn is_initialized(&self) -> bool {
        self.loaded.is_resolved()
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    /// Elements as loaded, `None` while the handle is unresolved
    pub fn snapshot(&self) -> Option<Vec<InstanceKey>> {
        self.loaded.peek().cloned()
    }

    /// Elements including pending edits, `None` while unresolved and unedited
    pub fn current(&self) -> Option<Vec<InstanceKey>> {
        self.pending.clone().or_else(|| self.snapshot())
    }

    fn editable(&self) -> Result<Vec<InstanceKey>> {
        self.current().ok_or_else(|| {
            OdmError::DataIntegrity("Collection must be initialized before it is edited".to_string())
        })
    }

    pub fn add(&mut self, key: InstanceKey) -> Result<bool> {
        let mut elements = self.editable()?;
        if elements.contains(&key) {
            return Ok(false);
        }
        elements.push(key);
        self.pending = Some(elements);
        Ok(true)
    }

    pub fn remove(&mut self, key: InstanceKey) -> Result<bool> {
        let mut elements = self.editable()?;
        let before = elements.len();
        elements.retain(|existing| *existing != key);
        if elements.len() == before {
            return Ok(false);
        }
        self.pending = Some(elements);
        Ok(true)
    }

    /// Replace the whole content; allowed before initialization
    pub fn replace(&mut self, elements: Vec<InstanceKey>) {
        let mut unique = Vec::with_capacity(elements.len());
        for key in elements {
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        self.pending = Some(unique);
    }

    /// Accept the current content as the stored one
    pub fn commit(&mut self, request: Option<Arc<CollectionRequest>>) {
        if let Some(elements) = self.current() {
            let request = request.or_else(|| self.loaded.request().cloned());
            self.loaded = LazyCollection::initialized(request, elements);
        }
        self.pending = None;
    }

    /// Drop loaded content and edits; the next access loads again
    pub fn invalidate(&mut self) {
        self.loaded = self.loaded.reset();
        self.pending = None;
    }
}

#[derive(Debug, Clone)]
pub enum AssociationValue {
    One(ReferenceOne),
    Many(PersistentCollection),
}

impl AssociationValue {
    pub fn as_one(&self) -> Result<&ReferenceOne> {
        match self {
            Self::One(one) => Ok(one),
            Self::Many(_) => Err(OdmError::Mapping("Expected a ONE reference".to_string())),
        }
    }

    pub fn as_one_mut(&mut self) -> Result<&mut ReferenceOne> {
        match self {
            Self::One(one) => Ok(one),
            Self::Many(_) => Err(OdmError::Mapping("Expected a ONE reference".to_string())),
        }
    }

    pub fn as_many(&self) -> Result<&PersistentCollection> {
        match self {
            Self::Many(many) => Ok(many),
            Self::One(_) => Err(OdmError::Mapping("Expected a MANY reference".to_string())),
        }
    }

    pub fn as_many_mut(&mut self) -> Result<&mut PersistentCollection> {
        match self {
            Self::Many(many) => Ok(many),
            Self::One(_) => Err(OdmError::Mapping("Expected a MANY reference".to_string())),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Self::One(one) => one.is_dirty(),
            Self::Many(many) => many.is_dirty(),
        }
    }
}
