use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::value::AssociationValue;
use crate::core::{Document, ObjectId, OdmError, Result};

/// Identity of a managed instance inside one [`ObjectGraph`](super::ObjectGraph)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey(pub(crate) u64);

impl InstanceKey {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Mutable part of an instance
#[derive(Debug, Default)]
pub struct InstanceState {
    /// Remote identifier, `None` until persisted
    pub id: Option<ObjectId>,
    /// Scalar fields keyed by property name
    pub fields: Document,
    /// References keyed by property name
    pub associations: HashMap<String, AssociationValue>,
}

impl InstanceState {
    pub fn new(id: Option<ObjectId>) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn association(&self, name: &str) -> Result<&AssociationValue> {
        self.associations.get(name).ok_or_else(|| {
            OdmError::DataIntegrity(format!("Reference '{}' is not initialized", name))
        })
    }

    pub fn association_mut(&mut self, name: &str) -> Result<&mut AssociationValue> {
        self.associations.get_mut(name).ok_or_else(|| {
            OdmError::DataIntegrity(format!("Reference '{}' is not initialized", name))
        })
    }
}

/// One object of a mapped class
///
/// Instances never own each other: references hold [`InstanceKey`]s, so a
/// cyclic object graph is a cyclic set of keys, not of pointers.
#[derive(Debug)]
pub struct Instance {
    key: InstanceKey,
    class_name: String,
    state: RwLock<InstanceState>,
}

impl Instance {
    pub(crate) fn new(key: InstanceKey, class_name: String, state: InstanceState) -> Self {
        Self {
            key,
            class_name,
            state: RwLock::new(state),
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, InstanceState>> {
        Ok(self.state.read()?)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, InstanceState>> {
        Ok(self.state.write()?)
    }

    pub fn id(&self) -> Result<Option<ObjectId>> {
        Ok(self.read()?.id.clone())
    }
}
