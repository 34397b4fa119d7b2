//! Managed instances and the identity map.

pub mod instance;
pub mod scope;
pub mod value;

pub use instance::{Instance, InstanceKey, InstanceState};
pub use scope::HydrationScope;
pub use value::{AssociationValue, OneState, PersistentCollection, ReferenceOne};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::core::{ObjectId, OdmError, Result};

/// Arena of managed instances plus the (class, identifier) identity map
///
/// Loading the same stored object twice yields the same [`InstanceKey`].
pub struct ObjectGraph {
    next_key: AtomicU64,
    instances: RwLock<HashMap<InstanceKey, Arc<Instance>>>,
    identities: RwLock<HashMap<(String, ObjectId), InstanceKey>>,
}

impl ObjectGraph {
    pub fn new() -> Self {
        Self {
            next_key: AtomicU64::new(1),
            instances: RwLock::new(HashMap::new()),
            identities: RwLock::new(HashMap::new()),
        }
    }

    fn allocate(&self, class_name: &str, state: InstanceState) -> Result<InstanceKey> {
        let key = InstanceKey(self.next_key.fetch_add(1, Ordering::SeqCst));
        let instance = Arc::new(Instance::new(key, class_name.to_string(), state));
        self.instances.write()?.insert(key, instance);
        Ok(key)
    }

    /// Add a transient (not yet persisted) instance
    pub fn insert_new(&self, class_name: &str, state: InstanceState) -> Result<InstanceKey> {
        if state.id.is_some() {
            return self.insert_or_get(class_name, state).map(|(key, _)| key);
        }
        self.allocate(class_name, state)
    }

    /// Add an instance unless its identity is already mapped
    ///
    /// Returns the key and whether a new instance was inserted. The check and
    /// the insert happen under the identity-map lock, so two concurrent
    /// loads of the same object agree on one key.
    pub fn insert_or_get(&self, class_name: &str, state: InstanceState) -> Result<(InstanceKey, bool)> {
        let Some(id) = state.id.clone() else {
            return Ok((self.allocate(class_name, state)?, true));
        };

        let mut identities = self.identities.write()?;
        if let Some(existing) = identities.get(&(class_name.to_string(), id.clone())) {
            return Ok((*existing, false));
        }
        let key = self.allocate(class_name, state)?;
        identities.insert((class_name.to_string(), id), key);
        Ok((key, true))
    }

    /// Add an instance for a load in progress
    ///
    /// A published or already staged identity returns the existing key and
    /// `false`. Otherwise the instance is allocated and staged in `scope`,
    /// invisible to other loads until [`publish`](Self::publish).
    pub fn stage(
        &self,
        scope: &HydrationScope,
        class_name: &str,
        state: InstanceState,
    ) -> Result<(InstanceKey, bool)> {
        if let Some(id) = state.id.as_deref() {
            if let Some(key) = self.lookup_scoped(scope, class_name, id)? {
                return Ok((key, false));
            }
        }
        let identity = state.id.clone().map(|id| (class_name.to_string(), id));
        let key = self.allocate(class_name, state)?;
        scope.stage(key, identity)?;
        Ok((key, true))
    }

    /// Published identity first, then the ones staged by `scope`
    pub fn lookup_scoped(
        &self,
        scope: &HydrationScope,
        class_name: &str,
        id: &str,
    ) -> Result<Option<InstanceKey>> {
        match self.lookup(class_name, id)? {
            Some(key) => Ok(Some(key)),
            None => scope.lookup(class_name, id),
        }
    }

    /// Make every instance staged in `scope` visible through the identity map
    ///
    /// All or nothing: when another load published one of the staged
    /// identities first, the whole scope is discarded and `false` returned.
    pub fn publish(&self, scope: &HydrationScope) -> Result<bool> {
        let staged = scope.take_all()?;
        let mut identities = self.identities.write()?;
        let conflict = staged
            .iter()
            .filter_map(|(_, identity)| identity.as_ref())
            .any(|identity| identities.contains_key(identity));
        if conflict {
            drop(identities);
            self.discard(staged.into_iter().map(|(key, _)| key))?;
            return Ok(false);
        }
        for (key, identity) in staged {
            if let Some(identity) = identity {
                identities.insert(identity, key);
            }
        }
        Ok(true)
    }

    /// Discard the instances staged in `scope` after `mark`
    pub fn rollback(&self, scope: &HydrationScope, mark: usize) -> Result<()> {
        self.discard(scope.take_since(mark)?)
    }

    fn discard(&self, keys: impl IntoIterator<Item = InstanceKey>) -> Result<()> {
        let mut instances = self.instances.write()?;
        for key in keys {
            instances.remove(&key);
        }
        Ok(())
    }

    pub fn get(&self, key: InstanceKey) -> Result<Arc<Instance>> {
        self.instances
            .read()?
            .get(&key)
            .cloned()
            .ok_or(OdmError::UnknownInstance(key.0))
    }

    pub fn contains(&self, key: InstanceKey) -> bool {
        self.instances
            .read()
            .map(|instances| instances.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn lookup(&self, class_name: &str, id: &str) -> Result<Option<InstanceKey>> {
        Ok(self
            .identities
            .read()?
            .get(&(class_name.to_string(), id.to_string()))
            .copied())
    }

    /// Record the identifier assigned to an instance
    pub fn register_identity(&self, key: InstanceKey, id: &str) -> Result<()> {
        let instance = self.get(key)?;
        let mut identities = self.identities.write()?;
        let identity = (instance.class_name().to_string(), id.to_string());
        if let Some(existing) = identities.get(&identity) {
            if *existing != key {
                return Err(OdmError::DataIntegrity(format!(
                    "{} '{}' is already managed as {}",
                    instance.class_name(),
                    id,
                    existing
                )));
            }
        }
        identities.insert(identity, key);
        instance.write()?.id = Some(id.to_string());
        Ok(())
    }

    /// Stop tracking an instance's identity; the instance itself stays addressable
    pub fn detach(&self, key: InstanceKey) -> Result<()> {
        let instance = self.get(key)?;
        if let Some(id) = instance.id()? {
            let mut identities = self.identities.write()?;
            let identity = (instance.class_name().to_string(), id);
            if identities.get(&identity) == Some(&key) {
                identities.remove(&identity);
            }
        }
        Ok(())
    }

    /// Forget an instance entirely
    pub fn evict(&self, key: InstanceKey) -> Result<()> {
        self.detach(key)?;
        self.instances.write()?.remove(&key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.instances.read().map(|i| i.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ObjectGraph {
    fn default() -> Self {
        Self::new()
    }
}
