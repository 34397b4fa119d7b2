//! Document manager: the unit of work over the object graph.
//!
//! Instances are created, loaded and edited through the manager, and every
//! write goes through a [`CascadePlan`] executed against the storage adapter.

pub mod purge;

pub use purge::SchemaPurger;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

use crate::cascade::{CascadePlan, CascadePlanner};
use crate::core::{Document, OBJECT_ID, ObjectId, OdmError, Pointer, Result};
use crate::graph::{
    AssociationValue, InstanceKey, InstanceState, ObjectGraph, OneState, PersistentCollection,
    ReferenceOne,
};
use crate::mapping::{AssociationDescriptor, CascadeOp, ClassMetadata, MetadataRegistry};
use crate::query::{Criteria, Query};
use crate::resolver::{
    AssociationResolver, CollectionRequest, ReferenceLoader, ReferenceTarget, ResolutionWarning,
};
use crate::storage::StorageAdapter;

pub struct DocumentManager {
    registry: Arc<MetadataRegistry>,
    storage: Arc<dyn StorageAdapter>,
    graph: Arc<ObjectGraph>,
    resolver: Arc<AssociationResolver>,
    planner: CascadePlanner,
}

impl DocumentManager {
    pub fn new(registry: Arc<MetadataRegistry>, storage: Arc<dyn StorageAdapter>) -> Self {
        let graph = Arc::new(ObjectGraph::new());
        let resolver = Arc::new(AssociationResolver::new(
            Arc::clone(&registry),
            Arc::clone(&storage),
            Arc::clone(&graph),
        ));
        let planner = CascadePlanner::new(Arc::clone(&resolver));
        Self {
            registry,
            storage,
            graph,
            resolver,
            planner,
        }
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Arc<AssociationResolver> {
        &self.resolver
    }

    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.graph
    }

    pub fn planner(&self) -> &CascadePlanner {
        &self.planner
    }

    pub fn register_loader(
        &self,
        repository: &str,
        method: &str,
        loader: Arc<dyn ReferenceLoader>,
    ) -> Result<()> {
        self.resolver.register_loader(repository, method, loader)
    }

    pub fn take_warnings(&self) -> Vec<ResolutionWarning> {
        self.resolver.take_warnings()
    }

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    /// New transient instance with empty references
    pub fn create(&self, class_name: &str) -> Result<InstanceKey> {
        let metadata = self.registry.get_metadata_for(class_name)?;
        let mut state = InstanceState::new(None);
        for association in metadata.associations() {
            let value = if association.is_many() {
                AssociationValue::Many(PersistentCollection::new_empty())
            } else {
                AssociationValue::One(ReferenceOne::empty())
            };
            state.associations.insert(association.name().to_string(), value);
        }
        self.graph.insert_new(&metadata.class_name, state)
    }

    pub fn id(&self, key: InstanceKey) -> Result<Option<ObjectId>> {
        self.graph.get(key)?.id()
    }

    pub fn class_of(&self, key: InstanceKey) -> Result<String> {
        Ok(self.graph.get(key)?.class_name().to_string())
    }

    pub fn set_field(&self, key: InstanceKey, name: &str, value: Value) -> Result<()> {
        let instance = self.graph.get(key)?;
        let metadata = self.registry.get_metadata_for(instance.class_name())?;
        let field = metadata.field(name).ok_or_else(|| {
            OdmError::Mapping(format!("{} has no field '{}'", metadata.class_name, name))
        })?;
        field.validate(&value)?;
        instance.write()?.fields.insert(name.to_string(), value);
        Ok(())
    }

    pub fn field(&self, key: InstanceKey, name: &str) -> Result<Option<Value>> {
        Ok(self.graph.get(key)?.read()?.field(name).cloned())
    }

    /// Load by identifier, going through the identity map first
    pub async fn find(&self, class_name: &str, id: &str) -> Result<Option<InstanceKey>> {
        if let Some(key) = self.graph.lookup(class_name, id)? {
            return Ok(Some(key));
        }
        let metadata = self.registry.get_metadata_for(class_name)?;
        match self
            .storage
            .fetch_by_identifier(&metadata.collection_name, id)
            .await?
        {
            Some(document) => Ok(Some(self.resolver.hydrate(&metadata.class_name, document).await?)),
            None => Ok(None),
        }
    }

    /// Load every stored object of a class matching `criteria`
    pub async fn find_by(&self, class_name: &str, criteria: Criteria) -> Result<Vec<InstanceKey>> {
        let metadata = self.registry.get_metadata_for(class_name)?;
        let query = Query::new(metadata.collection_name.clone()).criteria(criteria);
        let mut keys = Vec::new();
        for document in self.storage.query(&query).await? {
            keys.push(self.resolver.hydrate(&metadata.class_name, document).await?);
        }
        Ok(keys)
    }

    // ------------------------------------------------------------------
    // References
    // ------------------------------------------------------------------

    fn association(&self, key: InstanceKey, property: &str) -> Result<Arc<AssociationDescriptor>> {
        let class_name = self.class_of(key)?;
        let metadata = self.registry.get_metadata_for(&class_name)?;
        Ok(Arc::clone(metadata.association(property)?))
    }

    /// Target of a ONE reference, loading it on first access
    pub async fn reference(&self, key: InstanceKey, property: &str) -> Result<Option<InstanceKey>> {
        self.resolver.current_reference(key, property).await
    }

    pub fn set_reference(&self, key: InstanceKey, property: &str, target: Option<InstanceKey>) -> Result<()> {
        let association = self.association(key, property)?;
        if let Some(target) = target {
            self.check_target(&association, target)?;
        }
        let instance = self.graph.get(key)?;
        let mut state = instance.write()?;
        state.association_mut(property)?.as_one_mut()?.set(target);
        Ok(())
    }

    /// Elements of a MANY reference, loading them on first access
    pub async fn collection(&self, key: InstanceKey, property: &str) -> Result<Vec<InstanceKey>> {
        self.resolver.current_elements(key, property).await
    }

    pub async fn add_to_collection(&self, key: InstanceKey, property: &str, target: InstanceKey) -> Result<bool> {
        let association = self.association(key, property)?;
        self.check_target(&association, target)?;
        self.resolver.current_elements(key, property).await?;

        let instance = self.graph.get(key)?;
        let mut state = instance.write()?;
        state.association_mut(property)?.as_many_mut()?.add(target)
    }

    pub async fn remove_from_collection(&self, key: InstanceKey, property: &str, target: InstanceKey) -> Result<bool> {
        self.resolver.current_elements(key, property).await?;

        let instance = self.graph.get(key)?;
        let mut state = instance.write()?;
        state.association_mut(property)?.as_many_mut()?.remove(target)
    }

    /// Drop the loaded elements and pending edits; the next access reloads
    pub fn invalidate_collection(&self, key: InstanceKey, property: &str) -> Result<()> {
        let instance = self.graph.get(key)?;
        let mut state = instance.write()?;
        state.association_mut(property)?.as_many_mut()?.invalidate();
        Ok(())
    }

    fn check_target(&self, association: &AssociationDescriptor, target: InstanceKey) -> Result<()> {
        let class_name = self.class_of(target)?;
        let accepted = match &association.discriminator {
            Some(discriminator) => discriminator.classes().any(|c| c == class_name),
            None => false,
        } || association.target_class.as_deref() == Some(class_name.as_str());

        if accepted {
            Ok(())
        } else {
            Err(OdmError::DataIntegrity(format!(
                "'{}' does not accept instances of {}",
                association.name(),
                class_name
            )))
        }
    }

    // ------------------------------------------------------------------
    // Unit of work
    // ------------------------------------------------------------------

    pub async fn persist(&self, root: InstanceKey) -> Result<CascadePlan> {
        self.cascade(CascadeOp::Persist, root).await
    }

    pub async fn remove(&self, root: InstanceKey) -> Result<CascadePlan> {
        self.cascade(CascadeOp::Remove, root).await
    }

    pub async fn refresh(&self, root: InstanceKey) -> Result<CascadePlan> {
        self.cascade(CascadeOp::Refresh, root).await
    }

    pub async fn detach(&self, root: InstanceKey) -> Result<CascadePlan> {
        self.cascade(CascadeOp::Detach, root).await
    }

    async fn cascade(&self, op: CascadeOp, root: InstanceKey) -> Result<CascadePlan> {
        let plan = self.planner.plan(op, root).await?;
        self.execute(&plan).await?;
        Ok(plan)
    }

    /// Apply a plan in order against the storage adapter
    ///
    /// Persisted instances whose owning references point at not yet
    /// persisted targets are written again once every target has an
    /// identifier. Snapshots are reset only after all writes succeed.
    pub async fn execute(&self, plan: &CascadePlan) -> Result<()> {
        let span = info_span!("odm.execute", steps = plan.len());
        self.execute_inner(plan).instrument(span).await
    }

    async fn execute_inner(&self, plan: &CascadePlan) -> Result<()> {
        let mut written: Vec<(InstanceKey, Document)> = Vec::new();
        let mut deferred = Vec::new();

        for step in plan {
            match step.operation {
                CascadeOp::Persist => {
                    let (document, complete) = self.write(step.instance).await?;
                    if !complete {
                        deferred.push(step.instance);
                    }
                    written.push((step.instance, document));
                }
                CascadeOp::Remove => self.delete(step.instance).await?,
                CascadeOp::Refresh => {
                    self.resolver.refresh(step.instance).await?;
                }
                CascadeOp::Detach => self.graph.detach(step.instance)?,
            }
        }

        for key in deferred {
            let (document, complete) = self.write(key).await?;
            if !complete {
                return Err(OdmError::DataIntegrity(format!(
                    "{} references an instance that was not persisted",
                    key
                )));
            }
            if let Some(entry) = written.iter_mut().rev().find(|(k, _)| *k == key) {
                entry.1 = document;
            }
        }

        for (key, document) in written {
            self.commit(key, &document)?;
        }
        Ok(())
    }

    /// Serialize and store one instance
    ///
    /// Returns the stored document and whether every owning reference could
    /// be written.
    async fn write(&self, key: InstanceKey) -> Result<(Document, bool)> {
        let instance = self.graph.get(key)?;
        let metadata = self.registry.get_metadata_for(instance.class_name())?;

        let (id, mut document, references) = {
            let state = instance.read()?;
            let mut document = Document::new();
            for field in metadata.fields() {
                if let Some(value) = state.fields.get(&field.name) {
                    document.insert(field.store_as.clone(), value.clone());
                }
            }
            let references: HashMap<String, AssociationValue> = state
                .associations
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();
            (state.id.clone(), document, references)
        };

        let mut complete = true;
        for association in metadata.associations() {
            if association.is_inverse_side() || association.repository_method.is_some() {
                continue;
            }
            let Some(value) = references.get(association.name()) else {
                continue;
            };
            match self.stored_reference(&metadata, association, value)? {
                StoredReference::Value(stored) => {
                    document.insert(association.store_as().to_string(), stored);
                }
                StoredReference::Unchanged => {}
                StoredReference::Pending => complete = false,
            }
        }

        if let Some(id) = &id {
            document.insert(OBJECT_ID.to_string(), Value::String(id.clone()));
        }
        let assigned = self
            .storage
            .persist(&metadata.collection_name, document.clone())
            .await?;
        if id.is_none() {
            self.graph.register_identity(key, &assigned)?;
        }
        document.insert(OBJECT_ID.to_string(), Value::String(assigned.clone()));

        event!(
            Level::DEBUG,
            class = %metadata.class_name,
            id = %assigned,
            complete,
            "document written"
        );
        Ok((document, complete))
    }

    fn stored_reference(
        &self,
        metadata: &ClassMetadata,
        association: &AssociationDescriptor,
        value: &AssociationValue,
    ) -> Result<StoredReference> {
        match value {
            AssociationValue::One(one) => {
                let target = match one.current() {
                    OneState::Empty => None,
                    OneState::Loaded(target) => Some(*target),
                    OneState::Lazy(handle) => match handle.peek() {
                        Some(target) => target,
                        None => {
                            return Ok(match &handle.request().target {
                                ReferenceTarget::Pointer(pointer) => {
                                    StoredReference::Value(self.pointer_value(association, pointer))
                                }
                                _ => StoredReference::Unchanged,
                            });
                        }
                    },
                };
                match target {
                    Some(target) => self.target_value(association, target),
                    None if association.nullable() => Ok(StoredReference::Value(Value::Null)),
                    None => Err(OdmError::DataIntegrity(format!(
                        "Reference '{}.{}' is required",
                        metadata.class_name,
                        association.name()
                    ))),
                }
            }
            AssociationValue::Many(collection) => {
                let raw = collection
                    .handle()
                    .request()
                    .and_then(|request| request.raw.clone());
                let (true, Some(elements)) = (collection.is_dirty(), collection.current()) else {
                    return Ok(raw.map(StoredReference::Value).unwrap_or(StoredReference::Unchanged));
                };
                match (collection.snapshot(), raw) {
                    (Some(loaded), Some(Value::Array(items))) => {
                        self.merged_elements(association, items, &loaded, &elements)
                    }
                    _ => self.element_values(association, &elements),
                }
            }
        }
    }

    fn element_values(
        &self,
        association: &AssociationDescriptor,
        elements: &[InstanceKey],
    ) -> Result<StoredReference> {
        let mut stored = Vec::with_capacity(elements.len());
        for element in elements {
            match self.target_value(association, *element)? {
                StoredReference::Value(value) => stored.push(value),
                _ => return Ok(StoredReference::Pending),
            }
        }
        Ok(StoredReference::Value(Value::Array(stored)))
    }

    /// Apply in-memory edits to the stored pointer array
    ///
    /// The loaded elements may be a filtered or limited view of `items`.
    /// Stored pointers outside that view are kept; only elements removed from
    /// the view are dropped, and added elements are appended.
    fn merged_elements(
        &self,
        association: &AssociationDescriptor,
        items: Vec<Value>,
        loaded: &[InstanceKey],
        current: &[InstanceKey],
    ) -> Result<StoredReference> {
        let mut removed = Vec::new();
        for key in loaded.iter().filter(|key| !current.contains(key)) {
            let instance = self.graph.get(*key)?;
            if let Some(id) = instance.id()? {
                removed.push(Pointer::new(instance.class_name(), id));
            }
        }

        let mut stored: Vec<Value> = items
            .into_iter()
            .filter(|item| !removed.iter().any(|pointer| pointer.is_stored_as(item)))
            .collect();
        for key in current.iter().filter(|key| !loaded.contains(key)) {
            let instance = self.graph.get(*key)?;
            let Some(id) = instance.id()? else {
                return Ok(StoredReference::Pending);
            };
            let pointer = Pointer::new(instance.class_name(), id);
            if !stored.iter().any(|item| pointer.is_stored_as(item)) {
                stored.push(self.pointer_value(association, &pointer));
            }
        }
        Ok(StoredReference::Value(Value::Array(stored)))
    }

    fn target_value(&self, association: &AssociationDescriptor, target: InstanceKey) -> Result<StoredReference> {
        let instance = self.graph.get(target)?;
        Ok(match instance.id()? {
            Some(id) => StoredReference::Value(
                self.pointer_value(association, &Pointer::new(instance.class_name(), id)),
            ),
            None => StoredReference::Pending,
        })
    }

    fn pointer_value(&self, association: &AssociationDescriptor, pointer: &Pointer) -> Value {
        let tag = association.discriminator.as_ref().and_then(|d| {
            d.tag_for(&pointer.class_name)
                .map(|tag| (d.field.as_str(), tag))
        });
        pointer.to_stored(association.simple, tag)
    }

    async fn delete(&self, key: InstanceKey) -> Result<()> {
        let instance = self.graph.get(key)?;
        let Some(id) = instance.id()? else {
            event!(Level::DEBUG, instance = %key, "transient instance, nothing to remove");
            return Ok(());
        };
        let metadata = self.registry.get_metadata_for(instance.class_name())?;
        if !self.storage.remove(&metadata.collection_name, &id).await? {
            event!(Level::WARN, class = %metadata.class_name, id = %id, "document already gone");
        }
        self.graph.detach(key)?;
        instance.write()?.id = None;
        Ok(())
    }

    /// Take the written state as the new loaded state
    fn commit(&self, key: InstanceKey, document: &Document) -> Result<()> {
        let instance = self.graph.get(key)?;
        let metadata = self.registry.get_metadata_for(instance.class_name())?;
        let owner_id = instance.id()?;

        let mut state = instance.write()?;
        for association in metadata.associations() {
            let Ok(value) = state.association_mut(association.name()) else {
                continue;
            };
            match value {
                AssociationValue::One(one) => one.commit(),
                AssociationValue::Many(collection) => {
                    let request = CollectionRequest {
                        owner: key,
                        owner_class: metadata.class_name.clone(),
                        owner_id: owner_id.clone(),
                        descriptor: Arc::clone(association),
                        raw: document
                            .get(association.store_as())
                            .filter(|v| !v.is_null())
                            .cloned(),
                    };
                    collection.commit(Some(Arc::new(request)));
                }
            }
        }
        Ok(())
    }
}

enum StoredReference {
    Value(Value),
    /// Keep whatever is stored
    Unchanged,
    /// A target has no identifier yet
    Pending,
}
