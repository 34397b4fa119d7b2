// ============================================================================
// Association Resolver
// ============================================================================
//
// Turns stored references into managed instances:
// - ONE, eager: fetch the target now (identity map first)
// - ONE, lazy: hand out a LazyReference bound to the target
// - MANY: inverse sides query by back-reference, owning sides walk the
//   stored pointer array, custom loaders run a repository method; lazy
//   collections defer all of it until first access
//
// A dangling ONE reference is an error. A dangling collection element is
// skipped and recorded as a warning.
//
// ============================================================================

pub mod lazy;
pub mod loader;

pub use lazy::{CollectionRequest, LazyCollection, LazyReference, ReferenceRequest, ReferenceTarget};
pub use loader::{LoaderContext, ReferenceLoader};

use async_recursion::async_recursion;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{Instrument, Level, debug_span, event};

use crate::core::document::{document_id, is_absent, reference_id};
use crate::core::{Document, OdmError, Pointer, Result};
use crate::graph::{
    AssociationValue, HydrationScope, InstanceKey, InstanceState, ObjectGraph, OneState,
    PersistentCollection, ReferenceOne,
};
use crate::mapping::{AssociationDescriptor, ClassMetadata, MetadataRegistry};
use crate::query::{Condition, Criteria, Query};
use crate::storage::StorageAdapter;

/// Outcome of resolving one reference
#[derive(Debug, Clone)]
pub enum Resolved {
    Null,
    One(InstanceKey),
    LazyOne(LazyReference),
    Many(PersistentCollection),
}

impl Resolved {
    pub fn into_value(self) -> AssociationValue {
        match self {
            Resolved::Null => AssociationValue::One(ReferenceOne::empty()),
            Resolved::One(key) => AssociationValue::One(ReferenceOne::new(OneState::Loaded(key))),
            Resolved::LazyOne(handle) => AssociationValue::One(ReferenceOne::new(OneState::Lazy(handle))),
            Resolved::Many(collection) => AssociationValue::Many(collection),
        }
    }
}

/// A collection element that was skipped during materialization
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionWarning {
    pub owner_class: String,
    pub property: String,
    /// Target identifier, when one could be read
    pub target_id: Option<String>,
    pub message: String,
}

pub struct AssociationResolver {
    registry: Arc<MetadataRegistry>,
    storage: Arc<dyn StorageAdapter>,
    graph: Arc<ObjectGraph>,
    loaders: RwLock<HashMap<(String, String), Arc<dyn ReferenceLoader>>>,
    warnings: Mutex<Vec<ResolutionWarning>>,
}

impl AssociationResolver {
    pub fn new(
        registry: Arc<MetadataRegistry>,
        storage: Arc<dyn StorageAdapter>,
        graph: Arc<ObjectGraph>,
    ) -> Self {
        Self {
            registry,
            storage,
            graph,
            loaders: RwLock::new(HashMap::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn graph(&self) -> &Arc<ObjectGraph> {
        &self.graph
    }

    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.storage
    }

    /// Register a custom repository method
    pub fn register_loader(
        &self,
        repository: &str,
        method: &str,
        loader: Arc<dyn ReferenceLoader>,
    ) -> Result<()> {
        self.loaders
            .write()?
            .insert((repository.to_string(), method.to_string()), loader);
        Ok(())
    }

    pub fn warnings(&self) -> Vec<ResolutionWarning> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    pub fn take_warnings(&self) -> Vec<ResolutionWarning> {
        self.warnings
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------

    /// Materialize a stored document as a managed instance
    ///
    /// Everything the load creates becomes visible through the identity map
    /// only once the whole load succeeds. A failure discards every instance
    /// it created. A document whose identity is already mapped returns the
    /// existing key untouched.
    pub async fn hydrate(&self, class_name: &str, document: Document) -> Result<InstanceKey> {
        loop {
            let scope = HydrationScope::new();
            let outcome = self.hydrate_in(&scope, class_name, document.clone()).await;
            if let Some(key) = self.settle(&scope, outcome)? {
                return Ok(key);
            }
        }
    }

    /// Publish a finished load, or discard it
    ///
    /// `None` means another load published one of the same objects first;
    /// the caller retries and then finds them in the identity map.
    fn settle<T>(&self, scope: &HydrationScope, outcome: Result<T>) -> Result<Option<T>> {
        match outcome {
            Ok(value) => {
                if self.graph.publish(scope)? {
                    return Ok(Some(value));
                }
                event!(Level::DEBUG, "identity published by a concurrent load, retrying");
                Ok(None)
            }
            Err(err) => {
                self.graph.rollback(scope, 0)?;
                Err(err)
            }
        }
    }

    /// Staged instances are complete by the time the scope is published, and
    /// eager cycles close on the staged instance.
    #[async_recursion]
    async fn hydrate_in(
        &self,
        scope: &HydrationScope,
        class_name: &str,
        document: Document,
    ) -> Result<InstanceKey> {
        let metadata = self.registry.get_metadata_for(class_name)?;
        let mut state = InstanceState::new(document_id(&document).map(str::to_string));
        state.fields = read_fields(&metadata, &document)?;

        let (key, inserted) = self.graph.stage(scope, &metadata.class_name, state)?;
        if !inserted {
            return Ok(key);
        }

        for association in metadata.associations() {
            let raw = document.get(association.store_as());
            let resolved = self.resolve_in(scope, key, association, raw).await?;
            let instance = self.graph.get(key)?;
            instance
                .write()?
                .associations
                .insert(association.name().to_string(), resolved.into_value());
        }

        event!(Level::TRACE, class = %metadata.class_name, key = %key, "instance hydrated");
        Ok(key)
    }

    /// Reload fields and references of a persisted instance from storage
    pub async fn refresh(&self, key: InstanceKey) -> Result<bool> {
        let instance = self.graph.get(key)?;
        let Some(id) = instance.id()? else {
            return Ok(false);
        };
        let metadata = self.registry.get_metadata_for(instance.class_name())?;
        let document = self
            .storage
            .fetch_by_identifier(&metadata.collection_name, &id)
            .await?
            .ok_or_else(|| OdmError::BrokenReference {
                class_name: metadata.class_name.clone(),
                id: id.clone(),
            })?;

        let fields = read_fields(&metadata, &document)?;
        let associations = loop {
            let scope = HydrationScope::new();
            let outcome = self.resolve_all(&scope, key, &metadata, &document).await;
            if let Some(associations) = self.settle(&scope, outcome)? {
                break associations;
            }
        };

        let mut state = instance.write()?;
        state.fields = fields;
        state.associations = associations;
        Ok(true)
    }

    async fn resolve_all(
        &self,
        scope: &HydrationScope,
        key: InstanceKey,
        metadata: &ClassMetadata,
        document: &Document,
    ) -> Result<HashMap<String, AssociationValue>> {
        let mut associations = HashMap::new();
        for association in metadata.associations() {
            let resolved = self
                .resolve_in(scope, key, association, document.get(association.store_as()))
                .await?;
            associations.insert(association.name().to_string(), resolved.into_value());
        }
        Ok(associations)
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve one reference of `owner` from its stored value
    pub async fn resolve(
        &self,
        owner: InstanceKey,
        descriptor: &Arc<AssociationDescriptor>,
        raw: Option<&Value>,
    ) -> Result<Resolved> {
        loop {
            let scope = HydrationScope::new();
            let outcome = self.resolve_in(&scope, owner, descriptor, raw).await;
            if let Some(resolved) = self.settle(&scope, outcome)? {
                return Ok(resolved);
            }
        }
    }

    async fn resolve_in(
        &self,
        scope: &HydrationScope,
        owner: InstanceKey,
        descriptor: &Arc<AssociationDescriptor>,
        raw: Option<&Value>,
    ) -> Result<Resolved> {
        let owner_instance = self.graph.get(owner)?;
        let owner_class = owner_instance.class_name().to_string();
        let owner_id = owner_instance.id()?;

        if descriptor.is_many() {
            let request = CollectionRequest {
                owner,
                owner_class,
                owner_id,
                descriptor: Arc::clone(descriptor),
                raw: raw.filter(|v| !v.is_null()).cloned(),
            };
            let handle = if descriptor.lazy_load {
                LazyCollection::new(request)
            } else {
                let elements = self.load_collection_in(scope, &request).await?;
                LazyCollection::initialized(Some(Arc::new(request)), elements)
            };
            return Ok(Resolved::Many(PersistentCollection::from_handle(handle)));
        }

        let target = if descriptor.is_inverse_side() {
            ReferenceTarget::Inverse
        } else if descriptor.repository_method.is_some() {
            ReferenceTarget::Loader(raw.cloned())
        } else {
            match raw {
                Some(value) if !value.is_null() => {
                    ReferenceTarget::Pointer(self.pointer_for(descriptor, value)?)
                }
                _ if descriptor.nullable() => return Ok(Resolved::Null),
                _ => {
                    return Err(OdmError::DataIntegrity(format!(
                        "Reference '{}.{}' is missing and not nullable",
                        owner_class,
                        descriptor.name()
                    )));
                }
            }
        };

        let request = ReferenceRequest {
            owner,
            owner_class,
            owner_id,
            descriptor: Arc::clone(descriptor),
            target,
        };

        if descriptor.lazy_load {
            return Ok(Resolved::LazyOne(LazyReference::new(request)));
        }

        Ok(match self.load_reference_in(scope, &request).await? {
            Some(key) => Resolved::One(key),
            None => Resolved::Null,
        })
    }

    /// Load the target of a ONE reference
    pub async fn load_reference(&self, request: &ReferenceRequest) -> Result<Option<InstanceKey>> {
        loop {
            let scope = HydrationScope::new();
            let outcome = self.load_reference_in(&scope, request).await;
            if let Some(target) = self.settle(&scope, outcome)? {
                return Ok(target);
            }
        }
    }

    async fn load_reference_in(
        &self,
        scope: &HydrationScope,
        request: &ReferenceRequest,
    ) -> Result<Option<InstanceKey>> {
        let descriptor = &request.descriptor;
        let document = match &request.target {
            ReferenceTarget::Pointer(pointer) => {
                return self.fetch_pointer(scope, pointer).await.map(Some);
            }
            ReferenceTarget::Inverse => {
                let Some(owner_id) = &request.owner_id else {
                    return Ok(None);
                };
                let query = self.inverse_query(descriptor, owner_id)?.limit(Some(1));
                self.storage.query(&query).await?.into_iter().next()
            }
            ReferenceTarget::Loader(raw) => self
                .run_loader(
                    descriptor,
                    &request.owner_class,
                    request.owner_id.as_deref(),
                    raw.as_ref(),
                )
                .await?
                .into_iter()
                .next(),
        };

        match document {
            Some(document) => {
                let class_name = self.class_for_document(descriptor, &document)?;
                Ok(Some(self.hydrate_in(scope, &class_name, document).await?))
            }
            None => Ok(None),
        }
    }

    async fn fetch_pointer(&self, scope: &HydrationScope, pointer: &Pointer) -> Result<InstanceKey> {
        if let Some(key) = self
            .graph
            .lookup_scoped(scope, &pointer.class_name, &pointer.object_id)?
        {
            return Ok(key);
        }

        let metadata = self.registry.get_metadata_for(&pointer.class_name)?;
        match self
            .storage
            .fetch_by_identifier(&metadata.collection_name, &pointer.object_id)
            .await?
        {
            Some(document) => self.hydrate_in(scope, &pointer.class_name, document).await,
            None => Err(OdmError::BrokenReference {
                class_name: pointer.class_name.clone(),
                id: pointer.object_id.clone(),
            }),
        }
    }

    /// Materialize the elements of a MANY reference
    pub async fn load_collection(&self, request: &CollectionRequest) -> Result<Vec<InstanceKey>> {
        let span = debug_span!(
            "odm.collection.load",
            owner_class = %request.owner_class,
            property = %request.descriptor.name()
        );
        self.load_collection_settled(request).instrument(span).await
    }

    async fn load_collection_settled(&self, request: &CollectionRequest) -> Result<Vec<InstanceKey>> {
        loop {
            let scope = HydrationScope::new();
            let outcome = self.load_collection_in(&scope, request).await;
            if let Some(elements) = self.settle(&scope, outcome)? {
                return Ok(elements);
            }
        }
    }

    async fn load_collection_in(
        &self,
        scope: &HydrationScope,
        request: &CollectionRequest,
    ) -> Result<Vec<InstanceKey>> {
        let descriptor = &request.descriptor;

        let documents: Vec<(String, Document)> = if descriptor.repository_method.is_some() {
            let documents = self
                .run_loader(
                    descriptor,
                    &request.owner_class,
                    request.owner_id.as_deref(),
                    request.raw.as_ref(),
                )
                .await?;
            self.classify(request, documents)?
        } else if descriptor.is_inverse_side() {
            let Some(owner_id) = &request.owner_id else {
                return Ok(Vec::new());
            };
            let query = self.inverse_query(descriptor, owner_id)?;
            let documents = self.storage.query(&query).await?;
            self.classify(request, documents)?
        } else {
            self.fetch_pointer_array(request).await?
        };

        let mut keys = Vec::with_capacity(documents.len());
        for (class_name, document) in documents {
            let id = document_id(&document).map(str::to_string);
            let mark = scope.mark()?;
            match self.hydrate_in(scope, &class_name, document).await {
                Ok(key) => {
                    if !keys.contains(&key) {
                        keys.push(key);
                    }
                }
                Err(err) if err.is_element_scoped() => {
                    self.graph.rollback(scope, mark)?;
                    self.record_warning(request, id, &err)?
                }
                Err(err) => return Err(err),
            }
        }

        event!(Level::DEBUG, elements = keys.len(), "collection materialized");
        Ok(keys)
    }

    /// Owning side: fetch every stored pointer, then apply the query shape
    async fn fetch_pointer_array(&self, request: &CollectionRequest) -> Result<Vec<(String, Document)>> {
        let descriptor = &request.descriptor;
        let items = match &request.raw {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(OdmError::DataIntegrity(format!(
                    "Reference '{}.{}' must be stored as an array, got {}",
                    request.owner_class,
                    descriptor.name(),
                    other
                )));
            }
        };

        let mut pointers = Vec::with_capacity(items.len());
        for item in items {
            match self.pointer_for(descriptor, item) {
                Ok(pointer) => {
                    if !pointers.contains(&pointer) {
                        pointers.push(pointer);
                    }
                }
                Err(err) if err.is_element_scoped() => {
                    self.record_warning(request, reference_id(item).map(str::to_string), &err)?
                }
                Err(err) => return Err(err),
            }
        }

        let concurrency = self.registry.config().max_concurrent_fetches.max(1);
        let fetched: Vec<(Pointer, Result<Option<Document>>)> = stream::iter(pointers)
            .map(|pointer| async move {
                let result = match self.registry.get_metadata_for(&pointer.class_name) {
                    Ok(metadata) => {
                        self.storage
                            .fetch_by_identifier(&metadata.collection_name, &pointer.object_id)
                            .await
                    }
                    Err(err) => Err(err),
                };
                (pointer, result)
            })
            .buffered(concurrency)
            .collect()
            .await;

        let mut classes = Vec::with_capacity(fetched.len());
        let mut documents = Vec::with_capacity(fetched.len());
        for (pointer, result) in fetched {
            match result? {
                Some(document) => {
                    classes.push(pointer.class_name);
                    documents.push(document);
                }
                None => {
                    let err = OdmError::BrokenReference {
                        class_name: pointer.class_name,
                        id: pointer.object_id.clone(),
                    };
                    self.record_warning(request, Some(pointer.object_id), &err)?;
                }
            }
        }

        if !descriptor.has_query_shape() {
            return Ok(classes.into_iter().zip(documents).collect());
        }

        let order = descriptor.query_for("").apply_indexed(&documents)?;
        Ok(order
            .into_iter()
            .map(|i| (classes[i].clone(), documents[i].clone()))
            .collect())
    }

    /// Pair query/loader results with their concrete class
    fn classify(
        &self,
        request: &CollectionRequest,
        documents: Vec<Document>,
    ) -> Result<Vec<(String, Document)>> {
        let mut classified = Vec::with_capacity(documents.len());
        for document in documents {
            match self.class_for_document(&request.descriptor, &document) {
                Ok(class_name) => classified.push((class_name, document)),
                Err(err) if err.is_element_scoped() => {
                    self.record_warning(request, document_id(&document).map(str::to_string), &err)?
                }
                Err(err) => return Err(err),
            }
        }
        Ok(classified)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Read a stored reference, applying the discriminator if any
    fn pointer_for(&self, descriptor: &AssociationDescriptor, raw: &Value) -> Result<Pointer> {
        let id = reference_id(raw).ok_or_else(|| {
            OdmError::DataIntegrity(format!(
                "Malformed reference in '{}': {}",
                descriptor.name(),
                raw
            ))
        })?;
        let tag = descriptor
            .discriminator
            .as_ref()
            .and_then(|d| raw.get(&d.field))
            .and_then(Value::as_str);
        let class_name = descriptor.resolve_target(tag)?;
        Ok(Pointer::new(class_name, id))
    }

    /// Concrete class of a fetched target document
    fn class_for_document(&self, descriptor: &AssociationDescriptor, document: &Document) -> Result<String> {
        let tag = descriptor
            .discriminator
            .as_ref()
            .and_then(|d| document.get(&d.field))
            .and_then(Value::as_str);
        descriptor.resolve_target(tag).map(str::to_string)
    }

    fn target_metadata(&self, descriptor: &AssociationDescriptor) -> Result<Arc<ClassMetadata>> {
        let target = descriptor.target_class.as_deref().ok_or_else(|| {
            OdmError::Mapping(format!("'{}' has no target class", descriptor.name()))
        })?;
        self.registry.get_metadata_for(target)
    }

    /// Inverse side: criteria ∧ back-reference to the owner
    fn inverse_query(&self, descriptor: &AssociationDescriptor, owner_id: &str) -> Result<Query> {
        let target = self.target_metadata(descriptor)?;
        let mapped_by = descriptor.mapped_by.as_deref().ok_or_else(|| {
            OdmError::Mapping(format!("'{}' is not an inverse side", descriptor.name()))
        })?;
        let back_reference = target.association(mapped_by)?;

        Ok(descriptor
            .query_for(&target.collection_name)
            .criteria(Criteria::new().field(
                back_reference.store_as(),
                Condition::References(owner_id.to_string()),
            )))
    }

    async fn run_loader(
        &self,
        descriptor: &AssociationDescriptor,
        owner_class: &str,
        owner_id: Option<&str>,
        raw: Option<&Value>,
    ) -> Result<Vec<Document>> {
        let method = descriptor.repository_method.as_deref().unwrap_or_default();
        let target = self.target_metadata(descriptor)?;
        let loader = self
            .loaders
            .read()?
            .get(&(target.repository_name().to_string(), method.to_string()))
            .cloned()
            .ok_or_else(|| {
                OdmError::Mapping(format!(
                    "No repository method '{}' registered on '{}'",
                    method,
                    target.repository_name()
                ))
            })?;

        loader
            .load(LoaderContext {
                owner_class,
                owner_id,
                property: descriptor.name(),
                raw: raw.filter(|v| !is_absent(Some(*v))),
                collection: &target.collection_name,
                storage: self.storage.as_ref(),
            })
            .await
    }

    fn record_warning(
        &self,
        request: &CollectionRequest,
        target_id: Option<String>,
        err: &OdmError,
    ) -> Result<()> {
        event!(
            Level::WARN,
            owner_class = %request.owner_class,
            owner_id = ?request.owner_id,
            property = %request.descriptor.name(),
            target_id = ?target_id,
            error = %err,
            "collection element skipped"
        );
        self.warnings.lock()?.push(ResolutionWarning {
            owner_class: request.owner_class.clone(),
            property: request.descriptor.name().to_string(),
            target_id,
            message: err.to_string(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Access to resolved values
    // ------------------------------------------------------------------

    fn one_states(&self, owner: InstanceKey, property: &str) -> Result<(OneState, OneState)> {
        let instance = self.graph.get(owner)?;
        let state = instance.read()?;
        let one = state.association(property)?.as_one()?;
        Ok((one.current().clone(), one.snapshot().clone()))
    }

    fn collection(&self, owner: InstanceKey, property: &str) -> Result<PersistentCollection> {
        let instance = self.graph.get(owner)?;
        let state = instance.read()?;
        Ok(state.association(property)?.as_many()?.clone())
    }

    async fn resolve_state(&self, state: &OneState) -> Result<Option<InstanceKey>> {
        match state {
            OneState::Empty => Ok(None),
            OneState::Loaded(key) => Ok(Some(*key)),
            OneState::Lazy(handle) => handle.get(self).await,
        }
    }

    /// Current target of a ONE reference, resolving a lazy handle if needed
    pub async fn current_reference(&self, owner: InstanceKey, property: &str) -> Result<Option<InstanceKey>> {
        let (current, _) = self.one_states(owner, property)?;
        self.resolve_state(&current).await
    }

    /// Current elements of a MANY reference, materializing it if needed
    pub async fn current_elements(&self, owner: InstanceKey, property: &str) -> Result<Vec<InstanceKey>> {
        let collection = self.collection(owner, property)?;
        match collection.current() {
            Some(elements) => Ok(elements),
            None => collection.handle().get(self).await,
        }
    }

    /// Current targets of any reference, as a list
    pub async fn current_targets(
        &self,
        owner: InstanceKey,
        descriptor: &AssociationDescriptor,
    ) -> Result<Vec<InstanceKey>> {
        if descriptor.is_many() {
            self.current_elements(owner, descriptor.name()).await
        } else {
            Ok(self
                .current_reference(owner, descriptor.name())
                .await?
                .into_iter()
                .collect())
        }
    }

    /// Targets detached from `owner` since load: collection elements that were
    /// removed, or the previous target of a reassigned/cleared ONE reference
    pub async fn detached_targets(
        &self,
        owner: InstanceKey,
        descriptor: &AssociationDescriptor,
    ) -> Result<Vec<InstanceKey>> {
        if descriptor.is_one() {
            let (current, snapshot) = self.one_states(owner, descriptor.name())?;
            if current.same_target(&snapshot) {
                return Ok(Vec::new());
            }
            let previous = self.resolve_state(&snapshot).await?;
            let now = self.resolve_state(&current).await?;
            return Ok(previous.filter(|p| Some(*p) != now).into_iter().collect());
        }

        let collection = self.collection(owner, descriptor.name())?;
        let Some(current) = collection.current().filter(|_| collection.is_dirty()) else {
            return Ok(Vec::new());
        };
        let loaded = collection.handle().get(self).await?;
        Ok(loaded.into_iter().filter(|k| !current.contains(k)).collect())
    }
}

/// Scalar fields of a stored document, keyed by property name
fn read_fields(metadata: &ClassMetadata, document: &Document) -> Result<Document> {
    let mut fields = Document::new();
    for field in metadata.fields() {
        if let Some(value) = document.get(&field.store_as) {
            field.validate(value).map_err(|err| match err {
                OdmError::DataIntegrity(msg) => {
                    OdmError::DataIntegrity(format!("{}: {}", metadata.class_name, msg))
                }
                other => other,
            })?;
            fields.insert(field.name.clone(), value.clone());
        }
    }
    Ok(fields)
}
