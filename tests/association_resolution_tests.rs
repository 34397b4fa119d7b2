use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

use parse_odm::prelude::*;
use parse_odm::query::Query;
use parse_odm::storage::StorageStats;

fn date(day: u32) -> Value {
    json!({"__type": "Date", "iso": format!("2024-03-{:02}T12:00:00.000Z", day)})
}

fn pointer(class_name: &str, id: &str) -> Value {
    json!({"__type": "Pointer", "className": class_name, "objectId": id})
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

fn mapping() -> StaticMappingSource {
    StaticMappingSource::new()
        .with_class(
            ClassDeclaration::new("User")
                .field(FieldDeclaration::new("name", FieldType::String))
                .reference(ReferenceDeclaration::many("posts").target("Post").mapped_by("author"))
                .reference(ReferenceDeclaration::one("best_friend").target("User").nullable()),
        )
        .with_class(
            ClassDeclaration::new("Post")
                .field(FieldDeclaration::new("title", FieldType::String))
                .field(FieldDeclaration::new("createdAt", FieldType::Date).nullable())
                .reference(ReferenceDeclaration::one("author").target("User").inversed_by("posts"))
                .reference(ReferenceDeclaration::one("editor").target("User").nullable().lazy(true))
                .reference(
                    ReferenceDeclaration::many("recent_comments")
                        .target("Comment")
                        .mapped_by("post")
                        .sort(SortKey::desc("createdAt"))
                        .limit(2),
                ),
        )
        .with_class(
            ClassDeclaration::new("Comment")
                .field(FieldDeclaration::new("createdAt", FieldType::Date))
                .reference(ReferenceDeclaration::one("post").target("Post").inversed_by("recent_comments")),
        )
        .with_class(
            ClassDeclaration::new("Feed").reference(
                ReferenceDeclaration::many("entries")
                    .target("Entry")
                    .sort(SortKey::desc("createdAt"))
                    .limit(2)
                    .lazy(false),
            ),
        )
        .with_class(
            ClassDeclaration::new("Entry")
                .repository_class("EntryRepository")
                .field(FieldDeclaration::new("createdAt", FieldType::Date))
                .field(FieldDeclaration::new("published", FieldType::Boolean).nullable()),
        )
        .with_class(
            ClassDeclaration::new("Shelf")
                .reference(
                    ReferenceDeclaration::many("items")
                        .discriminator([("book", "Book"), ("film", "Film")])
                        .lazy(false),
                )
                .reference(
                    ReferenceDeclaration::one("featured")
                        .discriminator([("book", "Book"), ("film", "Film")])
                        .default_discriminator_value("Film")
                        .nullable(),
                ),
        )
        .with_class(ClassDeclaration::new("Book"))
        .with_class(ClassDeclaration::new("Film"))
        .with_class(
            ClassDeclaration::new("Board")
                .reference(ReferenceDeclaration::many("pins").target("Pin").simple()),
        )
        .with_class(ClassDeclaration::new("Pin"))
        .with_class(
            ClassDeclaration::new("Node")
                .reference(ReferenceDeclaration::one("friend").target("Node").nullable())
                .reference(ReferenceDeclaration::one("boss").target("Node").nullable()),
        )
        .with_class(
            ClassDeclaration::new("Homepage").reference(
                ReferenceDeclaration::many("highlights")
                    .target("Entry")
                    .repository_method("findPublished"),
            ),
        )
}

struct Fixture {
    storage: Arc<InMemoryStorage>,
    manager: Arc<DocumentManager>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(MetadataRegistry::new(Arc::new(mapping()), OdmConfig::default()));
    let storage = Arc::new(InMemoryStorage::new());
    let manager = Arc::new(DocumentManager::new(registry, storage.clone()));
    Fixture { storage, manager }
}

impl Fixture {
    async fn seed(&self, collection: &str, value: Value) {
        self.storage.persist(collection, doc(value)).await.unwrap();
    }

    fn stats(&self) -> StorageStats {
        self.storage.stats()
    }

    fn id(&self, key: InstanceKey) -> String {
        self.manager.id(key).unwrap().unwrap()
    }

    fn ids(&self, keys: &[InstanceKey]) -> Vec<String> {
        keys.iter().map(|k| self.id(*k)).collect()
    }
}

#[tokio::test]
async fn test_eager_one_is_loaded_with_owner() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada"})).await;
    fx.seed("Post", json!({"objectId": "p1", "title": "Hello", "author": pointer("User", "u1")})).await;

    let post = fx.manager.find("Post", "p1").await.unwrap().unwrap();
    assert_eq!(fx.stats().fetches, 2);

    let author = fx.manager.reference(post, "author").await.unwrap().unwrap();
    assert_eq!(fx.id(author), "u1");
    assert_eq!(fx.manager.field(author, "name").unwrap(), Some(json!("Ada")));
    assert_eq!(fx.stats().fetches, 2);

    // identity map: loading the user again yields the same instance
    assert_eq!(fx.manager.find("User", "u1").await.unwrap(), Some(author));
    assert_eq!(fx.stats().fetches, 2);
}

#[tokio::test]
async fn test_lazy_one_fetches_once_under_concurrent_access() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada"})).await;
    fx.seed("User", json!({"objectId": "u2", "name": "Grace"})).await;
    fx.seed(
        "Post",
        json!({
            "objectId": "p1",
            "title": "Hello",
            "author": pointer("User", "u1"),
            "editor": pointer("User", "u2")
        }),
    )
    .await;

    let post = fx.manager.find("Post", "p1").await.unwrap().unwrap();
    fx.storage.reset_stats();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let manager = Arc::clone(&fx.manager);
        handles.push(tokio::spawn(async move { manager.reference(post, "editor").await }));
    }
    let mut targets = Vec::new();
    for handle in handles {
        targets.push(handle.await.unwrap().unwrap().unwrap());
    }

    assert_eq!(fx.stats().fetches, 1);
    assert!(targets.iter().all(|t| *t == targets[0]));
    assert_eq!(fx.id(targets[0]), "u2");

    let again = fx.manager.reference(post, "editor").await.unwrap();
    assert_eq!(again, Some(targets[0]));
    assert_eq!(fx.stats().fetches, 1);
}

#[tokio::test]
async fn test_broken_one_reference_fails() {
    let fx = fixture();
    fx.seed("Post", json!({"objectId": "p1", "title": "Hello", "author": pointer("User", "gone")})).await;

    let err = fx.manager.find("Post", "p1").await.unwrap_err();
    match err {
        OdmError::BrokenReference { class_name, id } => {
            assert_eq!(class_name, "User");
            assert_eq!(id, "gone");
        }
        other => panic!("unexpected error: {other}"),
    }
    // the half-built post does not stay in the identity map
    assert!(fx.manager.graph().lookup("Post", "p1").unwrap().is_none());
}

#[tokio::test]
async fn test_absent_one_follows_nullability() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada"})).await;
    fx.seed("Post", json!({"objectId": "p1", "title": "Orphan"})).await;

    let user = fx.manager.find("User", "u1").await.unwrap().unwrap();
    assert_eq!(fx.manager.reference(user, "best_friend").await.unwrap(), None);

    let err = fx.manager.find("Post", "p1").await.unwrap_err();
    assert!(matches!(err, OdmError::DataIntegrity(_)));
}

#[tokio::test]
async fn test_eager_cycle_terminates_through_identity_map() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada", "best_friend": pointer("User", "u2")})).await;
    fx.seed("User", json!({"objectId": "u2", "name": "Grace", "best_friend": pointer("User", "u1")})).await;

    let ada = fx.manager.find("User", "u1").await.unwrap().unwrap();
    let grace = fx.manager.reference(ada, "best_friend").await.unwrap().unwrap();

    assert_eq!(fx.manager.reference(grace, "best_friend").await.unwrap(), Some(ada));
    assert_eq!(fx.stats().fetches, 2);
}

#[tokio::test]
async fn test_owning_many_applies_sort_and_limit_in_memory() {
    let fx = fixture();
    for day in 1..=5 {
        fx.seed("Entry", json!({"objectId": format!("e{day}"), "createdAt": date(day)})).await;
    }
    let entries: Vec<Value> = [3, 1, 5, 2, 4]
        .iter()
        .map(|day| pointer("Entry", &format!("e{day}")))
        .collect();
    fx.seed("Feed", json!({"objectId": "f1", "entries": entries})).await;

    let feed = fx.manager.find("Feed", "f1").await.unwrap().unwrap();
    let elements = fx.manager.collection(feed, "entries").await.unwrap();

    assert_eq!(fx.ids(&elements), vec!["e5", "e4"]);
    assert!(fx.manager.take_warnings().is_empty());
}

#[tokio::test]
async fn test_inverse_many_queries_by_back_reference() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada"})).await;
    fx.seed("Post", json!({"objectId": "p1", "title": "Hello", "author": pointer("User", "u1")})).await;
    fx.seed("Post", json!({"objectId": "p2", "title": "Other", "author": pointer("User", "u1")})).await;
    for day in 1..=5 {
        fx.seed(
            "Comment",
            json!({"objectId": format!("c{day}"), "createdAt": date(day), "post": pointer("Post", "p1")}),
        )
        .await;
    }
    fx.seed("Comment", json!({"objectId": "c9", "createdAt": date(9), "post": pointer("Post", "p2")})).await;

    let post = fx.manager.find("Post", "p1").await.unwrap().unwrap();
    fx.storage.reset_stats();

    let recent = fx.manager.collection(post, "recent_comments").await.unwrap();
    assert_eq!(fx.ids(&recent), vec!["c5", "c4"]);
    assert_eq!(fx.stats().queries, 1);
    // the back-reference of each comment resolves to the already loaded post
    assert_eq!(fx.stats().fetches, 0);
    assert_eq!(fx.manager.reference(recent[0], "post").await.unwrap(), Some(post));

    // cached until invalidated
    fx.manager.collection(post, "recent_comments").await.unwrap();
    assert_eq!(fx.stats().queries, 1);

    fx.seed("Comment", json!({"objectId": "c6", "createdAt": date(6), "post": pointer("Post", "p1")})).await;
    fx.manager.invalidate_collection(post, "recent_comments").unwrap();
    let recent = fx.manager.collection(post, "recent_comments").await.unwrap();
    assert_eq!(fx.ids(&recent), vec!["c6", "c5"]);
    assert_eq!(fx.stats().queries, 2);
}

#[tokio::test]
async fn test_lazy_many_is_deferred_until_access() {
    let fx = fixture();
    fx.seed("User", json!({"objectId": "u1", "name": "Ada"})).await;
    fx.seed("Post", json!({"objectId": "p1", "title": "Hello", "author": pointer("User", "u1")})).await;

    let user = fx.manager.find("User", "u1").await.unwrap().unwrap();
    assert_eq!(fx.stats().queries, 0);

    let posts = fx.manager.collection(user, "posts").await.unwrap();
    assert_eq!(fx.ids(&posts), vec!["p1"]);
    assert_eq!(fx.stats().queries, 1);
    assert_eq!(fx.manager.reference(posts[0], "author").await.unwrap(), Some(user));
}

#[tokio::test]
async fn test_persisting_limited_view_keeps_stored_pointers() {
    let fx = fixture();
    for day in 1..=6 {
        fx.seed("Entry", json!({"objectId": format!("e{day}"), "createdAt": date(day)})).await;
    }
    let entries: Vec<Value> = [3, 1, 5, 2, 4]
        .iter()
        .map(|day| pointer("Entry", &format!("e{day}")))
        .collect();
    fx.seed("Feed", json!({"objectId": "f1", "entries": entries.clone()})).await;

    let feed = fx.manager.find("Feed", "f1").await.unwrap().unwrap();
    let elements = fx.manager.collection(feed, "entries").await.unwrap();
    assert_eq!(fx.ids(&elements), vec!["e5", "e4"]);

    fx.manager.persist(feed).await.unwrap();
    let stored = fx.storage.fetch_by_identifier("Feed", "f1").await.unwrap().unwrap();
    assert_eq!(stored["entries"], Value::Array(entries));

    // edits apply to the visible elements only
    let extra = fx.manager.find("Entry", "e6").await.unwrap().unwrap();
    assert!(fx.manager.remove_from_collection(feed, "entries", elements[1]).await.unwrap());
    assert!(fx.manager.add_to_collection(feed, "entries", extra).await.unwrap());
    fx.manager.persist(feed).await.unwrap();

    let stored = fx.storage.fetch_by_identifier("Feed", "f1").await.unwrap().unwrap();
    let ids: Vec<&str> = stored["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["objectId"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["e3", "e1", "e5", "e2", "e6"]);
}

#[tokio::test]
async fn test_failed_load_leaves_no_partial_instances() {
    let fx = fixture();
    fx.seed(
        "Node",
        json!({"objectId": "n1", "friend": pointer("Node", "n2"), "boss": pointer("Node", "gone")}),
    )
    .await;
    fx.seed("Node", json!({"objectId": "n2", "friend": pointer("Node", "n1")})).await;

    let err = fx.manager.find("Node", "n1").await.unwrap_err();
    assert!(matches!(err, OdmError::BrokenReference { .. }));
    assert!(fx.manager.graph().lookup("Node", "n2").unwrap().is_none());
    assert!(fx.manager.graph().is_empty());

    fx.seed("Node", json!({"objectId": "gone"})).await;
    let n2 = fx.manager.find("Node", "n2").await.unwrap().unwrap();
    let n1 = fx.manager.reference(n2, "friend").await.unwrap().unwrap();
    assert_eq!(fx.id(n1), "n1");
    assert_eq!(fx.manager.reference(n1, "friend").await.unwrap(), Some(n2));
    let boss = fx.manager.reference(n1, "boss").await.unwrap().unwrap();
    assert_eq!(fx.id(boss), "gone");
}

/// Yields before every call so concurrent loads interleave
struct YieldingStorage(InMemoryStorage);

#[async_trait]
impl StorageAdapter for YieldingStorage {
    async fn fetch_by_identifier(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        tokio::task::yield_now().await;
        self.0.fetch_by_identifier(collection, id).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        tokio::task::yield_now().await;
        self.0.query(query).await
    }

    async fn persist(&self, collection: &str, document: Document) -> Result<ObjectId> {
        self.0.persist(collection, document).await
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        self.0.remove(collection, id).await
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.0.drop_collection(collection).await
    }
}

#[tokio::test]
async fn test_concurrent_loads_share_complete_instances() {
    let storage = YieldingStorage(InMemoryStorage::new());
    storage
        .persist("Node", doc(json!({"objectId": "n1", "friend": pointer("Node", "n2")})))
        .await
        .unwrap();
    storage
        .persist("Node", doc(json!({"objectId": "n2", "friend": pointer("Node", "n1")})))
        .await
        .unwrap();
    let registry = Arc::new(MetadataRegistry::new(Arc::new(mapping()), OdmConfig::default()));
    let manager = DocumentManager::new(registry, Arc::new(storage));

    let (n1, n2) = tokio::join!(manager.find("Node", "n1"), manager.find("Node", "n2"));
    let n1 = n1.unwrap().unwrap();
    let n2 = n2.unwrap().unwrap();

    assert_eq!(manager.graph().lookup("Node", "n1").unwrap(), Some(n1));
    assert_eq!(manager.graph().lookup("Node", "n2").unwrap(), Some(n2));
    assert_eq!(manager.reference(n1, "friend").await.unwrap(), Some(n2));
    assert_eq!(manager.reference(n2, "friend").await.unwrap(), Some(n1));
    assert_eq!(manager.graph().len(), 2);
}

#[tokio::test]
async fn test_missing_many_element_is_skipped_with_warning() {
    let fx = fixture();
    fx.seed("Entry", json!({"objectId": "e1", "createdAt": date(1)})).await;
    fx.seed("Entry", json!({"objectId": "e2", "createdAt": date(2)})).await;
    fx.seed(
        "Feed",
        json!({"objectId": "f1", "entries": [pointer("Entry", "e1"), pointer("Entry", "gone"), pointer("Entry", "e2")]}),
    )
    .await;

    let feed = fx.manager.find("Feed", "f1").await.unwrap().unwrap();
    let elements = fx.manager.collection(feed, "entries").await.unwrap();
    assert_eq!(fx.ids(&elements), vec!["e2", "e1"]);

    let warnings = fx.manager.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].owner_class, "Feed");
    assert_eq!(warnings[0].property, "entries");
    assert_eq!(warnings[0].target_id.as_deref(), Some("gone"));
    assert!(fx.manager.take_warnings().is_empty());
}

#[tokio::test]
async fn test_discriminated_references() {
    let fx = fixture();
    fx.seed("Book", json!({"objectId": "b1"})).await;
    fx.seed("Film", json!({"objectId": "m1"})).await;
    fx.seed(
        "Shelf",
        json!({
            "objectId": "s1",
            "items": [
                {"__type": "Pointer", "className": "Book", "objectId": "b1", "_type": "book"},
                {"__type": "Pointer", "className": "Zine", "objectId": "z1", "_type": "zine"},
                {"__type": "Pointer", "className": "Film", "objectId": "m1", "_type": "film"}
            ],
            "featured": {"__type": "Pointer", "className": "Film", "objectId": "m1"}
        }),
    )
    .await;

    let shelf = fx.manager.find("Shelf", "s1").await.unwrap().unwrap();
    let items = fx.manager.collection(shelf, "items").await.unwrap();
    let classes: Vec<String> = items.iter().map(|k| fx.manager.class_of(*k).unwrap()).collect();
    assert_eq!(classes, vec!["Book", "Film"]);

    let warnings = fx.manager.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].target_id.as_deref(), Some("z1"));

    // untagged pointer falls back to the default
    let featured = fx.manager.reference(shelf, "featured").await.unwrap().unwrap();
    assert_eq!(featured, items[1]);
}

#[tokio::test]
async fn test_simple_references_hold_bare_ids() {
    let fx = fixture();
    fx.seed("Pin", json!({"objectId": "a"})).await;
    fx.seed("Pin", json!({"objectId": "b"})).await;
    fx.seed("Board", json!({"objectId": "board", "pins": ["b", "a", "b"]})).await;

    let board = fx.manager.find("Board", "board").await.unwrap().unwrap();
    let pins = fx.manager.collection(board, "pins").await.unwrap();
    assert_eq!(fx.ids(&pins), vec!["b", "a"]);
}

struct PublishedEntries;

#[async_trait]
impl ReferenceLoader for PublishedEntries {
    async fn load(&self, context: LoaderContext<'_>) -> parse_odm::Result<Vec<Document>> {
        assert_eq!(context.property, "highlights");
        let query = parse_odm::query::Query::new(context.collection)
            .criteria(Criteria::new().field("published", Condition::Eq(json!(true))))
            .sort(vec![SortKey::asc("createdAt")]);
        context.storage.query(&query).await
    }
}

#[tokio::test]
async fn test_repository_method_loader() {
    let fx = fixture();
    fx.seed("Entry", json!({"objectId": "e1", "createdAt": date(3), "published": true})).await;
    fx.seed("Entry", json!({"objectId": "e2", "createdAt": date(1), "published": false})).await;
    fx.seed("Entry", json!({"objectId": "e3", "createdAt": date(2), "published": true})).await;
    fx.seed("Homepage", json!({"objectId": "home"})).await;

    let home = fx.manager.find("Homepage", "home").await.unwrap().unwrap();
    let err = fx.manager.collection(home, "highlights").await.unwrap_err();
    assert!(matches!(err, OdmError::Mapping(_)));

    fx.manager
        .register_loader("EntryRepository", "findPublished", Arc::new(PublishedEntries))
        .unwrap();
    let highlights = fx.manager.collection(home, "highlights").await.unwrap();
    assert_eq!(fx.ids(&highlights), vec!["e3", "e1"]);
}
