//! Integration tests for the sluggable behavior
//!
//! Slugs are generated through full flush cycles of the in-memory object
//! manager: transliteration, batch and persisted uniqueness, frozen slugs,
//! scopes, column lengths and handlers.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use elif_behaviors::{
    AssociationMapping, BehaviorConfig, BehaviorError, ClassMetadata, EventManager, FieldMapping,
    FieldType, FieldValue, MemoryObjectManager, ObjectId, Record, SluggableListener,
    StaticMappingDriver,
};
use serde_json::{json, Value};

fn article() -> ClassMetadata {
    ClassMetadata::new("Article")
        .with_field(FieldMapping::string("title", 128))
        .with_field(FieldMapping::string("slug", 128).unique())
}

fn setup(classes: Vec<(ClassMetadata, Option<Value>)>) -> MemoryObjectManager {
    let driver = StaticMappingDriver::new();
    for (class, config) in &classes {
        if let Some(config) = config {
            driver.register(&class.name, "sluggable", config.clone());
        }
    }
    let listener = Arc::new(SluggableListener::new(
        Arc::new(driver),
        BehaviorConfig::default(),
    ));
    let mut manager = MemoryObjectManager::new(Arc::new(EventManager::new().with_subscriber(listener)));
    for (class, _) in classes {
        manager.register_class(class).unwrap();
    }
    manager
}

fn articles(config: Value) -> MemoryObjectManager {
    setup(vec![(article(), Some(config))])
}

fn slug_of(manager: &MemoryObjectManager, object: ObjectId) -> FieldValue {
    manager.get(object, "slug").unwrap()
}

async fn insert(manager: &mut MemoryObjectManager, title: &str) -> ObjectId {
    let object = manager
        .persist(Record::new("Article").with("title", title))
        .unwrap();
    manager.flush().await.unwrap();
    object
}

#[tokio::test]
async fn test_transliterates_accented_source() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    let article = insert(&mut manager, "Café du Monde").await;

    assert_eq!(slug_of(&manager, article), FieldValue::from("cafe-du-monde"));
    assert_eq!(
        manager.rows("Article")[0].get("slug"),
        Some(&FieldValue::from("cafe-du-monde"))
    );
}

#[tokio::test]
async fn test_same_batch_duplicates_follow_schedule_order() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    let first = manager.persist(Record::new("Article").with("title", "Test")).unwrap();
    let second = manager.persist(Record::new("Article").with("title", "test")).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(slug_of(&manager, first), FieldValue::from("test"));
    assert_eq!(slug_of(&manager, second), FieldValue::from("test-2"));
}

#[tokio::test]
async fn test_repeated_inserts_have_no_gaps() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    let mut slugs = Vec::new();
    for _ in 0..4 {
        let article = insert(&mut manager, "Hello World").await;
        slugs.push(slug_of(&manager, article));
    }

    assert_eq!(
        slugs,
        vec![
            FieldValue::from("hello-world"),
            FieldValue::from("hello-world-2"),
            FieldValue::from("hello-world-3"),
            FieldValue::from("hello-world-4"),
        ]
    );
}

#[tokio::test]
async fn test_prefix_of_existing_slug_is_not_a_collision() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    insert(&mut manager, "Test Post").await;
    insert(&mut manager, "Testing").await;

    let article = insert(&mut manager, "Test").await;
    assert_eq!(slug_of(&manager, article), FieldValue::from("test"));
}

#[tokio::test]
async fn test_equivalent_rename_keeps_suffix() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    insert(&mut manager, "Test").await;
    let second = insert(&mut manager, "Test").await;
    assert_eq!(slug_of(&manager, second), FieldValue::from("test-2"));

    manager.set(second, "title", "TEST").unwrap();
    manager.flush().await.unwrap();
    assert_eq!(slug_of(&manager, second), FieldValue::from("test-2"));
}

#[tokio::test]
async fn test_updatable_slug_follows_source() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    let article = insert(&mut manager, "First Title").await;

    manager.set(article, "title", "Second Title").unwrap();
    manager.flush().await.unwrap();
    assert_eq!(slug_of(&manager, article), FieldValue::from("second-title"));
}

#[tokio::test]
async fn test_non_updatable_slug_is_frozen() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"], "updatable": false } }));
    let article = insert(&mut manager, "Original").await;

    manager.set(article, "title", "Changed").unwrap();
    manager.flush().await.unwrap();
    manager.set(article, "title", "Changed Again").unwrap();
    manager.flush().await.unwrap();

    assert_eq!(slug_of(&manager, article), FieldValue::from("original"));
}

#[tokio::test]
async fn test_manual_slug_is_urlized_and_unique() {
    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    insert(&mut manager, "My Custom Slug").await;

    let article = manager
        .persist(
            Record::new("Article")
                .with("title", "Anything")
                .with("slug", "My Custom Slug"),
        )
        .unwrap();
    manager.flush().await.unwrap();

    assert_eq!(slug_of(&manager, article), FieldValue::from("my-custom-slug-2"));
}

#[tokio::test]
async fn test_unique_base_scopes_collisions() {
    let class = article().with_field(FieldMapping::integer("category_id"));
    let mut manager = setup(vec![(
        class,
        Some(json!({ "slug": { "fields": ["title"], "unique_base": "category_id" } })),
    )]);

    let news = manager
        .persist(Record::new("Article").with("title", "Hello").with("category_id", 1))
        .unwrap();
    let sports = manager
        .persist(Record::new("Article").with("title", "Hello").with("category_id", 2))
        .unwrap();
    let more_news = manager
        .persist(Record::new("Article").with("title", "Hello").with("category_id", 1))
        .unwrap();
    manager.flush().await.unwrap();

    assert_eq!(slug_of(&manager, news), FieldValue::from("hello"));
    assert_eq!(slug_of(&manager, sports), FieldValue::from("hello"));
    assert_eq!(slug_of(&manager, more_news), FieldValue::from("hello-2"));
}

#[tokio::test]
async fn test_prefix_and_suffix_are_outside_uniqueness() {
    let mut manager = articles(json!({
        "slug": { "fields": ["title"], "prefix": "blog/", "suffix": ".html" }
    }));
    let first = insert(&mut manager, "Hello").await;
    let second = insert(&mut manager, "Hello").await;

    assert_eq!(slug_of(&manager, first), FieldValue::from("blog/hello.html"));
    assert_eq!(slug_of(&manager, second), FieldValue::from("blog/hello-2.html"));
}

#[tokio::test]
async fn test_slug_fits_column_length() {
    let class = ClassMetadata::new("Article")
        .with_field(FieldMapping::string("title", 128))
        .with_field(FieldMapping::string("slug", 10));
    let mut manager = setup(vec![(class, Some(json!({ "slug": { "fields": ["title"] } })))]);

    let first = insert(&mut manager, "abcdefghijklmnop").await;
    let second = insert(&mut manager, "abcdefghijklmnop").await;

    assert_eq!(slug_of(&manager, first), FieldValue::from("abcdefghij"));
    assert_eq!(slug_of(&manager, second), FieldValue::from("abcdefgh-2"));
}

#[tokio::test]
async fn test_styles_and_multiple_sources() {
    let class = article()
        .with_field(FieldMapping::string("code", 64))
        .with_field(FieldMapping::new("published_at", FieldType::DateTime));
    let mut manager = setup(vec![(
        class,
        Some(json!({
            "slug": { "fields": ["title", "published_at"], "date_format": "%Y-%m-%d" },
            "code": { "fields": ["title"], "style": "camel", "unique": false }
        })),
    )]);

    let published = Utc.with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
    let article = manager
        .persist(
            Record::new("Article")
                .with("title", "hello big world")
                .with("published_at", published),
        )
        .unwrap();
    manager.flush().await.unwrap();

    assert_eq!(
        slug_of(&manager, article),
        FieldValue::from("hello-big-world-2024-01-15")
    );
    assert_eq!(
        manager.get(article, "code").unwrap(),
        FieldValue::from("HelloBigWorld")
    );
}

#[tokio::test]
async fn test_empty_source_on_nullable_and_required_slugs() {
    let class = ClassMetadata::new("Article")
        .with_field(FieldMapping::string("title", 128).nullable())
        .with_field(FieldMapping::string("slug", 128).nullable());
    let mut manager = setup(vec![(class, Some(json!({ "slug": { "fields": ["title"] } })))]);
    let article = manager.persist(Record::new("Article")).unwrap();
    manager.flush().await.unwrap();
    assert_eq!(slug_of(&manager, article), FieldValue::Null);

    let mut manager = articles(json!({ "slug": { "fields": ["title"] } }));
    manager.persist(Record::new("Article").with("title", "!!!")).unwrap();
    let err = manager.flush().await.unwrap_err();
    assert!(matches!(err, BehaviorError::InvalidValue { .. }));
    assert!(manager.rows("Article").is_empty());
}

#[tokio::test]
async fn test_relative_handler_prefixes_related_slug() {
    let category = ClassMetadata::new("Category")
        .with_field(FieldMapping::string("name", 64))
        .with_field(FieldMapping::string("slug", 64));
    let class = article().with_association(AssociationMapping::many_to_one("category", "Category"));
    let mut manager = setup(vec![
        (category, Some(json!({ "slug": { "fields": ["name"] } }))),
        (
            class,
            Some(json!({
                "slug": {
                    "fields": ["title"],
                    "handlers": [{
                        "type": "relative",
                        "relation_field": "category",
                        "relation_slug_field": "slug",
                        "separator": "/"
                    }]
                }
            })),
        ),
    ]);

    let news = manager
        .persist(Record::new("Category").with("name", "World News"))
        .unwrap();
    manager.flush().await.unwrap();
    let news_id = manager.get(news, "id").unwrap();

    let article = manager
        .persist(
            Record::new("Article")
                .with("title", "Hello World")
                .with("category", news_id),
        )
        .unwrap();
    manager.flush().await.unwrap();

    assert_eq!(slug_of(&manager, article), FieldValue::from("world-news/hello-world"));
}

#[tokio::test]
async fn test_tree_handler_renames_descendants() {
    let page = ClassMetadata::new("Page")
        .with_field(FieldMapping::string("title", 64))
        .with_field(FieldMapping::string("slug", 255))
        .with_association(AssociationMapping::many_to_one("parent", "Page"));
    let mut manager = setup(vec![(
        page,
        Some(json!({
            "slug": {
                "fields": ["title"],
                "handlers": [{ "type": "tree", "parent_relation_field": "parent" }]
            }
        })),
    )]);

    let about = manager.persist(Record::new("Page").with("title", "About")).unwrap();
    manager.flush().await.unwrap();
    let about_id = manager.get(about, "id").unwrap();

    let team = manager
        .persist(Record::new("Page").with("title", "Team").with("parent", about_id))
        .unwrap();
    manager.flush().await.unwrap();
    assert_eq!(manager.get(team, "slug").unwrap(), FieldValue::from("about/team"));

    manager.set(about, "title", "Company").unwrap();
    manager.flush().await.unwrap();

    assert_eq!(manager.get(about, "slug").unwrap(), FieldValue::from("company"));
    assert_eq!(manager.get(team, "slug").unwrap(), FieldValue::from("company/team"));
}

#[tokio::test]
async fn test_invalid_configuration_fails_at_registration() {
    let driver = StaticMappingDriver::new()
        .with("Article", "sluggable", json!({ "slug": { "fields": ["missing"] } }))
        .with("Counter", "sluggable", json!({ "hits": { "fields": ["name"] } }));
    let listener = Arc::new(SluggableListener::new(Arc::new(driver), BehaviorConfig::default()));
    let mut manager = MemoryObjectManager::new(Arc::new(EventManager::new().with_subscriber(listener)));

    let err = manager.register_class(article()).unwrap_err();
    assert!(matches!(err, BehaviorError::Configuration { .. }));

    let counter = ClassMetadata::new("Counter")
        .with_field(FieldMapping::string("name", 32))
        .with_field(FieldMapping::integer("hits"));
    assert!(manager.register_class(counter).is_err());
    assert!(manager.persist(Record::new("Article")).is_err());
}
