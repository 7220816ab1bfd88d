//! Integration tests for nested set trees
//!
//! Every scenario checks the interval invariants after the flush: each node
//! satisfies `left < right`, coordinates are unique within a tree and child
//! intervals nest strictly inside their parent.

use std::collections::HashSet;
use std::sync::Arc;

use elif_behaviors::{
    AssociationMapping, Backend, BehaviorConfig, BehaviorError, ClassMetadata, EventManager,
    FieldMapping, FieldValue, MemoryObjectManager, NodePosition, ObjectId, Record, Row,
    StaticMappingDriver, TreeListener,
};
use serde_json::{json, Value};

fn category() -> ClassMetadata {
    ClassMetadata::new("Category")
        .with_field(FieldMapping::string("title", 64))
        .with_field(FieldMapping::integer("lft").nullable())
        .with_field(FieldMapping::integer("rgt").nullable())
        .with_field(FieldMapping::integer("lvl").nullable())
        .with_association(AssociationMapping::many_to_one("parent", "Category"))
}

fn nested(extra: Value) -> Value {
    let mut config = json!({
        "strategy": "nested",
        "parentField": "parent",
        "leftField": "lft",
        "rightField": "rgt",
        "levelField": "lvl"
    });
    if let (Some(config), Some(extra)) = (config.as_object_mut(), extra.as_object()) {
        config.extend(extra.clone());
    }
    config
}

fn setup_with(
    class: ClassMetadata,
    config: Value,
    backend: Backend,
) -> (MemoryObjectManager, Arc<TreeListener>) {
    let driver = StaticMappingDriver::new().with(&class.name, "tree", config);
    let listener = Arc::new(TreeListener::new(Arc::new(driver), BehaviorConfig::default()));
    let events = Arc::new(EventManager::new().with_subscriber(listener.clone()));
    let mut manager = MemoryObjectManager::with_backend(events, backend);
    manager.register_class(class).unwrap();
    (manager, listener)
}

fn setup(extra: Value) -> (MemoryObjectManager, Arc<TreeListener>) {
    setup_with(category(), nested(extra), Backend::Relational)
}

fn node(manager: &mut MemoryObjectManager, title: &str, parent: Option<ObjectId>) -> ObjectId {
    let mut record = Record::new("Category").with("title", title);
    if let Some(parent) = parent {
        record = record.with("parent", manager.get(parent, "id").unwrap());
    }
    manager.persist(record).unwrap()
}

fn coords(manager: &MemoryObjectManager, node: ObjectId) -> (i64, i64, i64) {
    let int = |field: &str| manager.get(node, field).unwrap().as_i64().unwrap();
    (int("lft"), int("rgt"), int("lvl"))
}

fn int(row: &Row, field: &str) -> i64 {
    row.get(field).and_then(FieldValue::as_i64).unwrap()
}

fn assert_intervals(rows: &[Row]) {
    let mut seen = HashSet::new();
    for row in rows {
        let (left, right) = (int(row, "lft"), int(row, "rgt"));
        assert!(left < right, "left {} is not below right {}", left, right);
        assert!(seen.insert(left) && seen.insert(right), "duplicate coordinate");

        let parent = row.get("parent").cloned().unwrap_or(FieldValue::Null);
        if parent.is_null() {
            continue;
        }
        let parent = rows
            .iter()
            .find(|candidate| candidate.get("id") == Some(&parent))
            .expect("parent row");
        assert!(int(parent, "lft") < left && right < int(parent, "rgt"));
        assert_eq!(int(parent, "lvl") + 1, int(row, "lvl"));
    }
    assert_eq!(seen.len(), rows.len() * 2);
    assert_eq!(seen.iter().max().copied().unwrap_or(0), rows.len() as i64 * 2);
}

/// A(1,8) B(2,5) D(3,4) C(6,7)
async fn four_nodes(manager: &mut MemoryObjectManager) -> [ObjectId; 4] {
    let a = node(manager, "A", None);
    let b = node(manager, "B", Some(a));
    let c = node(manager, "C", Some(a));
    let d = node(manager, "D", Some(b));
    manager.flush().await.unwrap();
    [a, b, c, d]
}

#[tokio::test]
async fn test_chain_in_one_flush() {
    let (mut manager, _) = setup(json!({}));
    let a = node(&mut manager, "A", None);
    let b = node(&mut manager, "B", Some(a));
    let c = node(&mut manager, "C", Some(b));
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, a), (1, 6, 0));
    assert_eq!(coords(&manager, b), (2, 5, 1));
    assert_eq!(coords(&manager, c), (3, 4, 2));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_children_appended_across_flushes() {
    let (mut manager, _) = setup(json!({}));
    let [a, b, c, d] = four_nodes(&mut manager).await;

    assert_eq!(coords(&manager, a), (1, 8, 0));
    assert_eq!(coords(&manager, b), (2, 5, 1));
    assert_eq!(coords(&manager, d), (3, 4, 2));
    assert_eq!(coords(&manager, c), (6, 7, 1));

    let e = node(&mut manager, "E", Some(c));
    manager.flush().await.unwrap();
    assert_eq!(coords(&manager, e), (7, 8, 2));
    assert_eq!(coords(&manager, a), (1, 10, 0));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_child_persisted_before_parent_is_deferred() {
    let (mut manager, _) = setup(json!({}));
    let child = manager
        .persist(Record::new("Category").with("id", 20).with("title", "child").with("parent", 10))
        .unwrap();
    let parent = manager
        .persist(Record::new("Category").with("id", 10).with("title", "parent"))
        .unwrap();
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, parent), (1, 4, 0));
    assert_eq!(coords(&manager, child), (2, 3, 1));
}

#[tokio::test]
async fn test_move_subtree_under_sibling() {
    let (mut manager, _) = setup(json!({}));
    let [a, b, c, d] = four_nodes(&mut manager).await;

    let b_id = manager.get(b, "id").unwrap();
    manager.set(c, "parent", b_id).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, a), (1, 8, 0));
    assert_eq!(coords(&manager, b), (2, 7, 1));
    assert_eq!(coords(&manager, d), (3, 4, 2));
    assert_eq!(coords(&manager, c), (5, 6, 2));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_move_under_descendant_is_rejected() {
    let (mut manager, _) = setup(json!({}));
    let [a, _, _, d] = four_nodes(&mut manager).await;
    let before = manager.rows("Category");

    let d_id = manager.get(d, "id").unwrap();
    manager.set(a, "parent", d_id).unwrap();
    let err = manager.flush().await.unwrap_err();

    assert!(matches!(err, BehaviorError::InvalidTree(_)));
    assert_eq!(manager.rows("Category"), before);
}

#[tokio::test]
async fn test_self_parent_is_rejected() {
    let (mut manager, _) = setup(json!({}));
    let [a, ..] = four_nodes(&mut manager).await;

    let a_id = manager.get(a, "id").unwrap();
    manager.set(a, "parent", a_id).unwrap();
    assert!(matches!(
        manager.flush().await,
        Err(BehaviorError::InvalidTree(_))
    ));
}

#[tokio::test]
async fn test_cascade_delete_closes_gap() {
    let (mut manager, _) = setup(json!({}));
    let [a, b, c, _] = four_nodes(&mut manager).await;

    manager.remove(b).unwrap();
    manager.flush().await.unwrap();

    let rows = manager.rows("Category");
    assert_eq!(rows.len(), 2);
    assert_eq!(coords(&manager, a), (1, 4, 0));
    assert_eq!(coords(&manager, c), (2, 3, 1));
    assert_intervals(&rows);
}

#[tokio::test]
async fn test_promote_delete_lifts_children() {
    let (mut manager, _) = setup(json!({ "onDelete": "promote" }));
    let [a, b, c, d] = four_nodes(&mut manager).await;

    manager.remove(b).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(manager.rows("Category").len(), 3);
    assert_eq!(coords(&manager, a), (1, 6, 0));
    assert_eq!(coords(&manager, d), (2, 3, 1));
    assert_eq!(coords(&manager, c), (4, 5, 1));
    assert_eq!(manager.get(d, "parent").unwrap(), manager.get(a, "id").unwrap());
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_explicit_positions() {
    let (mut manager, listener) = setup(json!({}));
    let a = node(&mut manager, "A", None);
    let b = node(&mut manager, "B", Some(a));
    manager.flush().await.unwrap();

    let x = node(&mut manager, "X", None);
    let b_id = manager.get(b, "id").unwrap();
    listener
        .set_node_position(x, NodePosition::PrevSiblingOf(b_id))
        .await;
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, a), (1, 6, 0));
    assert_eq!(coords(&manager, x), (2, 3, 1));
    assert_eq!(coords(&manager, b), (4, 5, 1));
    assert_eq!(manager.get(x, "parent").unwrap(), manager.get(a, "id").unwrap());

    let y = node(&mut manager, "Y", Some(a));
    listener.set_node_position(y, NodePosition::FirstChild).await;
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, y), (2, 3, 1));
    assert_eq!(coords(&manager, x), (4, 5, 1));
    assert_eq!(coords(&manager, b), (6, 7, 1));
    assert_eq!(coords(&manager, a), (1, 8, 0));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_reorder_siblings_without_parent_change() {
    let (mut manager, listener) = setup(json!({}));
    let [a, b, c, d] = four_nodes(&mut manager).await;

    let b_id = manager.get(b, "id").unwrap();
    listener
        .set_node_position(c, NodePosition::PrevSiblingOf(b_id.clone()))
        .await;
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, a), (1, 8, 0));
    assert_eq!(coords(&manager, c), (2, 3, 1));
    assert_eq!(coords(&manager, b), (4, 7, 1));
    assert_eq!(coords(&manager, d), (5, 6, 2));
    assert_eq!(manager.get(c, "parent").unwrap(), manager.get(a, "id").unwrap());
    assert_intervals(&manager.rows("Category"));

    // the consumed position does not leak into a later move
    manager.set(c, "parent", b_id).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, b), (2, 7, 1));
    assert_eq!(coords(&manager, d), (3, 4, 2));
    assert_eq!(coords(&manager, c), (5, 6, 2));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_position_of_removed_node_is_dropped() {
    let (mut manager, listener) = setup(json!({}));
    let [a, b, c, d] = four_nodes(&mut manager).await;

    listener.set_node_position(d, NodePosition::FirstChild).await;
    manager.remove(d).unwrap();
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, a), (1, 6, 0));
    assert_eq!(coords(&manager, b), (2, 3, 1));
    assert_eq!(coords(&manager, c), (4, 5, 1));
    assert_intervals(&manager.rows("Category"));
}

#[tokio::test]
async fn test_multiple_trees_number_independently() {
    let class = category().with_association(AssociationMapping::many_to_one("root", "Category"));
    let (mut manager, listener) =
        setup_with(class, nested(json!({ "rootField": "root" })), Backend::Relational);

    let first = node(&mut manager, "first", None);
    let second = node(&mut manager, "second", None);
    let child = node(&mut manager, "child", Some(second));
    manager.flush().await.unwrap();

    assert_eq!(coords(&manager, first), (1, 2, 0));
    assert_eq!(coords(&manager, second), (1, 4, 0));
    assert_eq!(coords(&manager, child), (2, 3, 1));
    assert_eq!(manager.get(first, "root").unwrap(), manager.get(first, "id").unwrap());
    assert_eq!(manager.get(child, "root").unwrap(), manager.get(second, "id").unwrap());

    let stray = node(&mut manager, "stray", None);
    let second_id = manager.get(second, "id").unwrap();
    listener
        .set_node_position(stray, NodePosition::NextSiblingOf(second_id))
        .await;
    assert!(matches!(
        manager.flush().await,
        Err(BehaviorError::InvalidTree(_))
    ));
}

#[tokio::test]
async fn test_document_backend_is_rejected() {
    let (mut manager, _) = setup_with(category(), nested(json!({})), Backend::Document);
    node(&mut manager, "A", None);

    assert!(matches!(
        manager.flush().await,
        Err(BehaviorError::UnsupportedOperation { .. })
    ));
    assert!(manager.rows("Category").is_empty());
}

#[tokio::test]
async fn test_invalid_configuration_fails_at_registration() {
    let driver = StaticMappingDriver::new().with(
        "Category",
        "tree",
        json!({ "strategy": "nested", "parentField": "parent", "leftField": "lft" }),
    );
    let listener = Arc::new(TreeListener::new(Arc::new(driver), BehaviorConfig::default()));
    let mut manager = MemoryObjectManager::new(Arc::new(EventManager::new().with_subscriber(listener)));

    let err = manager.register_class(category()).unwrap_err();
    assert!(matches!(err, BehaviorError::Configuration { .. }));
}
