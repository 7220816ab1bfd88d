//! Object manager contract
//!
//! The persistence engine (unit of work, identity map, query execution) is an
//! external collaborator. This module defines the narrow surface the behaviors
//! need from it. Implementations exist per backend; `memory` ships an
//! in-process one used for orchestration and tests.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::entity::Row;
use crate::error::BehaviorResult;
use crate::mapping::ClassMetadataProvider;
use crate::query::{Criteria, OrderBy, UpdateStatement};
use crate::value::FieldValue;

/// Persistence backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Relational database (ORM)
    Relational,
    /// Document database (ODM)
    Document,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Relational => write!(f, "relational"),
            Backend::Document => write!(f, "document"),
        }
    }
}

/// Handle of an object in the manager's identity map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Field changes of one object since it was last synchronized: field -> (old, new)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    changes: BTreeMap<String, (FieldValue, FieldValue)>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff two field maps; fields missing on one side count as null
    pub fn diff(original: &Row, current: &Row) -> Self {
        let mut changes = BTreeMap::new();
        for (field, new_value) in current {
            let old_value = original.get(field).cloned().unwrap_or_default();
            if &old_value != new_value {
                changes.insert(field.clone(), (old_value, new_value.clone()));
            }
        }
        for (field, old_value) in original {
            if !current.contains_key(field) && !old_value.is_null() {
                changes.insert(field.clone(), (old_value.clone(), FieldValue::Null));
            }
        }
        Self { changes }
    }

    pub fn record(&mut self, field: &str, old: FieldValue, new: FieldValue) {
        self.changes.insert(field.to_string(), (old, new));
    }

    pub fn contains(&self, field: &str) -> bool {
        self.changes.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&(FieldValue, FieldValue)> {
        self.changes.get(field)
    }

    pub fn old_value(&self, field: &str) -> Option<&FieldValue> {
        self.changes.get(field).map(|(old, _)| old)
    }

    pub fn new_value(&self, field: &str) -> Option<&FieldValue> {
        self.changes.get(field).map(|(_, new)| new)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = &String> {
        self.changes.keys()
    }

    /// New values of every changed field
    pub fn new_values(&self) -> Row {
        self.changes
            .iter()
            .map(|(field, (_, new))| (field.clone(), new.clone()))
            .collect()
    }
}

/// Unit of work and query surface used by the behaviors
#[async_trait]
pub trait ObjectManager: ClassMetadataProvider + Send + Sync {
    /// Backend family, fixed for the lifetime of the manager
    fn backend(&self) -> Backend;

    /// Mapped class of a managed object
    fn class_of(&self, object: ObjectId) -> BehaviorResult<String>;

    /// Current in-memory value of a property
    fn get_field(&self, object: ObjectId, field: &str) -> BehaviorResult<FieldValue>;

    /// Assign a property on a managed object
    fn set_field(&mut self, object: ObjectId, field: &str, value: FieldValue)
        -> BehaviorResult<()>;

    /// Record `value` as the persisted state of a property so that it no
    /// longer shows up as a change
    fn set_original_field(
        &mut self,
        object: ObjectId,
        field: &str,
        value: FieldValue,
    ) -> BehaviorResult<()>;

    /// Objects scheduled for insertion in the current flush, in schedule order
    fn scheduled_insertions(&self) -> Vec<ObjectId>;

    /// Objects scheduled for update in the current flush, in schedule order
    fn scheduled_updates(&self) -> Vec<ObjectId>;

    /// Objects scheduled for deletion in the current flush, in schedule order
    fn scheduled_deletions(&self) -> Vec<ObjectId>;

    fn is_scheduled_for_insert(&self, object: ObjectId) -> bool;

    fn is_scheduled_for_delete(&self, object: ObjectId) -> bool;

    /// Change set computed for the current flush
    fn change_set(&self, object: ObjectId) -> ChangeSet;

    /// Re-diff an object after a behavior mutated it post-schedule
    fn recompute_single_object_change_set(&mut self, object: ObjectId) -> BehaviorResult<()>;

    /// Every managed object of a class
    fn managed_objects(&self, class: &str) -> Vec<ObjectId>;

    /// Managed object by identifier, loading it from storage when needed
    async fn load(&mut self, class: &str, id: &FieldValue) -> BehaviorResult<Option<ObjectId>>;

    /// Schedule a managed object for deletion in the current flush
    fn schedule_for_delete(&mut self, object: ObjectId) -> BehaviorResult<()>;

    /// Persisted rows matching the criteria
    async fn select(
        &self,
        class: &str,
        criteria: &Criteria,
        order_by: &[OrderBy],
    ) -> BehaviorResult<Vec<Row>>;

    /// Insert a raw row (closure table entries and similar)
    async fn insert_row(&mut self, class: &str, row: Row) -> BehaviorResult<()>;

    /// Bulk update of persisted rows; managed instances are left untouched
    async fn update(&mut self, class: &str, statement: &UpdateStatement) -> BehaviorResult<u64>;

    /// Bulk delete of persisted rows
    async fn delete(&mut self, class: &str, criteria: &Criteria) -> BehaviorResult<u64>;
}
