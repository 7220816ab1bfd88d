//! Event adapter
//!
//! Facade handed to every listener hook. It normalizes the object manager
//! operations the behaviors use and carries the backend family, selected once
//! when the adapter is built, for the few operations whose semantics differ
//! between relational and document storage.

use std::sync::Arc;

use chrono::Utc;

use crate::entity::Row;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::{Backend, ChangeSet, ObjectId, ObjectManager};
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::query::{Assignment, Criteria, OrderBy, UpdateStatement};
use crate::value::{FieldType, FieldValue};

/// Per-backend facade over an object manager
pub struct EventAdapter<'a> {
    backend: Backend,
    manager: &'a mut dyn ObjectManager,
}

impl<'a> EventAdapter<'a> {
    pub fn new(manager: &'a mut dyn ObjectManager) -> Self {
        Self {
            backend: manager.backend(),
            manager,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn object_manager(&mut self) -> &mut dyn ObjectManager {
        &mut *self.manager
    }

    /// Fail with a capability error unless the backend is relational
    pub fn require_relational(&self, operation: &str) -> BehaviorResult<()> {
        match self.backend {
            Backend::Relational => Ok(()),
            Backend::Document => Err(BehaviorError::unsupported(operation, self.backend)),
        }
    }

    /// Current time in the representation of the destination column
    pub fn get_date_value(&self, field_type: FieldType) -> FieldValue {
        let now = Utc::now();
        match (self.backend, field_type) {
            (_, FieldType::Timestamp) | (_, FieldType::Integer) => FieldValue::Int(now.timestamp()),
            (Backend::Relational, FieldType::Date) => FieldValue::Date(now.date_naive()),
            // document stores have no date-only type
            (Backend::Document, FieldType::Date) => FieldValue::DateTime(now),
            _ => FieldValue::DateTime(now),
        }
    }

    pub fn scheduled_insertions(&self) -> Vec<ObjectId> {
        self.manager.scheduled_insertions()
    }

    pub fn scheduled_updates(&self) -> Vec<ObjectId> {
        self.manager.scheduled_updates()
    }

    pub fn scheduled_deletions(&self) -> Vec<ObjectId> {
        self.manager.scheduled_deletions()
    }

    pub fn is_scheduled_for_insert(&self, object: ObjectId) -> bool {
        self.manager.is_scheduled_for_insert(object)
    }

    pub fn is_scheduled_for_delete(&self, object: ObjectId) -> bool {
        self.manager.is_scheduled_for_delete(object)
    }

    pub fn class_of(&self, object: ObjectId) -> BehaviorResult<String> {
        self.manager.class_of(object)
    }

    pub fn metadata_of(&self, object: ObjectId) -> BehaviorResult<Arc<ClassMetadata>> {
        let class = self.manager.class_of(object)?;
        self.manager.class_metadata(&class)
    }

    pub fn identifier(&self, object: ObjectId) -> BehaviorResult<FieldValue> {
        let meta = self.metadata_of(object)?;
        self.manager.get_field(object, &meta.identifier)
    }

    pub fn get_field(&self, object: ObjectId, field: &str) -> BehaviorResult<FieldValue> {
        self.manager.get_field(object, field)
    }

    /// Integer coordinate of a node; null counts as zero
    pub fn get_int(&self, object: ObjectId, field: &str) -> BehaviorResult<i64> {
        match self.manager.get_field(object, field)? {
            FieldValue::Null => Ok(0),
            value => value.as_i64().ok_or_else(|| {
                BehaviorError::invalid_value(field, format!("expected an integer, got {}", value))
            }),
        }
    }

    pub fn set_field(&mut self, object: ObjectId, field: &str, value: FieldValue) -> BehaviorResult<()> {
        self.manager.set_field(object, field, value)
    }

    /// Assign a property and mark it as already persisted
    pub fn set_synced_field(
        &mut self,
        object: ObjectId,
        field: &str,
        value: FieldValue,
    ) -> BehaviorResult<()> {
        self.manager.set_field(object, field, value.clone())?;
        self.manager.set_original_field(object, field, value)
    }

    pub fn change_set(&self, object: ObjectId) -> ChangeSet {
        self.manager.change_set(object)
    }

    pub fn recompute_single_object_change_set(&mut self, object: ObjectId) -> BehaviorResult<()> {
        self.manager.recompute_single_object_change_set(object)
    }

    pub fn managed_objects(&self, class: &str) -> Vec<ObjectId> {
        self.manager.managed_objects(class)
    }

    pub async fn load(&mut self, class: &str, id: &FieldValue) -> BehaviorResult<Option<ObjectId>> {
        self.manager.load(class, id).await
    }

    /// Load an object that must exist
    pub async fn find(&mut self, class: &str, id: &FieldValue) -> BehaviorResult<ObjectId> {
        self.manager
            .load(class, id)
            .await?
            .ok_or_else(|| BehaviorError::ObjectNotFound(format!("{} {}", class, id)))
    }

    pub fn schedule_for_delete(&mut self, object: ObjectId) -> BehaviorResult<()> {
        self.manager.schedule_for_delete(object)
    }

    pub async fn select(
        &self,
        class: &str,
        criteria: &Criteria,
        order_by: &[OrderBy],
    ) -> BehaviorResult<Vec<Row>> {
        self.manager.select(class, criteria, order_by).await
    }

    pub async fn insert_row(&mut self, class: &str, row: Row) -> BehaviorResult<()> {
        self.manager.insert_row(class, row).await
    }

    pub async fn delete(&mut self, class: &str, criteria: &Criteria) -> BehaviorResult<u64> {
        self.manager.delete(class, criteria).await
    }

    /// Execute a bulk update and mirror the result onto managed instances of
    /// the affected rows, so in-memory objects stay coherent with storage
    pub async fn bulk_update(&mut self, class: &str, statement: &UpdateStatement) -> BehaviorResult<u64> {
        let meta = self.manager.class_metadata(class)?;
        let identifier = meta.identifier.as_str();

        let affected: Vec<FieldValue> = self
            .manager
            .select(class, &statement.criteria, &[])
            .await?
            .into_iter()
            .filter_map(|row| row.get(identifier).cloned())
            .collect();
        if affected.is_empty() {
            return Ok(0);
        }

        let count = self.manager.update(class, statement).await?;

        let fresh = self
            .manager
            .select(class, &Criteria::new().where_in(identifier, affected), &[])
            .await?;
        for object in self.manager.managed_objects(class) {
            let id = self.manager.get_field(object, identifier)?;
            let Some(row) = fresh
                .iter()
                .find(|row| row.get(identifier).map(|v| v.same_as(&id)).unwrap_or(false))
            else {
                continue;
            };
            for assignment in &statement.assignments {
                let value = row.get(&assignment.field).cloned().unwrap_or_default();
                self.set_synced_field(object, &assignment.field, value)?;
            }
        }

        Ok(count)
    }

    /// Update a single row by identifier and mirror it onto its managed instance
    pub async fn update_by_id(
        &mut self,
        class: &str,
        id: &FieldValue,
        assignments: Vec<Assignment>,
    ) -> BehaviorResult<u64> {
        let meta = self.manager.class_metadata(class)?;
        let statement = UpdateStatement {
            criteria: Criteria::new().where_eq(&meta.identifier, id.clone()),
            assignments,
            order_by: Vec::new(),
        };
        self.bulk_update(class, &statement).await
    }

    /// Update a managed object's persisted row and its in-memory fields
    pub async fn update_object(
        &mut self,
        object: ObjectId,
        assignments: Vec<Assignment>,
    ) -> BehaviorResult<()> {
        let class = self.class_of(object)?;
        let id = self.identifier(object)?;
        let synced = assignments.clone();
        if self.update_by_id(&class, &id, assignments).await? > 0 {
            return Ok(());
        }
        // objects without a stored row yet still get their fields
        for assignment in synced {
            let current = self.get_field(object, &assignment.field)?;
            self.set_synced_field(object, &assignment.field, assignment.apply(&current))?;
        }
        Ok(())
    }
}

impl ClassMetadataProvider for EventAdapter<'_> {
    fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>> {
        self.manager.class_metadata(class)
    }
}
