//! In-memory object manager
//!
//! Identity map, scheduling queues and row tables held in process memory.
//! `flush` drives the lifecycle events through the registered subscribers the
//! same way a database backed manager does, which makes it the harness for
//! exercising behaviors without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::adapter::EventAdapter;
use crate::entity::{Entity, Record, Row};
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::{Backend, ChangeSet, ObjectId, ObjectManager};
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::query::{Criteria, OrderBy, UpdateStatement};
use crate::subscriber::EventManager;
use crate::value::{FieldType, FieldValue};

#[derive(Debug)]
struct ManagedObject {
    entity: Box<dyn Entity>,
    /// Last persisted state
    original: Row,
    persisted: bool,
}

/// State restored when a flush fails
struct FlushSnapshot {
    tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
    objects: BTreeMap<ObjectId, (Row, Row, bool)>,
    insertions: Vec<ObjectId>,
    updates: Vec<ObjectId>,
    deletions: Vec<ObjectId>,
}

/// Object manager keeping every table in memory
pub struct MemoryObjectManager {
    backend: Backend,
    events: Arc<EventManager>,
    classes: HashMap<String, Arc<ClassMetadata>>,
    objects: BTreeMap<ObjectId, ManagedObject>,
    next_object: u64,
    tables: HashMap<String, Vec<Row>>,
    sequences: HashMap<String, i64>,
    insertions: Vec<ObjectId>,
    updates: Vec<ObjectId>,
    deletions: Vec<ObjectId>,
    change_sets: HashMap<ObjectId, ChangeSet>,
}

impl MemoryObjectManager {
    /// Relational manager dispatching to `events`
    pub fn new(events: Arc<EventManager>) -> Self {
        Self::with_backend(events, Backend::Relational)
    }

    pub fn with_backend(events: Arc<EventManager>, backend: Backend) -> Self {
        Self {
            backend,
            events,
            classes: HashMap::new(),
            objects: BTreeMap::new(),
            next_object: 1,
            tables: HashMap::new(),
            sequences: HashMap::new(),
            insertions: Vec::new(),
            updates: Vec::new(),
            deletions: Vec::new(),
            change_sets: HashMap::new(),
        }
    }

    /// Register a class mapping; listeners build their metadata here and a
    /// configuration error leaves the class unregistered
    pub fn register_class(&mut self, class: ClassMetadata) -> BehaviorResult<()> {
        let name = class.name.clone();
        let class = Arc::new(class);
        self.classes.insert(name.clone(), class.clone());

        let events = self.events.clone();
        if let Err(err) = events.dispatch_load_class_metadata(&class, self) {
            self.classes.remove(&name);
            return Err(err);
        }
        self.tables.entry(name.clone()).or_default();
        debug!("Registered class '{}'", name);
        Ok(())
    }

    /// Manage a new entity and schedule it for insertion
    pub fn persist<E: Entity + 'static>(&mut self, entity: E) -> BehaviorResult<ObjectId> {
        let class = self.class_metadata(entity.class_name())?;
        let mut entity: Box<dyn Entity> = Box::new(entity);
        for property in class.property_names() {
            if entity.get_field(&property).is_none() {
                entity.set_field(&property, FieldValue::Null)?;
            }
        }
        if entity
            .get_field(&class.identifier)
            .map(|id| id.is_null())
            .unwrap_or(true)
        {
            let id = self.next_identifier(&class)?;
            entity.set_field(&class.identifier, id)?;
        }

        let object = ObjectId(self.next_object);
        self.next_object += 1;
        self.objects.insert(
            object,
            ManagedObject {
                entity,
                original: Row::new(),
                persisted: false,
            },
        );
        self.insertions.push(object);
        debug!("Scheduled {} {} for insertion", class.name, object);
        Ok(object)
    }

    /// Current value of a property
    pub fn get(&self, object: ObjectId, field: &str) -> BehaviorResult<FieldValue> {
        self.get_field(object, field)
    }

    /// Assign a property; the change is picked up by the next flush
    pub fn set(&mut self, object: ObjectId, field: &str, value: impl Into<FieldValue>) -> BehaviorResult<()> {
        self.set_field(object, field, value.into())
    }

    /// Schedule a managed object for removal; objects never flushed are
    /// simply forgotten
    pub fn remove(&mut self, object: ObjectId) -> BehaviorResult<()> {
        if self.insertions.contains(&object) {
            self.insertions.retain(|o| *o != object);
            self.objects.remove(&object);
            return Ok(());
        }
        self.schedule_for_delete(object)
    }

    /// Managed object with the given identifier, without touching storage
    pub fn find_managed(&self, class: &str, id: &FieldValue) -> Option<ObjectId> {
        let identifier = &self.classes.get(class)?.identifier;
        self.objects.iter().find_map(|(object, managed)| {
            (managed.entity.class_name() == class
                && managed
                    .entity
                    .get_field(identifier)
                    .map(|value| value.same_as(id))
                    .unwrap_or(false))
            .then_some(*object)
        })
    }

    /// Persisted rows of a class, in insertion order
    pub fn rows(&self, class: &str) -> Vec<Row> {
        self.tables.get(class).cloned().unwrap_or_default()
    }

    /// Detach every managed object; pending work is discarded
    pub fn clear(&mut self) {
        self.objects.clear();
        self.insertions.clear();
        self.updates.clear();
        self.deletions.clear();
        self.change_sets.clear();
    }

    /// Write every scheduled change, dispatching the lifecycle events.
    ///
    /// On error the tables and managed objects return to their state before
    /// the flush and the scheduled work is kept for a retry.
    pub async fn flush(&mut self) -> BehaviorResult<()> {
        let snapshot = self.snapshot();
        match self.run_flush().await {
            Ok(()) => {
                self.finish_flush();
                Ok(())
            }
            Err(err) => {
                warn!("Flush failed, rolling back: {}", err);
                self.restore(snapshot)?;
                Err(err)
            }
        }
    }

    async fn run_flush(&mut self) -> BehaviorResult<()> {
        self.compute_change_sets();
        debug!(
            "Flushing {} insertions, {} updates, {} deletions",
            self.insertions.len(),
            self.updates.len(),
            self.deletions.len()
        );

        let events = self.events.clone();
        events.dispatch_on_flush(&mut EventAdapter::new(self)).await?;

        for object in self.insertions.clone() {
            if self.deletions.contains(&object) {
                continue;
            }
            self.write_insert(object)?;
            events
                .dispatch_post_persist(&mut EventAdapter::new(self), object)
                .await?;
        }

        let mut index = 0;
        while index < self.updates.len() {
            let object = self.updates[index];
            index += 1;
            if self.deletions.contains(&object) {
                continue;
            }
            self.write_update(object)?;
            events
                .dispatch_post_update(&mut EventAdapter::new(self), object)
                .await?;
        }

        // listeners may schedule more deletions while these run
        let mut index = 0;
        while index < self.deletions.len() {
            let object = self.deletions[index];
            index += 1;
            self.write_delete(object)?;
            events
                .dispatch_post_remove(&mut EventAdapter::new(self), object)
                .await?;
        }

        events.dispatch_post_flush(&mut EventAdapter::new(self)).await
    }

    fn snapshot(&self) -> FlushSnapshot {
        FlushSnapshot {
            tables: self.tables.clone(),
            sequences: self.sequences.clone(),
            objects: self
                .objects
                .iter()
                .map(|(object, managed)| {
                    (
                        *object,
                        (managed.entity.fields(), managed.original.clone(), managed.persisted),
                    )
                })
                .collect(),
            insertions: self.insertions.clone(),
            updates: self.updates.clone(),
            deletions: self.deletions.clone(),
        }
    }

    fn restore(&mut self, snapshot: FlushSnapshot) -> BehaviorResult<()> {
        self.tables = snapshot.tables;
        self.sequences = snapshot.sequences;
        self.objects
            .retain(|object, _| snapshot.objects.contains_key(object));
        for (object, (fields, original, persisted)) in snapshot.objects {
            if let Some(managed) = self.objects.get_mut(&object) {
                for (field, value) in fields {
                    managed.entity.set_field(&field, value)?;
                }
                managed.original = original;
                managed.persisted = persisted;
            }
        }
        self.insertions = snapshot.insertions;
        self.updates = snapshot.updates;
        self.deletions = snapshot.deletions;
        self.change_sets.clear();
        Ok(())
    }

    fn finish_flush(&mut self) {
        for object in std::mem::take(&mut self.deletions) {
            self.objects.remove(&object);
        }
        self.insertions.clear();
        self.updates.clear();
        self.change_sets.clear();
    }

    /// Diff every managed object and schedule the dirty ones for update
    fn compute_change_sets(&mut self) {
        self.change_sets.clear();
        let objects: Vec<ObjectId> = self.objects.keys().copied().collect();
        for object in objects {
            if self.deletions.contains(&object) {
                continue;
            }
            let change_set = self.diff(object);
            if self.insertions.contains(&object) {
                self.change_sets.insert(object, change_set);
            } else if !change_set.is_empty() {
                if !self.updates.contains(&object) {
                    self.updates.push(object);
                }
                self.change_sets.insert(object, change_set);
            }
        }
    }

    fn diff(&self, object: ObjectId) -> ChangeSet {
        match self.objects.get(&object) {
            Some(managed) if managed.persisted => {
                ChangeSet::diff(&managed.original, &managed.entity.fields())
            }
            Some(managed) => ChangeSet::diff(&Row::new(), &managed.entity.fields()),
            None => ChangeSet::new(),
        }
    }

    fn managed(&self, object: ObjectId) -> BehaviorResult<&ManagedObject> {
        self.objects
            .get(&object)
            .ok_or_else(|| BehaviorError::ObjectNotFound(object.to_string()))
    }

    fn managed_mut(&mut self, object: ObjectId) -> BehaviorResult<&mut ManagedObject> {
        self.objects
            .get_mut(&object)
            .ok_or_else(|| BehaviorError::ObjectNotFound(object.to_string()))
    }

    fn table_mut(&mut self, class: &str) -> BehaviorResult<&mut Vec<Row>> {
        self.tables
            .get_mut(class)
            .ok_or_else(|| BehaviorError::Backend(format!("unknown table '{}'", class)))
    }

    fn next_identifier(&mut self, class: &ClassMetadata) -> BehaviorResult<FieldValue> {
        let mapping = class.require_field(&class.identifier)?;
        match mapping.field_type {
            FieldType::Integer => {
                let sequence = self.sequences.entry(class.name.clone()).or_insert(0);
                *sequence += 1;
                Ok(FieldValue::Int(*sequence))
            }
            FieldType::Uuid => Ok(FieldValue::Uuid(Uuid::new_v4())),
            FieldType::String | FieldType::Text => Ok(FieldValue::String(Uuid::new_v4().to_string())),
            other => Err(BehaviorError::configuration(
                &class.name,
                format!("cannot generate identifiers of type {}", other),
            )),
        }
    }

    fn identifier_of(&self, object: ObjectId) -> BehaviorResult<(Arc<ClassMetadata>, FieldValue)> {
        let managed = self.managed(object)?;
        let class = self.class_metadata(managed.entity.class_name())?;
        let id = managed
            .entity
            .get_field(&class.identifier)
            .unwrap_or_default();
        Ok((class, id))
    }

    fn write_insert(&mut self, object: ObjectId) -> BehaviorResult<()> {
        let (class, _) = self.identifier_of(object)?;
        let managed = self.managed_mut(object)?;
        let row = managed.entity.fields();
        managed.original = row.clone();
        managed.persisted = true;
        self.table_mut(&class.name)?.push(row);
        Ok(())
    }

    fn write_update(&mut self, object: ObjectId) -> BehaviorResult<()> {
        let (class, id) = self.identifier_of(object)?;
        let changes = self.diff(object).new_values();
        if changes.is_empty() {
            return Ok(());
        }

        let identifier = class.identifier.clone();
        let table = self.table_mut(&class.name)?;
        let row = table
            .iter_mut()
            .find(|row| row.get(&identifier).map(|v| v.same_as(&id)).unwrap_or(false))
            .ok_or_else(|| BehaviorError::ObjectNotFound(format!("{} {}", class.name, id)))?;
        for (field, value) in &changes {
            row.insert(field.clone(), value.clone());
        }

        let managed = self.managed_mut(object)?;
        managed.original.extend(changes);
        Ok(())
    }

    fn write_delete(&mut self, object: ObjectId) -> BehaviorResult<()> {
        let (class, id) = self.identifier_of(object)?;
        let identifier = class.identifier.clone();
        self.table_mut(&class.name)?
            .retain(|row| !row.get(&identifier).map(|v| v.same_as(&id)).unwrap_or(false));
        self.managed_mut(object)?.persisted = false;
        Ok(())
    }
}

impl ClassMetadataProvider for MemoryObjectManager {
    fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>> {
        self.classes
            .get(class)
            .cloned()
            .ok_or_else(|| BehaviorError::ObjectNotFound(format!("class '{}'", class)))
    }
}

#[async_trait]
impl ObjectManager for MemoryObjectManager {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn class_of(&self, object: ObjectId) -> BehaviorResult<String> {
        Ok(self.managed(object)?.entity.class_name().to_string())
    }

    fn get_field(&self, object: ObjectId, field: &str) -> BehaviorResult<FieldValue> {
        let managed = self.managed(object)?;
        match managed.entity.get_field(field) {
            Some(value) => Ok(value),
            None => {
                let class = self.class_metadata(managed.entity.class_name())?;
                if class.has_property(field) {
                    Ok(FieldValue::Null)
                } else {
                    Err(BehaviorError::field_not_found(&class.name, field))
                }
            }
        }
    }

    fn set_field(&mut self, object: ObjectId, field: &str, value: FieldValue) -> BehaviorResult<()> {
        let class = self.class_metadata(&self.class_of(object)?)?;
        if !class.has_property(field) {
            return Err(BehaviorError::field_not_found(&class.name, field));
        }
        self.managed_mut(object)?.entity.set_field(field, value)
    }

    fn set_original_field(
        &mut self,
        object: ObjectId,
        field: &str,
        value: FieldValue,
    ) -> BehaviorResult<()> {
        self.managed_mut(object)?
            .original
            .insert(field.to_string(), value);
        Ok(())
    }

    fn scheduled_insertions(&self) -> Vec<ObjectId> {
        self.insertions.clone()
    }

    fn scheduled_updates(&self) -> Vec<ObjectId> {
        self.updates.clone()
    }

    fn scheduled_deletions(&self) -> Vec<ObjectId> {
        self.deletions.clone()
    }

    fn is_scheduled_for_insert(&self, object: ObjectId) -> bool {
        self.insertions.contains(&object)
    }

    fn is_scheduled_for_delete(&self, object: ObjectId) -> bool {
        self.deletions.contains(&object)
    }

    fn change_set(&self, object: ObjectId) -> ChangeSet {
        self.change_sets
            .get(&object)
            .cloned()
            .unwrap_or_else(|| self.diff(object))
    }

    fn recompute_single_object_change_set(&mut self, object: ObjectId) -> BehaviorResult<()> {
        let persisted = self.managed(object)?.persisted;
        let change_set = self.diff(object);
        if persisted
            && !change_set.is_empty()
            && !self.insertions.contains(&object)
            && !self.deletions.contains(&object)
            && !self.updates.contains(&object)
        {
            self.updates.push(object);
        }
        self.change_sets.insert(object, change_set);
        Ok(())
    }

    fn managed_objects(&self, class: &str) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|(_, managed)| managed.entity.class_name() == class)
            .map(|(object, _)| *object)
            .collect()
    }

    async fn load(&mut self, class: &str, id: &FieldValue) -> BehaviorResult<Option<ObjectId>> {
        if let Some(object) = self.find_managed(class, id) {
            return Ok(Some(object));
        }
        let meta = self.class_metadata(class)?;
        let row = self
            .tables
            .get(class)
            .and_then(|rows| {
                rows.iter().find(|row| {
                    row.get(&meta.identifier)
                        .map(|value| value.same_as(id))
                        .unwrap_or(false)
                })
            })
            .cloned();
        let Some(row) = row else {
            return Ok(None);
        };

        let object = ObjectId(self.next_object);
        self.next_object += 1;
        self.objects.insert(
            object,
            ManagedObject {
                entity: Box::new(Record::from_row(class, row.clone())),
                original: row,
                persisted: true,
            },
        );
        Ok(Some(object))
    }

    fn schedule_for_delete(&mut self, object: ObjectId) -> BehaviorResult<()> {
        self.managed(object)?;
        if !self.deletions.contains(&object) {
            self.deletions.push(object);
        }
        Ok(())
    }

    async fn select(
        &self,
        class: &str,
        criteria: &Criteria,
        order_by: &[OrderBy],
    ) -> BehaviorResult<Vec<Row>> {
        let rows = self
            .tables
            .get(class)
            .ok_or_else(|| BehaviorError::Backend(format!("unknown table '{}'", class)))?;
        let mut matching: Vec<Row> = rows
            .iter()
            .filter(|row| criteria.matches_row(row))
            .cloned()
            .collect();
        matching.sort_by(|a, b| OrderBy::compare_rows(order_by, a, b));
        Ok(matching)
    }

    async fn insert_row(&mut self, class: &str, mut row: Row) -> BehaviorResult<()> {
        let meta = self.class_metadata(class)?;
        if row
            .get(&meta.identifier)
            .map(FieldValue::is_null)
            .unwrap_or(true)
        {
            let id = self.next_identifier(&meta)?;
            row.insert(meta.identifier.clone(), id);
        }
        self.table_mut(class)?.push(row);
        Ok(())
    }

    async fn update(&mut self, class: &str, statement: &UpdateStatement) -> BehaviorResult<u64> {
        let mut count = 0;
        for row in self.table_mut(class)?.iter_mut() {
            if statement.criteria.matches_row(row) {
                statement.apply_to(row);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn delete(&mut self, class: &str, criteria: &Criteria) -> BehaviorResult<u64> {
        let table = self.table_mut(class)?;
        let before = table.len();
        table.retain(|row| !criteria.matches_row(row));
        Ok((before - table.len()) as u64)
    }
}
