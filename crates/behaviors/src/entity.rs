//! Entity field access
//!
//! Behaviors never know the concrete entity types. They read and write
//! properties by name through `Entity`, which each integration implements for
//! its own models. `Record` is the dynamic implementation used for rows loaded
//! without a typed model.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::error::{BehaviorError, BehaviorResult};
use crate::value::FieldValue;

/// Field name -> value, as stored in a persisted row
pub type Row = BTreeMap<String, FieldValue>;

/// Named property access for a managed object
pub trait Entity: Send + Sync + Debug {
    /// Mapped class of this object
    fn class_name(&self) -> &str;

    /// Current value of a property, `None` when the property does not exist
    fn get_field(&self, field: &str) -> Option<FieldValue>;

    /// Assign a property
    fn set_field(&mut self, field: &str, value: FieldValue) -> BehaviorResult<()>;

    /// Every property with its current value
    fn fields(&self) -> Row;
}

/// Dynamically typed entity backed by a field map
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    class: String,
    values: Row,
}

impl Record {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.to_string(),
            values: Row::new(),
        }
    }

    pub fn from_row(class: &str, values: Row) -> Self {
        Self {
            class: class.to_string(),
            values,
        }
    }

    /// Builder-style assignment
    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.values.insert(field.to_string(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }
}

impl Entity for Record {
    fn class_name(&self) -> &str {
        &self.class
    }

    fn get_field(&self, field: &str) -> Option<FieldValue> {
        self.values.get(field).cloned()
    }

    fn set_field(&mut self, field: &str, value: FieldValue) -> BehaviorResult<()> {
        if field.is_empty() {
            return Err(BehaviorError::field_not_found(&self.class, field));
        }
        self.values.insert(field.to_string(), value);
        Ok(())
    }

    fn fields(&self) -> Row {
        self.values.clone()
    }
}
