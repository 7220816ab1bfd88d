//! Class mapping descriptors
//!
//! The object manager owns the persistence mapping of every class. Behaviors
//! only read it: which fields exist, their types and lengths, which
//! properties are associations, and what the identifier is.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{BehaviorError, BehaviorResult};
use crate::value::FieldType;

/// Mapping of a single persisted field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub field_type: FieldType,
    /// Maximum length for string columns
    pub length: Option<usize>,
    pub nullable: bool,
    pub unique: bool,
}

impl FieldMapping {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            length: None,
            nullable: false,
            unique: false,
        }
    }

    pub fn string(name: &str, length: usize) -> Self {
        Self::new(name, FieldType::String).with_length(length)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldType::Integer)
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// Mapping of an association to another class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationMapping {
    pub name: String,
    pub target_class: String,
    /// True for many-to-one / one-to-one associations
    pub single_valued: bool,
}

impl AssociationMapping {
    pub fn many_to_one(name: &str, target_class: &str) -> Self {
        Self {
            name: name.to_string(),
            target_class: target_class.to_string(),
            single_valued: true,
        }
    }

    pub fn one_to_many(name: &str, target_class: &str) -> Self {
        Self {
            name: name.to_string(),
            target_class: target_class.to_string(),
            single_valued: false,
        }
    }
}

/// Persistence mapping of a class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetadata {
    pub name: String,
    pub identifier: String,
    pub fields: Vec<FieldMapping>,
    pub associations: Vec<AssociationMapping>,
}

impl ClassMetadata {
    /// New class mapping with an integer `id` identifier
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: "id".to_string(),
            fields: vec![FieldMapping::integer("id")],
            associations: Vec::new(),
        }
    }

    /// Replace the identifier field
    pub fn with_identifier(mut self, field: FieldMapping) -> Self {
        let previous = std::mem::take(&mut self.identifier);
        self.fields.retain(|f| f.name != previous);
        self.identifier = field.name.clone();
        self.fields.insert(0, field);
        self
    }

    pub fn with_field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_association(mut self, association: AssociationMapping) -> Self {
        self.associations.push(association);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationMapping> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.association(name).is_some()
    }

    pub fn is_single_valued_association(&self, name: &str) -> bool {
        self.association(name)
            .map(|a| a.single_valued)
            .unwrap_or(false)
    }

    /// Field or association
    pub fn has_property(&self, name: &str) -> bool {
        self.has_field(name) || self.has_association(name)
    }

    /// All property names: identifier and fields first, then associations
    pub fn property_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .map(|f| f.name.clone())
            .chain(self.associations.iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Field mapping or a configuration error naming the missing field
    pub fn require_field(&self, name: &str) -> BehaviorResult<&FieldMapping> {
        self.field(name).ok_or_else(|| {
            BehaviorError::configuration(
                &self.name,
                format!("field '{}' is not mapped", name),
            )
        })
    }
}

/// Lookup of class mappings, implemented by every object manager
pub trait ClassMetadataProvider {
    fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>>;
}
