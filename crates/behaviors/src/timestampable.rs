//! Timestampable behavior
//!
//! Stamps the current time into date fields when an object is created,
//! updated, or when a watched property changes.
//!
//! ```json
//! { "created_at": { "on": "create" },
//!   "published_at": { "on": "change", "field": "status", "value": "published" } }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::adapter::EventAdapter;
use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::metadata::{ExtensionMetadata, MappedEventSubscriber, MappingDriver};
use crate::subscriber::{EventSubscriber, LifecycleEvent};
use crate::value::{FieldType, FieldValue};

/// When a field is stamped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampTrigger {
    Create,
    Update,
    Change,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimestampOptions {
    on: TimestampTrigger,
    field: Option<String>,
    value: Option<JsonValue>,
}

/// Resolved options of one stamped field
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampOptions {
    pub field: String,
    pub field_type: FieldType,
    pub on: TimestampTrigger,
    /// Watched property for `change`
    pub track: Option<String>,
    /// Value the watched property must take, any change when unset
    pub value: Option<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimestampableMetadata {
    pub fields: Vec<TimestampOptions>,
}

impl ExtensionMetadata for TimestampableMetadata {
    const NAMESPACE: &'static str = "timestampable";

    fn build(
        class: &ClassMetadata,
        raw: Option<&JsonValue>,
        _config: &BehaviorConfig,
        _provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let raw: BTreeMap<String, RawTimestampOptions> = serde_json::from_value(raw.clone())
            .map_err(|e| BehaviorError::configuration(&class.name, e.to_string()))?;

        let mut fields = Vec::with_capacity(raw.len());
        for (field, options) in raw {
            let mapping = class.require_field(&field)?;
            if !(mapping.field_type.is_temporal() || mapping.field_type.is_integer()) {
                return Err(BehaviorError::configuration(
                    &class.name,
                    format!(
                        "field '{}' of type {} cannot hold a timestamp",
                        field, mapping.field_type
                    ),
                ));
            }
            match (options.on, &options.field) {
                (TimestampTrigger::Change, None) => {
                    return Err(BehaviorError::configuration(
                        &class.name,
                        format!("field '{}' tracks changes but names no watched field", field),
                    ));
                }
                (TimestampTrigger::Change, Some(track)) if !class.has_property(track) => {
                    return Err(BehaviorError::configuration(
                        &class.name,
                        format!("watched field '{}' does not exist", track),
                    ));
                }
                (TimestampTrigger::Create | TimestampTrigger::Update, Some(_)) => {
                    return Err(BehaviorError::configuration(
                        &class.name,
                        format!("field '{}' may only watch a field with on = change", field),
                    ));
                }
                _ => {}
            }
            fields.push(TimestampOptions {
                field,
                field_type: mapping.field_type,
                on: options.on,
                track: options.field,
                value: options.value.as_ref().map(FieldValue::from_json),
            });
        }
        Ok(Self { fields })
    }

    fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Listener stamping date fields during flush
pub struct TimestampableListener {
    base: MappedEventSubscriber<TimestampableMetadata>,
}

impl TimestampableListener {
    pub fn new(driver: Arc<dyn MappingDriver>, config: BehaviorConfig) -> Self {
        Self {
            base: MappedEventSubscriber::new(driver, config),
        }
    }

    pub fn subscriber(&self) -> &MappedEventSubscriber<TimestampableMetadata> {
        &self.base
    }

    fn stamp(&self, ea: &mut EventAdapter<'_>, object: ObjectId, is_insert: bool) -> BehaviorResult<()> {
        let Some((class, metadata)) = self.base.metadata_for(ea, object)? else {
            return Ok(());
        };
        let change_set = ea.change_set(object);
        let mut stamped = false;

        for options in &metadata.fields {
            let due = if is_insert {
                match options.on {
                    TimestampTrigger::Create | TimestampTrigger::Update => {
                        ea.get_field(object, &options.field)?.is_null()
                    }
                    TimestampTrigger::Change => false,
                }
            } else {
                match options.on {
                    TimestampTrigger::Create => false,
                    // a manual assignment wins
                    TimestampTrigger::Update => !change_set.contains(&options.field),
                    TimestampTrigger::Change => {
                        let track = options.track.as_deref().unwrap_or_default();
                        match (change_set.new_value(track), &options.value) {
                            (Some(new), Some(expected)) => new.same_as(expected),
                            (Some(_), None) => true,
                            (None, _) => false,
                        }
                    }
                }
            };
            if !due {
                continue;
            }
            let now = ea.get_date_value(options.field_type);
            debug!("Stamped {}.{} of {}", class.name, options.field, object);
            ea.set_field(object, &options.field, now)?;
            stamped = true;
        }

        if stamped {
            ea.recompute_single_object_change_set(object)?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventSubscriber for TimestampableListener {
    fn name(&self) -> &str {
        "timestampable"
    }

    fn subscribed_events(&self) -> Vec<LifecycleEvent> {
        vec![LifecycleEvent::LoadClassMetadata, LifecycleEvent::OnFlush]
    }

    fn load_class_metadata(
        &self,
        class: &ClassMetadata,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<()> {
        self.base.load_metadata(class, provider).map(|_| ())
    }

    async fn on_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        for object in ea.scheduled_insertions() {
            self.stamp(ea, object, true)?;
        }
        for object in ea.scheduled_updates() {
            if ea.is_scheduled_for_delete(object) {
                continue;
            }
            self.stamp(ea, object, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::FieldMapping;
    use serde_json::json;

    struct NoClasses;

    impl ClassMetadataProvider for NoClasses {
        fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>> {
            Err(BehaviorError::configuration(class, "unknown class"))
        }
    }

    fn article() -> ClassMetadata {
        ClassMetadata::new("Article")
            .with_field(FieldMapping::string("title", 64))
            .with_field(FieldMapping::string("status", 16))
            .with_field(FieldMapping::new("created_at", FieldType::DateTime).nullable())
            .with_field(FieldMapping::new("published_at", FieldType::DateTime).nullable())
            .with_field(FieldMapping::new("touched", FieldType::Timestamp).nullable())
    }

    fn build(raw: JsonValue) -> BehaviorResult<TimestampableMetadata> {
        TimestampableMetadata::build(&article(), Some(&raw), &BehaviorConfig::default(), &NoClasses)
    }

    #[test]
    fn test_build_timestamp_options() {
        let metadata = build(json!({
            "created_at": { "on": "create" },
            "published_at": { "on": "change", "field": "status", "value": "published" },
            "touched": { "on": "update" }
        }))
        .unwrap();

        assert_eq!(metadata.fields.len(), 3);
        let published = metadata
            .fields
            .iter()
            .find(|options| options.field == "published_at")
            .unwrap();
        assert_eq!(published.on, TimestampTrigger::Change);
        assert_eq!(published.track.as_deref(), Some("status"));
        assert_eq!(published.value, Some(FieldValue::from("published")));
    }

    #[test]
    fn test_reject_invalid_timestamp_options() {
        assert!(build(json!({ "title": { "on": "create" } })).is_err());
        assert!(build(json!({ "created_at": { "on": "change" } })).is_err());
        assert!(build(json!({ "created_at": { "on": "change", "field": "missing" } })).is_err());
        assert!(build(json!({ "created_at": { "on": "create", "field": "status" } })).is_err());
        assert!(build(json!({ "created_at": { "on": "sometimes" } })).is_err());
    }
}
