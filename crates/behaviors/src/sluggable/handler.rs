//! Slug handlers
//!
//! Handlers decorate a generated slug with the slug of a related object and
//! react once the slug is final.

use async_trait::async_trait;
use tracing::debug;

use crate::adapter::EventAdapter;
use crate::error::BehaviorResult;
use crate::manager::{ChangeSet, ObjectId};
use crate::query::{Assignment, Criteria};
use crate::value::FieldValue;

use super::options::{HandlerConfig, SlugOptions};

#[async_trait]
pub trait SlugHandler: Send + Sync {
    /// Whether a change outside the source fields requires a new slug
    fn on_change_decision(&self, change_set: &ChangeSet) -> bool;

    /// Decorate the urlized slug before uniqueness is resolved
    async fn post_slug_build(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
        options: &SlugOptions,
        slug: String,
    ) -> BehaviorResult<String>;

    /// Called with the previous and the final slug of an object
    async fn on_slug_completion(
        &self,
        _ea: &mut EventAdapter<'_>,
        _object: ObjectId,
        _options: &SlugOptions,
        _previous: &FieldValue,
        _slug: &str,
    ) -> BehaviorResult<()> {
        Ok(())
    }
}

impl HandlerConfig {
    pub fn handler(&self) -> Box<dyn SlugHandler> {
        match self {
            HandlerConfig::Relative {
                relation_field,
                relation_slug_field,
                separator,
            } => Box::new(RelativeSlugHandler {
                relation_field: relation_field.clone(),
                relation_slug_field: relation_slug_field.clone(),
                separator: separator.clone(),
            }),
            HandlerConfig::Tree {
                parent_relation_field,
                separator,
            } => Box::new(TreeSlugHandler {
                parent_relation_field: parent_relation_field.clone(),
                separator: separator.clone(),
            }),
        }
    }
}

/// Slug of the object referenced by a single valued association
async fn related_slug(
    ea: &mut EventAdapter<'_>,
    object: ObjectId,
    relation: &str,
    slug_field: &str,
) -> BehaviorResult<Option<String>> {
    let related_id = ea.get_field(object, relation)?;
    if related_id.is_null() {
        return Ok(None);
    }
    let class = ea.metadata_of(object)?;
    let Some(association) = class.association(relation) else {
        return Ok(None);
    };
    let target = association.target_class.clone();
    let Some(related) = ea.load(&target, &related_id).await? else {
        return Ok(None);
    };
    let slug = ea.get_field(related, slug_field)?;
    Ok(slug.as_str().filter(|s| !s.is_empty()).map(str::to_string))
}

/// `<related slug><separator><slug>`
pub struct RelativeSlugHandler {
    relation_field: String,
    relation_slug_field: String,
    separator: String,
}

#[async_trait]
impl SlugHandler for RelativeSlugHandler {
    fn on_change_decision(&self, change_set: &ChangeSet) -> bool {
        change_set.contains(&self.relation_field)
    }

    async fn post_slug_build(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
        _options: &SlugOptions,
        slug: String,
    ) -> BehaviorResult<String> {
        match related_slug(ea, object, &self.relation_field, &self.relation_slug_field).await? {
            Some(prefix) => Ok(format!("{}{}{}", prefix, self.separator, slug)),
            None => Ok(slug),
        }
    }
}

/// `<parent slug>/<slug>`, rewriting descendants when a node's slug changes
pub struct TreeSlugHandler {
    parent_relation_field: String,
    separator: String,
}

#[async_trait]
impl SlugHandler for TreeSlugHandler {
    fn on_change_decision(&self, change_set: &ChangeSet) -> bool {
        change_set.contains(&self.parent_relation_field)
    }

    async fn post_slug_build(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
        options: &SlugOptions,
        slug: String,
    ) -> BehaviorResult<String> {
        match related_slug(ea, object, &self.parent_relation_field, &options.slug).await? {
            Some(prefix) => Ok(format!("{}{}{}", prefix, self.separator, slug)),
            None => Ok(slug),
        }
    }

    async fn on_slug_completion(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
        options: &SlugOptions,
        previous: &FieldValue,
        slug: &str,
    ) -> BehaviorResult<()> {
        let Some(previous) = previous.as_str().filter(|s| !s.is_empty()) else {
            return Ok(());
        };
        if previous == slug || ea.is_scheduled_for_insert(object) {
            return Ok(());
        }

        let class = ea.metadata_of(object)?;
        let old_prefix = format!("{}{}", previous, self.separator);
        let descendants = ea
            .select(
                &class.name,
                &Criteria::new().where_starts_with(&options.slug, &old_prefix),
                &[],
            )
            .await?;

        for row in descendants {
            let Some(id) = row.get(&class.identifier).cloned() else {
                continue;
            };
            let Some(rest) = row
                .get(&options.slug)
                .and_then(FieldValue::as_str)
                .and_then(|current| current.strip_prefix(&old_prefix))
            else {
                continue;
            };
            let renamed = format!("{}{}{}", slug, self.separator, rest);
            debug!("Renaming descendant slug of '{}' to '{}'", class.name, renamed);
            ea.update_by_id(&class.name, &id, vec![Assignment::set(&options.slug, renamed)])
                .await?;
        }
        Ok(())
    }
}
