//! Slug uniqueness resolution
//!
//! A candidate collides with an existing slug only on an exact match. The
//! persisted side is read with one prefix query; slugs generated earlier in
//! the same flush are not visible to that query and come from the batch
//! snapshot instead. Numeric suffixes start at 2.

use std::collections::HashSet;

use crate::adapter::EventAdapter;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::mapping::ClassMetadata;
use crate::query::Criteria;
use crate::value::FieldValue;

use super::options::SlugOptions;
use super::transliterator::trim_separator;

/// Slugs generated during the current flush, not yet visible in storage
#[derive(Debug, Default)]
pub struct SlugSnapshot {
    entries: Vec<SnapshotEntry>,
}

#[derive(Debug)]
struct SnapshotEntry {
    object: ObjectId,
    class: String,
    field: String,
    scope: FieldValue,
    slug: String,
}

impl SlugSnapshot {
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the slug an object received, replacing an earlier entry
    pub fn record(&mut self, object: ObjectId, class: &str, field: &str, scope: FieldValue, slug: &str) {
        self.entries
            .retain(|entry| !(entry.object == object && entry.field == field));
        self.entries.push(SnapshotEntry {
            object,
            class: class.to_string(),
            field: field.to_string(),
            scope,
            slug: slug.to_string(),
        });
    }

    /// Slugs of other objects sharing the class, field and uniqueness scope
    pub fn taken_by_others(
        &self,
        object: ObjectId,
        class: &str,
        field: &str,
        scope: &FieldValue,
    ) -> Vec<String> {
        self.entries
            .iter()
            .filter(|entry| {
                entry.object != object
                    && entry.class == class
                    && entry.field == field
                    && entry.scope.same_as(scope)
            })
            .map(|entry| entry.slug.clone())
            .collect()
    }
}

/// Value of the uniqueness scope of an object, null when unscoped
pub fn scope_value(
    ea: &EventAdapter<'_>,
    object: ObjectId,
    options: &SlugOptions,
) -> BehaviorResult<FieldValue> {
    match &options.unique_base {
        Some(field) => ea.get_field(object, field),
        None => Ok(FieldValue::Null),
    }
}

/// Criteria restricting a slug query to the other rows of the same scope
fn scope_criteria(
    ea: &EventAdapter<'_>,
    class: &ClassMetadata,
    object: ObjectId,
    options: &SlugOptions,
    scope: &FieldValue,
) -> BehaviorResult<Criteria> {
    let mut criteria = Criteria::new();
    let id = ea.identifier(object)?;
    if !id.is_null() {
        criteria = criteria.where_ne(&class.identifier, id);
    }
    if let Some(field) = &options.unique_base {
        criteria = criteria.where_eq(field, scope.clone());
    }
    Ok(criteria)
}

/// Generated part of a stored slug, without prefix and suffix
fn core_of<'a>(stored: &'a str, options: &SlugOptions) -> Option<&'a str> {
    stored
        .strip_prefix(options.prefix.as_str())?
        .strip_suffix(options.suffix.as_str())
}

/// Truncate to at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

/// Smallest free variant of `base`: `base`, `base-2`, `base-3`, ...
pub async fn resolve_unique_slug(
    ea: &EventAdapter<'_>,
    class: &ClassMetadata,
    object: ObjectId,
    options: &SlugOptions,
    base: &str,
    in_batch: Vec<String>,
) -> BehaviorResult<String> {
    let scope = scope_value(ea, object, options)?;
    let scoped = scope_criteria(ea, class, object, options, &scope)?;

    let similar = ea
        .select(
            &class.name,
            &scoped
                .clone()
                .where_starts_with(&options.slug, &format!("{}{}", options.prefix, base)),
            &[],
        )
        .await?;

    let mut taken: HashSet<String> = similar
        .iter()
        .filter_map(|row| row.get(&options.slug))
        .filter_map(FieldValue::as_str)
        .filter_map(|stored| core_of(stored, options))
        .map(str::to_string)
        .collect();
    taken.extend(in_batch);

    if !taken.contains(base) {
        return Ok(base.to_string());
    }

    let max = options.available_length();
    let exhausted = || BehaviorError::UniquenessExhausted {
        class: class.name.clone(),
        candidate: base.to_string(),
    };

    let mut n: u64 = 2;
    loop {
        let numbered = format!("{}{}", options.separator, n);
        let candidate = match max {
            Some(max) => {
                let suffix_length = numbered.chars().count();
                if suffix_length >= max {
                    return Err(exhausted());
                }
                let shortened = trim_separator(
                    truncate_chars(base, max - suffix_length),
                    &options.separator,
                );
                if shortened.is_empty() {
                    return Err(exhausted());
                }
                format!("{}{}", shortened, numbered)
            }
            None => format!("{}{}", base, numbered),
        };

        if !taken.contains(&candidate) {
            if candidate.starts_with(base) {
                return Ok(candidate);
            }
            // a shortened base falls outside the prefix query
            let stored = format!("{}{}{}", options.prefix, candidate, options.suffix);
            let exact = ea
                .select(
                    &class.name,
                    &scoped.clone().where_eq(&options.slug, stored),
                    &[],
                )
                .await?;
            if exact.is_empty() {
                return Ok(candidate);
            }
            taken.insert(candidate);
        }
        n += 1;
    }
}
