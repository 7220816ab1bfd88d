//! Sluggable behavior
//!
//! Builds URL-safe slugs from source fields on insert and update:
//!
//! 1. source values are joined with the separator
//! 2. the result is transliterated to ASCII and urlized
//! 3. the configured style is applied and handlers decorate the slug
//! 4. the slug is truncated to the column length and made unique
//! 5. prefix and suffix are added and the slug is written back
//!
//! ```json
//! { "slug": { "fields": ["title"], "unique_base": "category", "updatable": false } }
//! ```

pub mod handler;
pub mod options;
pub mod transliterator;
pub mod unique;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::EventAdapter;
use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::metadata::{MappedEventSubscriber, MappingDriver};
use crate::subscriber::{EventSubscriber, LifecycleEvent};
use crate::value::FieldValue;

pub use handler::{RelativeSlugHandler, SlugHandler, TreeSlugHandler};
pub use options::{HandlerConfig, SlugOptions, SlugStyle, SluggableMetadata};
pub use transliterator::{transliterate, urlize};
pub use unique::SlugSnapshot;

use transliterator::trim_separator;
use unique::{resolve_unique_slug, scope_value, truncate_chars};

/// Listener generating slugs during flush
pub struct SluggableListener {
    base: MappedEventSubscriber<SluggableMetadata>,
    snapshot: Mutex<SlugSnapshot>,
}

impl SluggableListener {
    pub fn new(driver: Arc<dyn MappingDriver>, config: BehaviorConfig) -> Self {
        Self {
            base: MappedEventSubscriber::new(driver, config),
            snapshot: Mutex::new(SlugSnapshot::default()),
        }
    }

    pub fn subscriber(&self) -> &MappedEventSubscriber<SluggableMetadata> {
        &self.base
    }

    async fn generate_slugs(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
        is_insert: bool,
    ) -> BehaviorResult<()> {
        let Some((class, metadata)) = self.base.metadata_for(ea, object)? else {
            return Ok(());
        };
        let change_set = ea.change_set(object);
        let mut changed = false;

        for options in &metadata.slugs {
            let current = ea.get_field(object, &options.slug)?;
            let manual = change_set
                .new_value(&options.slug)
                .filter(|value| !value.is_empty())
                .cloned();
            let handlers: Vec<Box<dyn SlugHandler>> =
                options.handlers.iter().map(|config| config.handler()).collect();

            let frozen = !options.updatable && !is_insert && !current.is_empty();
            if frozen && manual.is_none() {
                continue;
            }
            let needs_slug = is_insert
                || current.is_empty()
                || manual.is_some()
                || options.fields.iter().any(|field| change_set.contains(field))
                || handlers.iter().any(|h| h.on_change_decision(&change_set));
            if !needs_slug {
                continue;
            }

            let slug = match &manual {
                Some(value) => {
                    let text = value.to_text(&options.date_format).unwrap_or_default();
                    stylize(&urlize(&text, &options.separator), options)
                }
                None => {
                    let mut slug = stylize(&self.source_text(ea, object, options)?, options);
                    for handler in &handlers {
                        slug = handler.post_slug_build(ea, object, options, slug).await?;
                    }
                    slug
                }
            };

            let slug = match options.available_length() {
                Some(max) => trim_separator(truncate_chars(&slug, max), &options.separator).to_string(),
                None => slug,
            };

            if slug.is_empty() {
                if !options.nullable {
                    return Err(BehaviorError::invalid_value(
                        &options.slug,
                        format!(
                            "unable to build a slug for '{}' from empty source fields",
                            class.name
                        ),
                    ));
                }
                if !current.is_null() {
                    ea.set_field(object, &options.slug, FieldValue::Null)?;
                    changed = true;
                }
                continue;
            }

            let slug = self.make_unique(ea, &class, object, options, slug).await?;
            let stored = format!("{}{}{}", options.prefix, slug, options.suffix);
            debug!("Generated slug '{}' for {} {}", stored, class.name, object);

            if current.as_str() != Some(stored.as_str()) {
                ea.set_field(object, &options.slug, FieldValue::from(stored.as_str()))?;
                changed = true;
            }
            for handler in &handlers {
                handler
                    .on_slug_completion(ea, object, options, &current, &stored)
                    .await?;
            }
        }

        if changed {
            ea.recompute_single_object_change_set(object)?;
        }
        Ok(())
    }

    /// Urlized concatenation of the non-empty source values
    fn source_text(
        &self,
        ea: &EventAdapter<'_>,
        object: ObjectId,
        options: &SlugOptions,
    ) -> BehaviorResult<String> {
        let mut parts = Vec::with_capacity(options.fields.len());
        for field in &options.fields {
            if let Some(text) = ea.get_field(object, field)?.to_text(&options.date_format) {
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
        Ok(urlize(&parts.join(&options.separator), &options.separator))
    }

    async fn make_unique(
        &self,
        ea: &EventAdapter<'_>,
        class: &ClassMetadata,
        object: ObjectId,
        options: &SlugOptions,
        slug: String,
    ) -> BehaviorResult<String> {
        let scope = scope_value(ea, object, options)?;
        let mut snapshot = self.snapshot.lock().await;

        let slug = if options.unique {
            let in_batch = snapshot.taken_by_others(object, &class.name, &options.slug, &scope);
            resolve_unique_slug(ea, class, object, options, &slug, in_batch).await?
        } else {
            slug
        };

        snapshot.record(object, &class.name, &options.slug, scope, &slug);
        Ok(slug)
    }
}

/// Apply the casing style to an urlized slug
fn stylize(slug: &str, options: &SlugOptions) -> String {
    match options.style {
        SlugStyle::Default | SlugStyle::Lower => slug.to_string(),
        SlugStyle::Upper => slug.to_uppercase(),
        SlugStyle::Camel => {
            let words: Vec<&str> = if options.separator.is_empty() {
                vec![slug]
            } else {
                slug.split(options.separator.as_str()).collect()
            };
            words.into_iter().map(capitalize).collect()
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl EventSubscriber for SluggableListener {
    fn name(&self) -> &str {
        "sluggable"
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
        self.snapshot.lock().await.clear();

        for object in ea.scheduled_insertions() {
            self.generate_slugs(ea, object, true).await?;
        }
        for object in ea.scheduled_updates() {
            if ea.is_scheduled_for_delete(object) {
                continue;
            }
            self.generate_slugs(ea, object, false).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(style: SlugStyle, separator: &str) -> SlugOptions {
        SlugOptions {
            slug: "slug".to_string(),
            fields: vec!["title".to_string()],
            style,
            separator: separator.to_string(),
            unique: true,
            unique_base: None,
            updatable: true,
            prefix: String::new(),
            suffix: String::new(),
            date_format: "%Y-%m-%d".to_string(),
            handlers: Vec::new(),
            length: None,
            nullable: false,
        }
    }

    #[test]
    fn test_stylize() {
        let slug = urlize("Hello big World", "-");
        assert_eq!(stylize(&slug, &options(SlugStyle::Default, "-")), "hello-big-world");
        assert_eq!(stylize(&slug, &options(SlugStyle::Upper, "-")), "HELLO-BIG-WORLD");
        assert_eq!(stylize(&slug, &options(SlugStyle::Camel, "-")), "HelloBigWorld");
    }

    #[test]
    fn test_available_length_accounts_for_affixes() {
        let mut options = options(SlugStyle::Default, "-");
        options.length = Some(10);
        options.prefix = "a/".to_string();
        options.suffix = ".html".to_string();
        assert_eq!(options.available_length(), Some(3));
    }
}
