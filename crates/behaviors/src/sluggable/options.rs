//! Sluggable configuration and metadata

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::metadata::ExtensionMetadata;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::value::FieldType;

/// Casing applied to a generated slug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlugStyle {
    /// Lowercase words joined by the separator
    #[default]
    Default,
    /// Capitalized words, separators dropped
    Camel,
    Lower,
    Upper,
}

fn default_relative_separator() -> String {
    "-".to_string()
}

fn default_tree_separator() -> String {
    "/".to_string()
}

/// Slug handler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Prefix the slug with the slug of a related object
    Relative {
        relation_field: String,
        relation_slug_field: String,
        #[serde(default = "default_relative_separator")]
        separator: String,
    },
    /// Prefix the slug with the slug of the parent node
    Tree {
        parent_relation_field: String,
        #[serde(default = "default_tree_separator")]
        separator: String,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSlugOptions {
    fields: Vec<String>,
    #[serde(default)]
    style: SlugStyle,
    separator: Option<String>,
    #[serde(default = "default_true")]
    unique: bool,
    unique_base: Option<String>,
    #[serde(default = "default_true")]
    updatable: bool,
    #[serde(default)]
    prefix: String,
    #[serde(default)]
    suffix: String,
    date_format: Option<String>,
    #[serde(default)]
    handlers: Vec<HandlerConfig>,
}

/// Resolved options of one slug field
#[derive(Debug, Clone, PartialEq)]
pub struct SlugOptions {
    /// Field receiving the slug
    pub slug: String,
    /// Source fields, in concatenation order
    pub fields: Vec<String>,
    pub style: SlugStyle,
    pub separator: String,
    pub unique: bool,
    /// Field or association scoping uniqueness
    pub unique_base: Option<String>,
    pub updatable: bool,
    pub prefix: String,
    pub suffix: String,
    /// Format of date sources
    pub date_format: String,
    pub handlers: Vec<HandlerConfig>,
    /// Column length of the slug field
    pub length: Option<usize>,
    pub nullable: bool,
}

impl SlugOptions {
    /// Room left for the generated part once prefix and suffix are added
    pub fn available_length(&self) -> Option<usize> {
        self.length.map(|length| {
            length.saturating_sub(self.prefix.chars().count() + self.suffix.chars().count())
        })
    }
}

/// Sluggable configuration of a class
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SluggableMetadata {
    pub slugs: Vec<SlugOptions>,
}

impl ExtensionMetadata for SluggableMetadata {
    const NAMESPACE: &'static str = "sluggable";

    fn build(
        class: &ClassMetadata,
        raw: Option<&JsonValue>,
        config: &BehaviorConfig,
        _provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let raw: BTreeMap<String, RawSlugOptions> = serde_json::from_value(raw.clone())
            .map_err(|e| BehaviorError::configuration(&class.name, e.to_string()))?;

        let slugs = raw
            .into_iter()
            .map(|(slug, options)| resolve(class, config, slug, options))
            .collect::<BehaviorResult<Vec<_>>>()?;

        Ok(Self { slugs })
    }

    fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}

fn resolve(
    class: &ClassMetadata,
    config: &BehaviorConfig,
    slug: String,
    raw: RawSlugOptions,
) -> BehaviorResult<SlugOptions> {
    let slug_mapping = class.field(&slug).ok_or_else(|| {
        BehaviorError::configuration(&class.name, format!("slug field '{}' does not exist", slug))
    })?;
    if !slug_mapping.field_type.is_string_like() {
        return Err(BehaviorError::configuration(
            &class.name,
            format!(
                "slug field '{}' must be a string, found {}",
                slug, slug_mapping.field_type
            ),
        ));
    }

    if raw.fields.is_empty() {
        return Err(BehaviorError::configuration(
            &class.name,
            format!("slug field '{}' has no source fields", slug),
        ));
    }
    for source in &raw.fields {
        let mapping = class.field(source).ok_or_else(|| {
            BehaviorError::configuration(
                &class.name,
                format!("slug source field '{}' does not exist", source),
            )
        })?;
        let usable = mapping.field_type.is_string_like()
            || mapping.field_type.is_temporal()
            || mapping.field_type == FieldType::Integer;
        if !usable {
            return Err(BehaviorError::configuration(
                &class.name,
                format!(
                    "slug source field '{}' of type {} cannot be used",
                    source, mapping.field_type
                ),
            ));
        }
    }

    if let Some(base) = &raw.unique_base {
        if !class.has_field(base) && !class.is_single_valued_association(base) {
            return Err(BehaviorError::configuration(
                &class.name,
                format!(
                    "unique_base '{}' must be a field or a single valued association",
                    base
                ),
            ));
        }
    }

    for handler in &raw.handlers {
        let relation = match handler {
            HandlerConfig::Relative { relation_field, .. } => relation_field,
            HandlerConfig::Tree {
                parent_relation_field,
                ..
            } => parent_relation_field,
        };
        if !class.is_single_valued_association(relation) {
            return Err(BehaviorError::configuration(
                &class.name,
                format!(
                    "slug handler relation '{}' must be a single valued association",
                    relation
                ),
            ));
        }
    }

    Ok(SlugOptions {
        length: slug_mapping.length,
        nullable: slug_mapping.nullable,
        slug,
        fields: raw.fields,
        style: raw.style,
        separator: raw.separator.unwrap_or_else(|| config.get_slug_separator().clone()),
        unique: raw.unique,
        unique_base: raw.unique_base,
        updatable: raw.updatable,
        prefix: raw.prefix,
        suffix: raw.suffix,
        date_format: raw
            .date_format
            .unwrap_or_else(|| config.get_slug_date_format().clone()),
        handlers: raw.handlers,
    })
}
