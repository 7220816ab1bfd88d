//! Tree configuration and metadata

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::BehaviorConfig;
use crate::error::{BehaviorError, BehaviorResult};
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::metadata::ExtensionMetadata;
use crate::value::FieldType;

/// Storage strategy of a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
    Nested,
    Closure,
    MaterializedPath,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Nested => write!(f, "nested set"),
            StrategyKind::Closure => write!(f, "closure table"),
            StrategyKind::MaterializedPath => write!(f, "materialized path"),
        }
    }
}

/// What happens to the children of a removed nested set node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnDelete {
    /// Remove the whole subtree
    #[default]
    Cascade,
    /// Attach the children to the removed node's parent
    Promote,
}

fn default_ancestor() -> String {
    "ancestor".to_string()
}

fn default_descendant() -> String {
    "descendant".to_string()
}

fn default_depth() -> String {
    "depth".to_string()
}

/// Closure table class and its columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClosureOptions {
    pub class: String,
    #[serde(default = "default_ancestor")]
    pub ancestor: String,
    #[serde(default = "default_descendant")]
    pub descendant: String,
    #[serde(default = "default_depth")]
    pub depth: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTreeOptions {
    strategy: StrategyKind,
    parent_field: String,
    left_field: Option<String>,
    right_field: Option<String>,
    level_field: Option<String>,
    root_field: Option<String>,
    path_field: Option<String>,
    path_source: Option<String>,
    path_separator: Option<String>,
    path_append_id: Option<bool>,
    path_date_format: Option<String>,
    #[serde(default)]
    path_starts_with_separator: bool,
    #[serde(default)]
    path_ends_with_separator: bool,
    lock_time_field: Option<String>,
    #[serde(default)]
    activate_locking: bool,
    /// Seconds
    locking_timeout: Option<u64>,
    closure: Option<ClosureOptions>,
    #[serde(default)]
    on_delete: OnDelete,
}

/// Materialized path settings
#[derive(Debug, Clone, PartialEq)]
pub struct PathOptions {
    pub field: String,
    /// Field whose value forms the node's own segment
    pub source: String,
    pub separator: String,
    /// Format of date sources
    pub date_format: String,
    /// Append `-<id>` to segments built from a non identifier source
    pub append_id: bool,
    pub starts_with_separator: bool,
    pub ends_with_separator: bool,
    pub lock: Option<LockOptions>,
}

/// Root lock settings of a materialized path tree
#[derive(Debug, Clone, PartialEq)]
pub struct LockOptions {
    pub field: String,
    pub timeout: Duration,
}

/// Resolved tree configuration of a class
#[derive(Debug, Clone, PartialEq)]
pub struct TreeOptions {
    pub class: String,
    pub identifier: String,
    pub strategy: StrategyKind,
    pub parent: String,
    pub level: Option<String>,
    pub root: Option<String>,
    pub left: Option<String>,
    pub right: Option<String>,
    pub on_delete: OnDelete,
    pub closure: Option<ClosureOptions>,
    pub path: Option<PathOptions>,
}

impl TreeOptions {
    /// Left column, set for nested set trees
    pub fn left_field(&self) -> BehaviorResult<&str> {
        self.left
            .as_deref()
            .ok_or_else(|| BehaviorError::configuration(&self.class, "leftField is not configured"))
    }

    /// Right column, set for nested set trees
    pub fn right_field(&self) -> BehaviorResult<&str> {
        self.right
            .as_deref()
            .ok_or_else(|| BehaviorError::configuration(&self.class, "rightField is not configured"))
    }

    pub fn closure_options(&self) -> BehaviorResult<&ClosureOptions> {
        self.closure
            .as_ref()
            .ok_or_else(|| BehaviorError::configuration(&self.class, "closure is not configured"))
    }

    pub fn path_options(&self) -> BehaviorResult<&PathOptions> {
        self.path
            .as_ref()
            .ok_or_else(|| BehaviorError::configuration(&self.class, "pathField is not configured"))
    }
}

/// Tree configuration of a class; `None` when the class is not a tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeMetadata {
    pub options: Option<TreeOptions>,
}

impl ExtensionMetadata for TreeMetadata {
    const NAMESPACE: &'static str = "tree";

    fn build(
        class: &ClassMetadata,
        raw: Option<&JsonValue>,
        config: &BehaviorConfig,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<Self> {
        let Some(raw) = raw else {
            return Ok(Self::default());
        };
        let raw: RawTreeOptions = serde_json::from_value(raw.clone())
            .map_err(|e| BehaviorError::configuration(&class.name, e.to_string()))?;
        let options = validate(class, raw, config, provider)?;
        Ok(Self {
            options: Some(options),
        })
    }

    fn is_empty(&self) -> bool {
        self.options.is_none()
    }
}

fn require_integer(class: &ClassMetadata, field: &str, option: &str) -> BehaviorResult<()> {
    let mapping = class.field(field).ok_or_else(|| {
        BehaviorError::configuration(
            &class.name,
            format!("{} '{}' does not exist", option, field),
        )
    })?;
    if !mapping.field_type.is_integer() {
        return Err(BehaviorError::configuration(
            &class.name,
            format!("{} '{}' must be an integer, found {}", option, field, mapping.field_type),
        ));
    }
    Ok(())
}

fn validate(
    class: &ClassMetadata,
    raw: RawTreeOptions,
    config: &BehaviorConfig,
    provider: &dyn ClassMetadataProvider,
) -> BehaviorResult<TreeOptions> {
    let configuration = |message: String| BehaviorError::configuration(&class.name, message);

    if !class.is_single_valued_association(&raw.parent_field) {
        return Err(configuration(format!(
            "parentField '{}' must be a single valued association",
            raw.parent_field
        )));
    }
    if let Some(level) = &raw.level_field {
        require_integer(class, level, "levelField")?;
    }
    if let Some(root) = &raw.root_field {
        if !class.has_field(root) && !class.is_single_valued_association(root) {
            return Err(configuration(format!(
                "rootField '{}' must be a field or a single valued association",
                root
            )));
        }
    }

    let mut options = TreeOptions {
        class: class.name.clone(),
        identifier: class.identifier.clone(),
        strategy: raw.strategy,
        parent: raw.parent_field,
        level: raw.level_field,
        root: raw.root_field,
        left: None,
        right: None,
        on_delete: raw.on_delete,
        closure: None,
        path: None,
    };

    if raw.on_delete == OnDelete::Promote && raw.strategy != StrategyKind::Nested {
        return Err(configuration(
            "onDelete 'promote' is only supported by the nested set strategy".to_string(),
        ));
    }

    match raw.strategy {
        StrategyKind::Nested => {
            let left = raw
                .left_field
                .ok_or_else(|| configuration("nested set trees require leftField".to_string()))?;
            let right = raw
                .right_field
                .ok_or_else(|| configuration("nested set trees require rightField".to_string()))?;
            require_integer(class, &left, "leftField")?;
            require_integer(class, &right, "rightField")?;
            if left == right {
                return Err(configuration(
                    "leftField and rightField must be different fields".to_string(),
                ));
            }
            options.left = Some(left);
            options.right = Some(right);
        }
        StrategyKind::Closure => {
            let closure = raw
                .closure
                .ok_or_else(|| configuration("closure trees require a closure class".to_string()))?;
            let closure_class = provider.class_metadata(&closure.class).map_err(|_| {
                configuration(format!(
                    "closure class '{}' must be registered before the node class",
                    closure.class
                ))
            })?;
            for (option, field) in [
                ("ancestor", &closure.ancestor),
                ("descendant", &closure.descendant),
                ("depth", &closure.depth),
            ] {
                if !closure_class.has_property(field) {
                    return Err(configuration(format!(
                        "closure {} '{}' is not mapped on '{}'",
                        option, field, closure.class
                    )));
                }
            }
            require_integer(&closure_class, &closure.depth, "depth")?;
            options.closure = Some(closure);
        }
        StrategyKind::MaterializedPath => {
            let field = raw.path_field.ok_or_else(|| {
                configuration("materialized path trees require pathField".to_string())
            })?;
            let mapping = class.require_field(&field)?;
            if !mapping.field_type.is_string_like() {
                return Err(configuration(format!("pathField '{}' must be a string", field)));
            }

            let source = raw.path_source.unwrap_or_else(|| class.identifier.clone());
            let source_mapping = class.field(&source).ok_or_else(|| {
                configuration(format!("pathSource '{}' does not exist", source))
            })?;
            let source_type = source_mapping.field_type;
            if !source_type.is_string_like()
                && !source_type.is_integer()
                && !source_type.is_temporal()
                && source_type != FieldType::Uuid
            {
                return Err(configuration(format!(
                    "pathSource '{}' must be a string, integer, date or uuid field",
                    source
                )));
            }

            let separator = raw
                .path_separator
                .unwrap_or_else(|| config.get_path_separator().clone());
            if separator.is_empty() {
                return Err(configuration("pathSeparator cannot be empty".to_string()));
            }

            let lock = if raw.activate_locking {
                let lock_field = raw.lock_time_field.ok_or_else(|| {
                    configuration("activateLocking requires lockTimeField".to_string())
                })?;
                let lock_mapping = class.require_field(&lock_field)?;
                if !lock_mapping.field_type.is_temporal() {
                    return Err(configuration(format!(
                        "lockTimeField '{}' must be a date, datetime or timestamp field",
                        lock_field
                    )));
                }
                Some(LockOptions {
                    field: lock_field,
                    timeout: raw
                        .locking_timeout
                        .map(Duration::from_secs)
                        .unwrap_or(*config.get_locking_timeout()),
                })
            } else {
                None
            };

            let append_id = raw
                .path_append_id
                .unwrap_or(source != class.identifier);
            options.path = Some(PathOptions {
                field,
                source,
                separator,
                date_format: raw
                    .path_date_format
                    .unwrap_or_else(|| config.get_path_date_format().clone()),
                append_id,
                starts_with_separator: raw.path_starts_with_separator,
                ends_with_separator: raw.path_ends_with_separator,
                lock,
            });
        }
    }

    Ok(options)
}
