//! Materialized path strategy
//!
//! A node stores the segments of all its ancestors joined by the path
//! separator. Structural writes lock the tree root through a timestamp
//! column when locking is active; the lock is released after the flush.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::adapter::EventAdapter;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::mapping::ClassMetadataProvider;
use crate::query::{Assignment, Criteria};
use crate::sluggable::transliterate;
use crate::value::{FieldType, FieldValue};

use super::options::{PathOptions, StrategyKind, TreeOptions};
use super::strategy::{ensure_not_self_parent, parent_of, row_id, PendingNodes, Strategy};

/// Root locked by the current flush
#[derive(Debug, Clone)]
struct HeldLock {
    class: String,
    field: String,
    root: FieldValue,
}

#[derive(Debug, Default)]
struct FlushState {
    nodes: PendingNodes,
    locks: Vec<HeldLock>,
}

#[derive(Debug, Default)]
pub struct MaterializedPathStrategy {
    state: Mutex<FlushState>,
}

/// Computed placement of a node
struct Placement {
    path: String,
    level: i64,
    root: FieldValue,
}

/// Prefix shared by every descendant path of `path`
pub fn subtree_prefix(path: &str, separator: &str) -> String {
    if path.ends_with(separator) {
        path.to_string()
    } else {
        format!("{}{}", path, separator)
    }
}

impl MaterializedPathStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk up the parent links to the root of a node's tree
    async fn find_root(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<ObjectId> {
        let mut visited = HashSet::new();
        let mut current = node;
        loop {
            visited.insert(current);
            match parent_of(ea, options, current).await? {
                None => return Ok(current),
                Some(parent) if visited.contains(&parent) => {
                    return Err(BehaviorError::invalid_tree(format!(
                        "{} {} is part of a parent cycle",
                        options.class,
                        ea.identifier(parent)?
                    )));
                }
                Some(parent) => current = parent,
            }
        }
    }

    /// Lock the root of a node's tree for the rest of the flush
    async fn acquire_lock(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        let Some(lock) = options.path_options()?.lock.clone() else {
            return Ok(());
        };
        let root = self.find_root(ea, options, node).await?;
        if ea.is_scheduled_for_insert(root) {
            // a new tree is invisible to other writers
            return Ok(());
        }
        let root_id = ea.identifier(root)?;

        let mut state = self.state.lock().await;
        if state
            .locks
            .iter()
            .any(|held| held.class == options.class && held.root.same_as(&root_id))
        {
            return Ok(());
        }

        let rows = ea
            .select(
                &options.class,
                &Criteria::new().where_eq(&options.identifier, root_id.clone()),
                &[],
            )
            .await?;
        let locked_at = rows
            .first()
            .and_then(|row| row.get(&lock.field))
            .and_then(FieldValue::as_datetime);
        if let Some(locked_at) = locked_at {
            let age = Utc::now().signed_duration_since(locked_at);
            let expired = age.to_std().map(|age| age >= lock.timeout).unwrap_or(false);
            if !expired {
                return Err(BehaviorError::locking(
                    &root_id,
                    format!(
                        "tree of {} is locked since {}ms, timeout is {}ms",
                        options.class,
                        age.num_milliseconds(),
                        lock.timeout.as_millis()
                    ),
                ));
            }
            warn!(
                "Expired lock on {} root {} taken over after {}ms",
                options.class,
                root_id,
                age.num_milliseconds()
            );
        }

        let field_type = ea
            .class_metadata(&options.class)?
            .field(&lock.field)
            .map(|mapping| mapping.field_type)
            .unwrap_or(FieldType::DateTime);
        let now = ea.get_date_value(field_type);
        ea.update_by_id(&options.class, &root_id, vec![Assignment::set(&lock.field, now)])
            .await?;
        debug!("Locked {} tree rooted at {}", options.class, root_id);

        state.locks.push(HeldLock {
            class: options.class.clone(),
            field: lock.field,
            root: root_id,
        });
        Ok(())
    }

    /// Own path segment of a node
    fn segment(
        &self,
        ea: &EventAdapter<'_>,
        options: &TreeOptions,
        path: &PathOptions,
        node: ObjectId,
    ) -> BehaviorResult<String> {
        let id = ea.identifier(node)?;
        let source = ea.get_field(node, &path.source)?;
        let text = source
            .to_text(&path.date_format)
            .map(|text| transliterate(&text))
            .ok_or_else(|| {
                BehaviorError::invalid_value(&path.source, "path source must not be null")
            })?;
        if text.contains(path.separator.as_str()) {
            return Err(BehaviorError::invalid_value(
                &path.source,
                format!("'{}' contains the path separator '{}'", text, path.separator),
            ));
        }
        if path.append_id && path.source != options.identifier {
            Ok(format!("{}-{}", text, id))
        } else {
            Ok(text)
        }
    }

    /// Path, level and root a node gets under its current parent
    async fn placement(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<Placement> {
        let path = options.path_options()?;
        let segment = self.segment(ea, options, path, node)?;
        let closing = if path.ends_with_separator {
            path.separator.as_str()
        } else {
            ""
        };

        match parent_of(ea, options, node).await? {
            Some(parent) => {
                let parent_path = ea.get_field(parent, &path.field)?;
                let parent_path = parent_path.as_str().unwrap_or_default();
                Ok(Placement {
                    path: format!(
                        "{}{}{}",
                        subtree_prefix(parent_path, &path.separator),
                        segment,
                        closing
                    ),
                    level: match &options.level {
                        Some(level) => ea.get_int(parent, level)? + 1,
                        None => 0,
                    },
                    root: match &options.root {
                        Some(root) => ea.get_field(parent, root)?,
                        None => FieldValue::Null,
                    },
                })
            }
            None => {
                let opening = if path.starts_with_separator {
                    path.separator.as_str()
                } else {
                    ""
                };
                Ok(Placement {
                    path: format!("{}{}{}", opening, segment, closing),
                    level: 0,
                    root: ea.identifier(node)?,
                })
            }
        }
    }

    fn assignments(options: &TreeOptions, path_field: &str, placement: &Placement) -> Vec<Assignment> {
        let mut assignments = vec![Assignment::set(path_field, placement.path.clone())];
        if let Some(level) = &options.level {
            assignments.push(Assignment::set(level, placement.level));
        }
        if let Some(root) = &options.root {
            assignments.push(Assignment::set(root, placement.root.clone()));
        }
        assignments
    }

    fn structure_changed(ea: &EventAdapter<'_>, options: &TreeOptions, node: ObjectId) -> BehaviorResult<bool> {
        let change_set = ea.change_set(node);
        Ok(change_set.contains(&options.parent)
            || change_set.contains(&options.path_options()?.source))
    }
}

#[async_trait]
impl Strategy for MaterializedPathStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::MaterializedPath
    }

    async fn reset(&self) {
        *self.state.lock().await = FlushState::default();
    }

    async fn process_scheduled_insertion(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ensure_not_self_parent(ea, options, node)?;
        self.state.lock().await.nodes.add(node);
        if !ea.get_field(node, &options.parent)?.is_null() {
            self.acquire_lock(ea, options, node).await?;
        }
        Ok(())
    }

    async fn process_scheduled_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        if !Self::structure_changed(ea, options, node)? {
            return Ok(());
        }
        ensure_not_self_parent(ea, options, node)?;

        let path = options.path_options()?;
        if let Some(parent) = parent_of(ea, options, node).await? {
            let own_path = ea.get_field(node, &path.field)?;
            let parent_path = ea.get_field(parent, &path.field)?;
            if let (Some(own), Some(parent_path)) = (own_path.as_str(), parent_path.as_str()) {
                if !own.is_empty() && parent_path.starts_with(&subtree_prefix(own, &path.separator)) {
                    return Err(BehaviorError::invalid_tree(format!(
                        "{} {} cannot be moved under its own descendant",
                        options.class,
                        ea.identifier(node)?
                    )));
                }
            }
        }
        self.acquire_lock(ea, options, node).await
    }

    async fn process_scheduled_delete(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        self.acquire_lock(ea, options, node).await?;

        let path = options.path_options()?;
        let own_path = ea.get_field(node, &path.field)?;
        let Some(own_path) = own_path.as_str().filter(|p| !p.is_empty()) else {
            return Ok(());
        };
        let descendants = ea
            .select(
                &options.class,
                &Criteria::new()
                    .where_starts_with(&path.field, &subtree_prefix(own_path, &path.separator))
                    .where_ne(&options.identifier, ea.identifier(node)?),
                &[],
            )
            .await?;
        for row in descendants {
            let descendant = ea.find(&options.class, &row_id(&row, options)).await?;
            if !ea.is_scheduled_for_delete(descendant) {
                ea.schedule_for_delete(descendant)?;
            }
        }
        Ok(())
    }

    async fn process_post_persist(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        let path_field = options.path_options()?.field.clone();
        let mut state = self.state.lock().await;
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            if let Some(parent) = parent_of(ea, options, node)
                .await?
                .filter(|p| state.nodes.is_pending(*p))
            {
                state.nodes.defer(node, parent);
                continue;
            }
            let placement = self.placement(ea, options, node).await?;
            debug!("Placed {} {} at '{}'", options.class, node, placement.path);
            ea.update_object(node, Self::assignments(options, &path_field, &placement))
                .await?;
            stack.extend(state.nodes.complete(node).into_iter().rev());
        }
        Ok(())
    }

    async fn process_post_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        if !Self::structure_changed(ea, options, node)? {
            return Ok(());
        }
        let path = options.path_options()?;
        let old_path = ea
            .get_field(node, &path.field)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let old_level = match &options.level {
            Some(level) => ea.get_int(node, level)?,
            None => 0,
        };

        let placement = self.placement(ea, options, node).await?;
        if placement.path == old_path {
            return Ok(());
        }
        ea.update_object(node, Self::assignments(options, &path.field, &placement))
            .await?;
        if old_path.is_empty() {
            return Ok(());
        }

        let old_prefix = subtree_prefix(&old_path, &path.separator);
        let new_prefix = subtree_prefix(&placement.path, &path.separator);
        let level_delta = placement.level - old_level;
        let descendants = ea
            .select(
                &options.class,
                &Criteria::new()
                    .where_starts_with(&path.field, &old_prefix)
                    .where_ne(&options.identifier, ea.identifier(node)?),
                &[],
            )
            .await?;

        let count = descendants.len();
        for row in descendants {
            let Some(descendant_path) = row.get(&path.field).and_then(FieldValue::as_str) else {
                continue;
            };
            let rest = &descendant_path[old_prefix.len()..];
            let mut assignments = vec![Assignment::set(
                &path.field,
                format!("{}{}", new_prefix, rest),
            )];
            if let Some(level) = &options.level {
                assignments.push(Assignment::increment(level, level_delta));
            }
            if let Some(root) = &options.root {
                assignments.push(Assignment::set(root, placement.root.clone()));
            }
            ea.update_by_id(&options.class, &row_id(&row, options), assignments)
                .await?;
        }

        debug!(
            "Moved {} {} from '{}' to '{}' with {} descendants",
            options.class, node, old_path, placement.path, count
        );
        Ok(())
    }

    async fn process_post_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        let locks = std::mem::take(&mut self.state.lock().await.locks);
        for lock in locks {
            ea.update_by_id(
                &lock.class,
                &lock.root,
                vec![Assignment::set(&lock.field, FieldValue::Null)],
            )
            .await?;
            debug!("Released lock on {} root {}", lock.class, lock.root);
        }
        Ok(())
    }
}
