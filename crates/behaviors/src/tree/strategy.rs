//! Tree strategy contract

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::adapter::EventAdapter;
use crate::entity::Row;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::value::FieldValue;

use super::options::{StrategyKind, TreeOptions};

/// Coordinate maintenance of one tree storage strategy.
///
/// Strategy instances are shared by every class using the strategy and keep
/// per-flush state keyed by object; `reset` is called at the start of each
/// flush.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn reset(&self);

    async fn process_scheduled_insertion(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_scheduled_update(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_scheduled_delete(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_post_persist(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_post_update(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_post_remove(
        &self,
        _ea: &mut EventAdapter<'_>,
        _options: &TreeOptions,
        _node: ObjectId,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn process_post_flush(&self, _ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        Ok(())
    }
}

/// Managed parent of a node, `None` for roots
pub async fn parent_of(
    ea: &mut EventAdapter<'_>,
    options: &TreeOptions,
    node: ObjectId,
) -> BehaviorResult<Option<ObjectId>> {
    let parent_id = ea.get_field(node, &options.parent)?;
    if parent_id.is_null() {
        return Ok(None);
    }
    ea.find(&options.class, &parent_id).await.map(Some)
}

/// Fail when a node is its own parent
pub fn ensure_not_self_parent(
    ea: &EventAdapter<'_>,
    options: &TreeOptions,
    node: ObjectId,
) -> BehaviorResult<()> {
    let parent_id = ea.get_field(node, &options.parent)?;
    if !parent_id.is_null() && parent_id.same_as(&ea.identifier(node)?) {
        return Err(BehaviorError::invalid_tree(format!(
            "{} {} cannot be its own parent",
            options.class, parent_id
        )));
    }
    Ok(())
}

/// Identifier column of a row
pub fn row_id(row: &Row, options: &TreeOptions) -> FieldValue {
    row.get(&options.identifier).cloned().unwrap_or_default()
}

/// Nodes inserted in the current flush whose coordinates depend on a node
/// that has not been processed yet
#[derive(Debug, Default)]
pub struct PendingNodes {
    pending: HashSet<ObjectId>,
    delayed: HashMap<ObjectId, Vec<ObjectId>>,
}

impl PendingNodes {
    pub fn add(&mut self, node: ObjectId) {
        self.pending.insert(node);
    }

    pub fn is_pending(&self, node: ObjectId) -> bool {
        self.pending.contains(&node)
    }

    /// Process `node` once `until` has been processed
    pub fn defer(&mut self, node: ObjectId, until: ObjectId) {
        self.delayed.entry(until).or_default().push(node);
    }

    /// Mark `node` as processed and return the nodes that waited for it
    pub fn complete(&mut self, node: ObjectId) -> Vec<ObjectId> {
        self.pending.remove(&node);
        self.delayed.remove(&node).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.delayed.is_empty()
    }
}
