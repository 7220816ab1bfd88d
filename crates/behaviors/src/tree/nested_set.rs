//! Nested set strategy
//!
//! Every node owns a `[left, right]` interval enclosing the intervals of its
//! descendants. Structural changes open and close gaps with bulk shifts;
//! shifts run in descending coordinate order when growing and ascending
//! order when shrinking so that no intermediate state has two nodes on the
//! same coordinate.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::EventAdapter;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::query::{Assignment, Criteria, OrderBy, UpdateStatement};
use crate::value::FieldValue;

use super::options::{OnDelete, StrategyKind, TreeOptions};
use super::strategy::{ensure_not_self_parent, parent_of, row_id, PendingNodes, Strategy};

const OPERATION: &str = "nested set tree";

/// Where a node is placed relative to its target
#[derive(Debug, Clone, PartialEq)]
pub enum NodePosition {
    FirstChild,
    /// Default for inserts and parent changes
    LastChild,
    /// Before the sibling with the given identifier
    PrevSiblingOf(FieldValue),
    /// After the sibling with the given identifier
    NextSiblingOf(FieldValue),
}

impl NodePosition {
    fn is_sibling(&self) -> bool {
        matches!(
            self,
            NodePosition::PrevSiblingOf(_) | NodePosition::NextSiblingOf(_)
        )
    }
}

#[derive(Debug, Default)]
struct FlushState {
    /// Nodes removed in this flush, directly or through a cascade
    removed: HashSet<ObjectId>,
    /// Inserted nodes still waiting for their coordinates
    nodes: PendingNodes,
}

#[derive(Debug, Default)]
pub struct NestedSetStrategy {
    state: Mutex<FlushState>,
    positions: Mutex<HashMap<ObjectId, NodePosition>>,
}

/// Coordinates of a node
struct Interval {
    left: i64,
    right: i64,
    level: i64,
    root: FieldValue,
}

impl NestedSetStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a node at `position` the next time it is inserted or moved
    pub async fn set_position(&self, node: ObjectId, position: NodePosition) {
        self.positions.lock().await.insert(node, position);
    }

    /// Positions not consumed by an insert or a parent change; the pending
    /// set is left empty
    pub async fn take_positions(&self) -> Vec<(ObjectId, NodePosition)> {
        let mut positions: Vec<_> = self.positions.lock().await.drain().collect();
        positions.sort_by_key(|(node, _)| *node);
        positions
    }

    /// Move an already stored node to `position` without a parent change
    pub async fn reposition(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
        position: NodePosition,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        if ea.is_scheduled_for_delete(node) || self.state.lock().await.removed.contains(&node) {
            return Ok(());
        }
        let current = self.interval(ea, options, node)?;
        if current.left == 0 && current.right == 0 {
            return Ok(());
        }
        let target = self.target_of(ea, options, node, &position).await?;
        self.update_node(ea, options, node, target, &position).await
    }

    fn interval(
        &self,
        ea: &EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<Interval> {
        Ok(Interval {
            left: ea.get_int(node, options.left_field()?)?,
            right: ea.get_int(node, options.right_field()?)?,
            level: match &options.level {
                Some(level) => ea.get_int(node, level)?,
                None => 0,
            },
            root: match &options.root {
                Some(root) => ea.get_field(node, root)?,
                None => FieldValue::Null,
            },
        })
    }

    fn same_tree(options: &TreeOptions, a: &FieldValue, b: &FieldValue) -> bool {
        options.root.is_none() || (!a.is_null() && a.same_as(b))
    }

    fn tree_criteria(options: &TreeOptions, root: &FieldValue) -> Criteria {
        match &options.root {
            Some(field) => Criteria::new().where_eq(field, root.clone()),
            None => Criteria::new(),
        }
    }

    fn shift_order(field: &str, delta: i64) -> OrderBy {
        if delta > 0 {
            OrderBy::desc(field)
        } else {
            OrderBy::asc(field)
        }
    }

    /// Add `delta` to every left and right coordinate `>= first` in a tree
    async fn shift_rl(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        first: i64,
        delta: i64,
        root: &FieldValue,
    ) -> BehaviorResult<()> {
        for field in [options.left_field()?, options.right_field()?] {
            let statement =
                UpdateStatement::new(Self::tree_criteria(options, root).where_gte(field, first))
                    .increment(field, delta)
                    .order_by(Self::shift_order(field, delta));
            ea.bulk_update(&options.class, &statement).await?;
        }
        Ok(())
    }

    /// Move the nodes inside `[first, last]` by `delta`, optionally into
    /// another tree and to another level
    #[allow(clippy::too_many_arguments)]
    async fn shift_range_rl(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        first: i64,
        last: i64,
        delta: i64,
        root: &FieldValue,
        destination_root: Option<&FieldValue>,
        level_delta: i64,
    ) -> BehaviorResult<()> {
        let left = options.left_field()?;
        let right = options.right_field()?;
        let criteria = Self::tree_criteria(options, root)
            .where_gte(left, first)
            .where_lte(right, last);

        let mut statement = UpdateStatement::new(criteria)
            .increment(left, delta)
            .increment(right, delta)
            .order_by(Self::shift_order(left, delta));
        if let (Some(field), Some(destination)) = (&options.root, destination_root) {
            statement = statement.set(field, destination.clone());
        }
        if let Some(level) = &options.level {
            if level_delta != 0 {
                statement = statement.increment(level, level_delta);
            }
        }
        ea.bulk_update(&options.class, &statement).await?;
        Ok(())
    }

    /// Greatest right coordinate of a single tree table
    async fn max_right(&self, ea: &EventAdapter<'_>, options: &TreeOptions) -> BehaviorResult<i64> {
        let right = options.right_field()?;
        let rows = ea
            .select(&options.class, &Criteria::new(), &[OrderBy::desc(right)])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(right))
            .and_then(FieldValue::as_i64)
            .unwrap_or(0))
    }

    /// Target of a position: the sibling for sibling positions, the parent otherwise
    async fn target_of(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
        position: &NodePosition,
    ) -> BehaviorResult<Option<ObjectId>> {
        match position {
            NodePosition::PrevSiblingOf(sibling) | NodePosition::NextSiblingOf(sibling) => {
                ea.find(&options.class, sibling).await.map(Some)
            }
            _ => parent_of(ea, options, node).await,
        }
    }

    /// Place `node` relative to `target` and renumber the affected trees
    async fn update_node(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
        target: Option<ObjectId>,
        position: &NodePosition,
    ) -> BehaviorResult<()> {
        let current = self.interval(ea, options, node)?;
        let is_new = current.left == 0 && current.right == 0;
        let (mut left, mut right) = if is_new {
            (1, 2)
        } else {
            (current.left, current.right)
        };
        let size = right - left + 1;
        let old_root = if is_new {
            FieldValue::Null
        } else {
            current.root.clone()
        };
        let node_id = ea.identifier(node)?;

        let (start, new_root, new_level, new_parent) = match target {
            Some(target) => {
                if target == node {
                    return Err(BehaviorError::invalid_tree(format!(
                        "{} {} cannot be placed relative to itself",
                        options.class, node_id
                    )));
                }
                let anchor = self.interval(ea, options, target)?;
                if !is_new
                    && Self::same_tree(options, &old_root, &anchor.root)
                    && anchor.left >= left
                    && anchor.right <= right
                {
                    return Err(BehaviorError::invalid_tree(format!(
                        "{} {} cannot be moved under its own descendant",
                        options.class, node_id
                    )));
                }
                match position {
                    NodePosition::FirstChild => (
                        anchor.left + 1,
                        anchor.root,
                        anchor.level + 1,
                        ea.identifier(target)?,
                    ),
                    NodePosition::LastChild => (
                        anchor.right,
                        anchor.root,
                        anchor.level + 1,
                        ea.identifier(target)?,
                    ),
                    NodePosition::PrevSiblingOf(_) | NodePosition::NextSiblingOf(_) => {
                        let sibling_parent = ea.get_field(target, &options.parent)?;
                        if sibling_parent.is_null() && options.root.is_some() {
                            return Err(BehaviorError::invalid_tree(format!(
                                "{} cannot be placed next to a root of a multi tree",
                                options.class
                            )));
                        }
                        let start = if matches!(position, NodePosition::PrevSiblingOf(_)) {
                            anchor.left
                        } else {
                            anchor.right + 1
                        };
                        (start, anchor.root, anchor.level, sibling_parent)
                    }
                }
            }
            None if options.root.is_some() => (1, node_id.clone(), 0, FieldValue::Null),
            None => (self.max_right(ea, options).await? + 1, FieldValue::Null, 0, FieldValue::Null),
        };

        self.shift_rl(ea, options, start, size, &new_root).await?;

        let same_tree = !is_new && Self::same_tree(options, &old_root, &new_root);
        if same_tree && left >= start {
            left += size;
            right += size;
        }

        let mut assignments = Vec::new();
        if position.is_sibling() {
            assignments.push(Assignment::set(&options.parent, new_parent));
        }

        if is_new {
            assignments.push(Assignment::set(options.left_field()?, start));
            assignments.push(Assignment::set(options.right_field()?, start + size - 1));
            if let Some(level) = &options.level {
                assignments.push(Assignment::set(level, new_level));
            }
            if let Some(root) = &options.root {
                assignments.push(Assignment::set(root, new_root.clone()));
            }
            ea.update_object(node, assignments).await?;
        } else {
            let destination = (!same_tree).then_some(&new_root);
            self.shift_range_rl(
                ea,
                options,
                left,
                right,
                start - left,
                &old_root,
                destination,
                new_level - current.level,
            )
            .await?;
            self.shift_rl(ea, options, left, -size, &old_root).await?;
            if !assignments.is_empty() {
                ea.update_object(node, assignments).await?;
            }
        }

        debug!(
            "Positioned {} {} at {} in tree {}",
            options.class, node_id, start, new_root
        );
        Ok(())
    }

    /// Position a node, or delay it until its target is positioned, then
    /// position every node that was waiting for it
    async fn place(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            let position = self
                .positions
                .lock()
                .await
                .remove(&node)
                .unwrap_or(NodePosition::LastChild);
            let target = self.target_of(ea, options, node, &position).await?;

            let mut state = self.state.lock().await;
            if let Some(target) = target.filter(|t| *t != node && state.nodes.is_pending(*t)) {
                state.nodes.defer(node, target);
                self.positions.lock().await.insert(node, position);
                continue;
            }

            self.update_node(ea, options, node, target, &position).await?;
            let waiting = state.nodes.complete(node);
            stack.extend(waiting.into_iter().rev());
        }
        Ok(())
    }
}

#[async_trait]
impl Strategy for NestedSetStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Nested
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
        ea.require_relational(OPERATION)?;
        ensure_not_self_parent(ea, options, node)?;

        ea.set_field(node, options.left_field()?, FieldValue::Int(0))?;
        ea.set_field(node, options.right_field()?, FieldValue::Int(0))?;
        if let Some(level) = &options.level {
            ea.set_field(node, level, FieldValue::Int(0))?;
        }
        ea.recompute_single_object_change_set(node)?;
        self.state.lock().await.nodes.add(node);
        Ok(())
    }

    async fn process_scheduled_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        if ea.change_set(node).contains(&options.parent) {
            ensure_not_self_parent(ea, options, node)?;
        }
        Ok(())
    }

    async fn process_scheduled_delete(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        let mut state = self.state.lock().await;
        if state.removed.contains(&node) {
            return Ok(());
        }
        state.removed.insert(node);

        let interval = self.interval(ea, options, node)?;
        if interval.left == 0 && interval.right == 0 {
            return Ok(());
        }
        let left = options.left_field()?;
        let right = options.right_field()?;
        let node_id = ea.identifier(node)?;

        match options.on_delete {
            OnDelete::Cascade => {
                let descendants = ea
                    .select(
                        &options.class,
                        &Self::tree_criteria(options, &interval.root)
                            .where_gt(left, interval.left)
                            .where_lt(right, interval.right),
                        &[],
                    )
                    .await?;
                for row in descendants {
                    let descendant = ea.find(&options.class, &row_id(&row, options)).await?;
                    state.removed.insert(descendant);
                    if !ea.is_scheduled_for_delete(descendant) {
                        ea.schedule_for_delete(descendant)?;
                    }
                }
                let width = interval.right - interval.left + 1;
                self.shift_rl(ea, options, interval.right + 1, -width, &interval.root)
                    .await?;
            }
            OnDelete::Promote => {
                let parent_id = ea.get_field(node, &options.parent)?;
                let children = ea
                    .select(
                        &options.class,
                        &Criteria::new().where_eq(&options.parent, node_id.clone()),
                        &[],
                    )
                    .await?;

                if parent_id.is_null() && options.root.is_some() {
                    // every child subtree becomes a tree of its own
                    for child in &children {
                        let child_left = child.get(left).and_then(FieldValue::as_i64).unwrap_or(0);
                        let child_right = child.get(right).and_then(FieldValue::as_i64).unwrap_or(0);
                        self.shift_range_rl(
                            ea,
                            options,
                            child_left,
                            child_right,
                            1 - child_left,
                            &interval.root,
                            Some(&row_id(child, options)),
                            -1,
                        )
                        .await?;
                    }
                } else {
                    self.shift_range_rl(
                        ea,
                        options,
                        interval.left + 1,
                        interval.right - 1,
                        -1,
                        &interval.root,
                        None,
                        -1,
                    )
                    .await?;
                    self.shift_rl(ea, options, interval.right + 1, -2, &interval.root)
                        .await?;
                }

                let reparent = UpdateStatement::new(
                    Criteria::new().where_eq(&options.parent, node_id.clone()),
                )
                .set(&options.parent, parent_id);
                ea.bulk_update(&options.class, &reparent).await?;
            }
        }

        debug!(
            "Removed {} {} from its nested set ({:?})",
            options.class, node_id, options.on_delete
        );
        Ok(())
    }

    async fn process_post_persist(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        self.place(ea, options, node).await
    }

    async fn process_post_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        if self.state.lock().await.removed.contains(&node) {
            return Ok(());
        }

        let explicit = self.positions.lock().await.remove(&node);
        if explicit.is_none() && !ea.change_set(node).contains(&options.parent) {
            return Ok(());
        }
        let position = explicit.unwrap_or(NodePosition::LastChild);
        let target = self.target_of(ea, options, node, &position).await?;
        self.update_node(ea, options, node, target, &position).await
    }
}
