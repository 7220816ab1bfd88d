//! Closure table strategy
//!
//! Each `(ancestor, descendant)` pair reachable through parent links is a row
//! of the closure class, a node being its own ancestor at depth 0.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::EventAdapter;
use crate::entity::Row;
use crate::error::{BehaviorError, BehaviorResult};
use crate::manager::ObjectId;
use crate::query::{Assignment, Criteria, UpdateStatement};
use crate::value::FieldValue;

use super::options::{ClosureOptions, StrategyKind, TreeOptions};
use super::strategy::{ensure_not_self_parent, parent_of, PendingNodes, Strategy};

const OPERATION: &str = "closure table tree";

#[derive(Debug, Default)]
pub struct ClosureStrategy {
    nodes: Mutex<PendingNodes>,
}

fn closure_row(closure: &ClosureOptions, ancestor: FieldValue, descendant: FieldValue, depth: i64) -> Row {
    let mut row = Row::new();
    row.insert(closure.ancestor.clone(), ancestor);
    row.insert(closure.descendant.clone(), descendant);
    row.insert(closure.depth.clone(), FieldValue::Int(depth));
    row
}

fn depth_of(row: &Row, closure: &ClosureOptions) -> i64 {
    row.get(&closure.depth).and_then(FieldValue::as_i64).unwrap_or(0)
}

impl ClosureStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closure rows pointing at the ancestors of `id`, itself included
    async fn ancestor_rows(
        &self,
        ea: &EventAdapter<'_>,
        closure: &ClosureOptions,
        id: &FieldValue,
    ) -> BehaviorResult<Vec<Row>> {
        ea.select(
            &closure.class,
            &Criteria::new().where_eq(&closure.descendant, id.clone()),
            &[],
        )
        .await
    }

    /// Closure rows pointing at the descendants of `id`, itself included
    async fn descendant_rows(
        &self,
        ea: &EventAdapter<'_>,
        closure: &ClosureOptions,
        id: &FieldValue,
    ) -> BehaviorResult<Vec<Row>> {
        ea.select(
            &closure.class,
            &Criteria::new().where_eq(&closure.ancestor, id.clone()),
            &[],
        )
        .await
    }

    /// Write the closure rows of a freshly persisted node and its level
    async fn insert_node(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
        parent: Option<ObjectId>,
    ) -> BehaviorResult<()> {
        let closure = options.closure_options()?;
        let node_id = ea.identifier(node)?;

        let mut rows = vec![closure_row(closure, node_id.clone(), node_id.clone(), 0)];
        if let Some(parent) = parent {
            let parent_id = ea.identifier(parent)?;
            for ancestor in self.ancestor_rows(ea, closure, &parent_id).await? {
                rows.push(closure_row(
                    closure,
                    ancestor.get(&closure.ancestor).cloned().unwrap_or_default(),
                    node_id.clone(),
                    depth_of(&ancestor, closure) + 1,
                ));
            }
        }
        let level = rows.len() as i64 - 1;
        for row in rows {
            ea.insert_row(&closure.class, row).await?;
        }

        if let Some(field) = &options.level {
            ea.update_object(node, vec![Assignment::set(field, level)])
                .await?;
        }
        debug!("Inserted {} {} at level {}", options.class, node_id, level);
        Ok(())
    }
}

#[async_trait]
impl Strategy for ClosureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Closure
    }

    async fn reset(&self) {
        *self.nodes.lock().await = PendingNodes::default();
    }

    async fn process_scheduled_insertion(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        ensure_not_self_parent(ea, options, node)?;
        if let Some(level) = &options.level {
            ea.set_field(node, level, FieldValue::Int(0))?;
            ea.recompute_single_object_change_set(node)?;
        }
        self.nodes.lock().await.add(node);
        Ok(())
    }

    async fn process_scheduled_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        if !ea.change_set(node).contains(&options.parent) {
            return Ok(());
        }
        ensure_not_self_parent(ea, options, node)?;

        let new_parent = ea.get_field(node, &options.parent)?;
        if new_parent.is_null() {
            return Ok(());
        }
        let closure = options.closure_options()?;
        let node_id = ea.identifier(node)?;
        let below = ea
            .select(
                &closure.class,
                &Criteria::new()
                    .where_eq(&closure.ancestor, node_id.clone())
                    .where_eq(&closure.descendant, new_parent),
                &[],
            )
            .await?;
        if !below.is_empty() {
            return Err(BehaviorError::invalid_tree(format!(
                "{} {} cannot be moved under its own descendant",
                options.class, node_id
            )));
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
        let closure = options.closure_options()?;
        let node_id = ea.identifier(node)?;

        for row in self.descendant_rows(ea, closure, &node_id).await? {
            if depth_of(&row, closure) == 0 {
                continue;
            }
            let descendant_id = row.get(&closure.descendant).cloned().unwrap_or_default();
            let descendant = ea.find(&options.class, &descendant_id).await?;
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
        ea.require_relational(OPERATION)?;
        let mut nodes = self.nodes.lock().await;
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            let parent = parent_of(ea, options, node).await?;
            if let Some(parent) = parent.filter(|p| nodes.is_pending(*p)) {
                // the parent row and its closure rows do not exist yet
                nodes.defer(node, parent);
                continue;
            }
            self.insert_node(ea, options, node, parent).await?;
            stack.extend(nodes.complete(node).into_iter().rev());
        }
        Ok(())
    }

    async fn process_post_update(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        if !ea.change_set(node).contains(&options.parent) {
            return Ok(());
        }
        let closure = options.closure_options()?;
        let node_id = ea.identifier(node)?;
        let new_parent = ea.get_field(node, &options.parent)?;

        let subtree = self.descendant_rows(ea, closure, &node_id).await?;
        let subtree_ids: Vec<FieldValue> = subtree
            .iter()
            .filter_map(|row| row.get(&closure.descendant).cloned())
            .collect();
        if subtree_ids.iter().any(|id| id.same_as(&new_parent)) {
            return Err(BehaviorError::invalid_tree(format!(
                "{} {} cannot be moved under its own descendant",
                options.class, node_id
            )));
        }

        // detach: drop every path entering the subtree from outside
        ea.delete(
            &closure.class,
            &Criteria::new()
                .where_in(&closure.descendant, subtree_ids.clone())
                .where_not_in(&closure.ancestor, subtree_ids.clone()),
        )
        .await?;

        // attach: connect every new ancestor to every subtree node
        let supertree = if new_parent.is_null() {
            Vec::new()
        } else {
            self.ancestor_rows(ea, closure, &new_parent).await?
        };
        for above in &supertree {
            let ancestor = above.get(&closure.ancestor).cloned().unwrap_or_default();
            for below in &subtree {
                ea.insert_row(
                    &closure.class,
                    closure_row(
                        closure,
                        ancestor.clone(),
                        below.get(&closure.descendant).cloned().unwrap_or_default(),
                        depth_of(above, closure) + depth_of(below, closure) + 1,
                    ),
                )
                .await?;
            }
        }

        if let Some(level) = &options.level {
            let delta = supertree.len() as i64 - ea.get_int(node, level)?;
            if delta != 0 {
                let statement = UpdateStatement::new(
                    Criteria::new().where_in(&options.identifier, subtree_ids),
                )
                .increment(level, delta);
                ea.bulk_update(&options.class, &statement).await?;
            }
        }

        debug!(
            "Moved {} {} under {} ({} closure rows per node)",
            options.class,
            node_id,
            new_parent,
            supertree.len()
        );
        Ok(())
    }

    async fn process_post_remove(
        &self,
        ea: &mut EventAdapter<'_>,
        options: &TreeOptions,
        node: ObjectId,
    ) -> BehaviorResult<()> {
        ea.require_relational(OPERATION)?;
        let closure = options.closure_options()?;
        let node_id = ea.identifier(node)?;
        ea.delete(
            &closure.class,
            &Criteria::new().where_eq(&closure.descendant, node_id.clone()),
        )
        .await?;
        ea.delete(
            &closure.class,
            &Criteria::new().where_eq(&closure.ancestor, node_id),
        )
        .await?;
        Ok(())
    }
}
