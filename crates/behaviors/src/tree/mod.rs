//! Tree behavior
//!
//! Keeps hierarchical coordinates consistent while nodes are inserted, moved
//! and removed. Three storage strategies are available:
//!
//! - `nested`: left/right intervals per node
//! - `closure`: an ancestor/descendant/depth row per reachable pair
//! - `materializedPath`: a separator joined path string per node
//!
//! ```json
//! { "strategy": "nested", "parentField": "parent", "leftField": "lft",
//!   "rightField": "rgt", "levelField": "lvl" }
//! ```

pub mod closure;
pub mod materialized_path;
pub mod nested_set;
pub mod options;
pub mod strategy;

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::EventAdapter;
use crate::config::BehaviorConfig;
use crate::error::BehaviorResult;
use crate::manager::ObjectId;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};
use crate::metadata::{MappedEventSubscriber, MappingDriver};
use crate::subscriber::{EventSubscriber, LifecycleEvent};

pub use closure::ClosureStrategy;
pub use materialized_path::MaterializedPathStrategy;
pub use nested_set::{NestedSetStrategy, NodePosition};
pub use options::{OnDelete, StrategyKind, TreeMetadata, TreeOptions};
pub use strategy::Strategy;

/// Listener maintaining tree coordinates during flush
pub struct TreeListener {
    base: MappedEventSubscriber<TreeMetadata>,
    nested: NestedSetStrategy,
    closure: ClosureStrategy,
    path: MaterializedPathStrategy,
}

/// Hook of a strategy run for one object
#[derive(Debug, Clone, Copy)]
enum Hook {
    ScheduledInsertion,
    ScheduledUpdate,
    ScheduledDelete,
    PostPersist,
    PostUpdate,
    PostRemove,
}

impl TreeListener {
    pub fn new(driver: Arc<dyn MappingDriver>, config: BehaviorConfig) -> Self {
        Self {
            base: MappedEventSubscriber::new(driver, config),
            nested: NestedSetStrategy::new(),
            closure: ClosureStrategy::new(),
            path: MaterializedPathStrategy::new(),
        }
    }

    pub fn subscriber(&self) -> &MappedEventSubscriber<TreeMetadata> {
        &self.base
    }

    /// Position a nested set node relative to its parent or a sibling. The
    /// position applies on the node's next insert or move, or at the end of
    /// the next flush for a stored node that is not otherwise changed
    pub async fn set_node_position(&self, node: ObjectId, position: NodePosition) {
        self.nested.set_position(node, position).await;
    }

    fn strategy(&self, kind: StrategyKind) -> &dyn Strategy {
        match kind {
            StrategyKind::Nested => &self.nested,
            StrategyKind::Closure => &self.closure,
            StrategyKind::MaterializedPath => &self.path,
        }
    }

    fn strategies(&self) -> [&dyn Strategy; 3] {
        [&self.nested, &self.closure, &self.path]
    }

    async fn run(&self, ea: &mut EventAdapter<'_>, object: ObjectId, hook: Hook) -> BehaviorResult<()> {
        let Some((_, metadata)) = self.base.metadata_for(ea, object)? else {
            return Ok(());
        };
        let Some(options) = &metadata.options else {
            return Ok(());
        };
        let strategy = self.strategy(options.strategy);
        match hook {
            Hook::ScheduledInsertion => strategy.process_scheduled_insertion(ea, options, object).await,
            Hook::ScheduledUpdate => strategy.process_scheduled_update(ea, options, object).await,
            Hook::ScheduledDelete => strategy.process_scheduled_delete(ea, options, object).await,
            Hook::PostPersist => strategy.process_post_persist(ea, options, object).await,
            Hook::PostUpdate => strategy.process_post_update(ea, options, object).await,
            Hook::PostRemove => strategy.process_post_remove(ea, options, object).await,
        }
    }
}

#[async_trait]
impl EventSubscriber for TreeListener {
    fn name(&self) -> &str {
        "tree"
    }

    fn subscribed_events(&self) -> Vec<LifecycleEvent> {
        vec![
            LifecycleEvent::LoadClassMetadata,
            LifecycleEvent::OnFlush,
            LifecycleEvent::PostPersist,
            LifecycleEvent::PostUpdate,
            LifecycleEvent::PostRemove,
            LifecycleEvent::PostFlush,
        ]
    }

    fn load_class_metadata(
        &self,
        class: &ClassMetadata,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<()> {
        self.base.load_metadata(class, provider).map(|_| ())
    }

    async fn on_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        for strategy in self.strategies() {
            strategy.reset().await;
        }

        for object in ea.scheduled_insertions() {
            self.run(ea, object, Hook::ScheduledInsertion).await?;
        }
        for object in ea.scheduled_updates() {
            if ea.is_scheduled_for_delete(object) {
                continue;
            }
            self.run(ea, object, Hook::ScheduledUpdate).await?;
        }
        // deletions scheduled by cascades below are not revisited
        for object in ea.scheduled_deletions() {
            self.run(ea, object, Hook::ScheduledDelete).await?;
        }
        Ok(())
    }

    async fn post_persist(&self, ea: &mut EventAdapter<'_>, object: ObjectId) -> BehaviorResult<()> {
        self.run(ea, object, Hook::PostPersist).await
    }

    async fn post_update(&self, ea: &mut EventAdapter<'_>, object: ObjectId) -> BehaviorResult<()> {
        self.run(ea, object, Hook::PostUpdate).await
    }

    async fn post_remove(&self, ea: &mut EventAdapter<'_>, object: ObjectId) -> BehaviorResult<()> {
        self.run(ea, object, Hook::PostRemove).await
    }

    async fn post_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        // sibling reorders of stored nodes change no field, so no update
        // event carried them; positions left over are dropped here
        for (node, position) in self.nested.take_positions().await {
            if ea.class_of(node).is_err() {
                continue;
            }
            let Some((_, metadata)) = self.base.metadata_for(ea, node)? else {
                continue;
            };
            let Some(options) = &metadata.options else {
                continue;
            };
            if options.strategy == StrategyKind::Nested {
                self.nested.reposition(ea, options, node, position).await?;
            }
        }

        for strategy in self.strategies() {
            strategy.process_post_flush(ea).await?;
        }
        Ok(())
    }
}
