//! # elif-behaviors
//!
//! Behavioral extensions hooked into the object manager flush lifecycle.
//!
//! ## Features
//!
//! - **Sluggable**: URL-safe slugs with transliteration and collision handling
//! - **Tree**: nested set, closure table and materialized path hierarchies
//! - **Timestampable**: creation, update and change timestamps
//! - **Backend aware**: relational and document adapters behind one facade
//! - **Metadata cache**: per-class configuration validated once and shared
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use elif_behaviors::{
//!     BehaviorConfig, ClassMetadata, EventManager, FieldMapping, FieldValue,
//!     MemoryObjectManager, Record, SluggableListener, StaticMappingDriver,
//! };
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let driver = StaticMappingDriver::new().with(
//!     "Article",
//!     "sluggable",
//!     json!({ "slug": { "fields": ["title"] } }),
//! );
//! let sluggable = Arc::new(SluggableListener::new(Arc::new(driver), BehaviorConfig::default()));
//! let events = EventManager::new().with_subscriber(sluggable);
//!
//! let mut manager = MemoryObjectManager::new(Arc::new(events));
//! manager
//!     .register_class(
//!         ClassMetadata::new("Article")
//!             .with_field(FieldMapping::string("title", 64))
//!             .with_field(FieldMapping::string("slug", 64).unique()),
//!     )
//!     .unwrap();
//!
//! let article = manager.persist(Record::new("Article").with("title", "Café du Monde")).unwrap();
//! manager.flush().await.unwrap();
//! assert_eq!(manager.get(article, "slug").unwrap(), FieldValue::from("cafe-du-monde"));
//! # });
//! ```

pub mod adapter;
pub mod config;
pub mod entity;
pub mod error;
pub mod manager;
pub mod mapping;
pub mod memory;
pub mod metadata;
pub mod query;
pub mod sluggable;
pub mod subscriber;
pub mod timestampable;
pub mod tree;
pub mod value;

pub use adapter::EventAdapter;
pub use config::{BehaviorConfig, BehaviorConfigBuilder};
pub use entity::{Entity, Record, Row};
pub use error::{BehaviorError, BehaviorResult};
pub use manager::{Backend, ChangeSet, ObjectId, ObjectManager};
pub use mapping::{AssociationMapping, ClassMetadata, ClassMetadataProvider, FieldMapping};
pub use memory::MemoryObjectManager;
pub use metadata::{
    ExtensionMetadata, MappedEventSubscriber, MappingDriver, MetadataCache, StaticMappingDriver,
};
pub use query::{Assignment, Criteria, OrderBy, QueryOperator, UpdateStatement};
pub use sluggable::{SlugOptions, SlugStyle, SluggableListener, SluggableMetadata};
pub use subscriber::{EventManager, EventSubscriber, LifecycleEvent};
pub use timestampable::{TimestampTrigger, TimestampableListener, TimestampableMetadata};
pub use tree::{NodePosition, StrategyKind, TreeListener, TreeMetadata, TreeOptions};
pub use value::{FieldType, FieldValue};
