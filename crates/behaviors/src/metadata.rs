//! Extension metadata resolution
//!
//! Each behavior decodes its per-class configuration into an immutable
//! metadata record. Records are built on first use, validated against the
//! class mapping, and memoized in an explicit [`MetadataCache`] owned by the
//! listener. The cache is never invalidated implicitly; `clear` is the only
//! way to force a rebuild.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::adapter::EventAdapter;
use crate::config::BehaviorConfig;
use crate::error::BehaviorResult;
use crate::manager::ObjectId;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};

/// Per-class configuration of one behavior
pub trait ExtensionMetadata: Send + Sync + Sized + 'static {
    /// Key under which the mapping driver stores this behavior's configuration
    const NAMESPACE: &'static str;

    /// Decode and validate the raw configuration of a class.
    ///
    /// `raw` is `None` when the class has no configuration for this behavior,
    /// in which case an empty record must be returned.
    fn build(
        class: &ClassMetadata,
        raw: Option<&JsonValue>,
        config: &BehaviorConfig,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<Self>;

    /// Empty metadata means the behavior is inactive for the class
    fn is_empty(&self) -> bool;
}

/// Source of raw behavior configuration per class
pub trait MappingDriver: Send + Sync {
    fn read_extension_config(&self, class: &str, namespace: &str) -> Option<JsonValue>;
}

/// Mapping driver holding configurations registered in code
#[derive(Debug, Default)]
pub struct StaticMappingDriver {
    configs: DashMap<(String, String), JsonValue>,
}

impl StaticMappingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the configuration of `namespace` for `class`
    pub fn register(&self, class: &str, namespace: &str, config: JsonValue) {
        self.configs
            .insert((class.to_string(), namespace.to_string()), config);
    }

    /// Builder-style registration
    pub fn with(self, class: &str, namespace: &str, config: JsonValue) -> Self {
        self.register(class, namespace, config);
        self
    }
}

impl MappingDriver for StaticMappingDriver {
    fn read_extension_config(&self, class: &str, namespace: &str) -> Option<JsonValue> {
        self.configs
            .get(&(class.to_string(), namespace.to_string()))
            .map(|entry| entry.value().clone())
    }
}

/// Process-wide cache of built metadata, keyed by class name
#[derive(Debug)]
pub struct MetadataCache<M> {
    entries: DashMap<String, Arc<M>>,
}

impl<M> Default for MetadataCache<M> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<M> MetadataCache<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, class: &str) -> Option<Arc<M>> {
        self.entries.get(class).map(|entry| Arc::clone(entry.value()))
    }

    /// Cached metadata or the result of `build`. Concurrent builds for the
    /// same class are harmless: the last insert wins and every caller gets a
    /// complete record.
    pub fn get_or_build<F>(&self, class: &str, build: F) -> BehaviorResult<Arc<M>>
    where
        F: FnOnce() -> BehaviorResult<M>,
    {
        if let Some(metadata) = self.get(class) {
            return Ok(metadata);
        }

        let metadata = Arc::new(build()?);
        self.entries.insert(class.to_string(), Arc::clone(&metadata));
        Ok(metadata)
    }

    pub fn contains(&self, class: &str) -> bool {
        self.entries.contains_key(class)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every cached record
    pub fn clear(&self) {
        self.entries.clear();
    }
}

/// Shared base of the behavior listeners: metadata resolution per class
pub struct MappedEventSubscriber<M: ExtensionMetadata> {
    driver: Arc<dyn MappingDriver>,
    cache: Arc<MetadataCache<M>>,
    config: BehaviorConfig,
}

impl<M: ExtensionMetadata> MappedEventSubscriber<M> {
    pub fn new(driver: Arc<dyn MappingDriver>, config: BehaviorConfig) -> Self {
        Self::with_cache(driver, Arc::new(MetadataCache::new()), config)
    }

    /// Share a cache between several listener instances
    pub fn with_cache(
        driver: Arc<dyn MappingDriver>,
        cache: Arc<MetadataCache<M>>,
        config: BehaviorConfig,
    ) -> Self {
        Self {
            driver,
            cache,
            config,
        }
    }

    pub fn config(&self) -> &BehaviorConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetadataCache<M>> {
        &self.cache
    }

    /// Resolve the metadata of a class, building it on a cache miss
    pub fn load_metadata(
        &self,
        class: &ClassMetadata,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<Arc<M>> {
        self.cache.get_or_build(&class.name, || {
            let raw = self.driver.read_extension_config(&class.name, M::NAMESPACE);
            let metadata = M::build(class, raw.as_ref(), &self.config, provider)?;
            if metadata.is_empty() {
                debug!("No {} configuration for class '{}'", M::NAMESPACE, class.name);
            } else {
                info!("Built {} metadata for class '{}'", M::NAMESPACE, class.name);
            }
            Ok(metadata)
        })
    }

    /// Class mapping and behavior metadata of an object, `None` when the
    /// behavior is inactive for its class
    pub fn metadata_for(
        &self,
        ea: &EventAdapter<'_>,
        object: ObjectId,
    ) -> BehaviorResult<Option<(Arc<ClassMetadata>, Arc<M>)>> {
        let class = ea.metadata_of(object)?;
        let metadata = self.load_metadata(&class, ea)?;
        if metadata.is_empty() {
            return Ok(None);
        }
        Ok(Some((class, metadata)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BehaviorError;
    use crate::mapping::FieldMapping;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Fields(Vec<String>);

    impl ExtensionMetadata for Fields {
        const NAMESPACE: &'static str = "fields";

        fn build(
            class: &ClassMetadata,
            raw: Option<&JsonValue>,
            _config: &BehaviorConfig,
            _provider: &dyn ClassMetadataProvider,
        ) -> BehaviorResult<Self> {
            let names: Vec<String> = match raw {
                Some(raw) => serde_json::from_value(raw.clone())?,
                None => Vec::new(),
            };
            for name in &names {
                class.require_field(name)?;
            }
            Ok(Fields(names))
        }

        fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
    }

    struct Classes(HashMap<String, Arc<ClassMetadata>>);

    impl ClassMetadataProvider for Classes {
        fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>> {
            self.0
                .get(class)
                .cloned()
                .ok_or_else(|| BehaviorError::ObjectNotFound(class.to_string()))
        }
    }

    fn article() -> ClassMetadata {
        ClassMetadata::new("Article").with_field(FieldMapping::string("title", 64))
    }

    #[test]
    fn test_static_driver_lookup() {
        let driver = StaticMappingDriver::new().with("Article", "fields", json!(["title"]));
        assert_eq!(
            driver.read_extension_config("Article", "fields"),
            Some(json!(["title"]))
        );
        assert_eq!(driver.read_extension_config("Article", "tree"), None);
    }

    #[test]
    fn test_cache_builds_once() {
        let cache: MetadataCache<Fields> = MetadataCache::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let metadata = cache
                .get_or_build("Article", || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(Fields(vec!["title".to_string()]))
                })
                .unwrap();
            assert_eq!(metadata.0, vec!["title".to_string()]);
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_build_is_not_cached() {
        let cache: MetadataCache<Fields> = MetadataCache::new();
        let result = cache.get_or_build("Article", || {
            Err(BehaviorError::configuration("Article", "broken"))
        });
        assert!(result.is_err());
        assert!(!cache.contains("Article"));
    }

    #[test]
    fn test_subscriber_caches_empty_metadata() {
        let driver = Arc::new(StaticMappingDriver::new());
        let subscriber: MappedEventSubscriber<Fields> =
            MappedEventSubscriber::new(driver, BehaviorConfig::default());
        let classes = Classes(HashMap::new());

        let metadata = subscriber.load_metadata(&article(), &classes).unwrap();
        assert!(metadata.is_empty());
        assert!(subscriber.cache().contains("Article"));
    }

    #[test]
    fn test_subscriber_rejects_unknown_field() {
        let driver = Arc::new(StaticMappingDriver::new().with("Article", "fields", json!(["body"])));
        let subscriber: MappedEventSubscriber<Fields> =
            MappedEventSubscriber::new(driver, BehaviorConfig::default());
        let classes = Classes(HashMap::new());

        let error = subscriber.load_metadata(&article(), &classes).unwrap_err();
        assert!(matches!(error, BehaviorError::Configuration { .. }));
    }
}
