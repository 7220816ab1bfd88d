//! Lifecycle events and subscriber dispatch

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapter::EventAdapter;
use crate::error::BehaviorResult;
use crate::manager::ObjectId;
use crate::mapping::{ClassMetadata, ClassMetadataProvider};

/// Events fired by the object manager during its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// A class mapping was registered
    LoadClassMetadata,
    /// Change sets are computed, nothing written yet
    OnFlush,
    /// An inserted object's row was written
    PostPersist,
    /// An updated object's changes were written
    PostUpdate,
    /// A removed object's row was deleted
    PostRemove,
    /// Every write of the flush completed
    PostFlush,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::LoadClassMetadata => "loadClassMetadata",
            LifecycleEvent::OnFlush => "onFlush",
            LifecycleEvent::PostPersist => "postPersist",
            LifecycleEvent::PostUpdate => "postUpdate",
            LifecycleEvent::PostRemove => "postRemove",
            LifecycleEvent::PostFlush => "postFlush",
        };
        write!(f, "{}", name)
    }
}

/// Listener attached to the object manager lifecycle
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    fn subscribed_events(&self) -> Vec<LifecycleEvent>;

    /// Build and validate the listener's metadata for a newly mapped class
    fn load_class_metadata(
        &self,
        _class: &ClassMetadata,
        _provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<()> {
        Ok(())
    }

    async fn on_flush(&self, _ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        Ok(())
    }

    async fn post_persist(&self, _ea: &mut EventAdapter<'_>, _object: ObjectId) -> BehaviorResult<()> {
        Ok(())
    }

    async fn post_update(&self, _ea: &mut EventAdapter<'_>, _object: ObjectId) -> BehaviorResult<()> {
        Ok(())
    }

    async fn post_remove(&self, _ea: &mut EventAdapter<'_>, _object: ObjectId) -> BehaviorResult<()> {
        Ok(())
    }

    async fn post_flush(&self, _ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        Ok(())
    }
}

/// Ordered set of subscribers; dispatch follows registration order and stops
/// at the first error
#[derive(Default)]
pub struct EventManager {
    subscribers: Vec<Arc<dyn EventSubscriber>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_subscriber(&mut self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn EventSubscriber>) -> Self {
        self.add_subscriber(subscriber);
        self
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn listeners(&self, event: LifecycleEvent) -> impl Iterator<Item = &Arc<dyn EventSubscriber>> {
        self.subscribers
            .iter()
            .filter(move |subscriber| subscriber.subscribed_events().contains(&event))
    }

    pub fn has_listeners(&self, event: LifecycleEvent) -> bool {
        self.listeners(event).next().is_some()
    }

    pub fn dispatch_load_class_metadata(
        &self,
        class: &ClassMetadata,
        provider: &dyn ClassMetadataProvider,
    ) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::LoadClassMetadata) {
            subscriber.load_class_metadata(class, provider)?;
        }
        Ok(())
    }

    pub async fn dispatch_on_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::OnFlush) {
            subscriber.on_flush(ea).await?;
        }
        Ok(())
    }

    pub async fn dispatch_post_persist(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
    ) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::PostPersist) {
            subscriber.post_persist(ea, object).await?;
        }
        Ok(())
    }

    pub async fn dispatch_post_update(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
    ) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::PostUpdate) {
            subscriber.post_update(ea, object).await?;
        }
        Ok(())
    }

    pub async fn dispatch_post_remove(
        &self,
        ea: &mut EventAdapter<'_>,
        object: ObjectId,
    ) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::PostRemove) {
            subscriber.post_remove(ea, object).await?;
        }
        Ok(())
    }

    pub async fn dispatch_post_flush(&self, ea: &mut EventAdapter<'_>) -> BehaviorResult<()> {
        for subscriber in self.listeners(LifecycleEvent::PostFlush) {
            subscriber.post_flush(ea).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BehaviorError;
    use std::sync::Mutex;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventSubscriber for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscribed_events(&self) -> Vec<LifecycleEvent> {
            vec![LifecycleEvent::LoadClassMetadata]
        }

        fn load_class_metadata(
            &self,
            class: &ClassMetadata,
            _provider: &dyn ClassMetadataProvider,
        ) -> BehaviorResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.name, class.name));
            if self.fail {
                return Err(BehaviorError::configuration(&class.name, "rejected"));
            }
            Ok(())
        }
    }

    struct NoClasses;

    impl ClassMetadataProvider for NoClasses {
        fn class_metadata(&self, class: &str) -> BehaviorResult<Arc<ClassMetadata>> {
            Err(BehaviorError::ObjectNotFound(class.to_string()))
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Arc<dyn EventSubscriber> {
        Arc::new(Recorder {
            name: name.to_string(),
            log: Arc::clone(log),
            fail,
        })
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = EventManager::new()
            .with_subscriber(recorder("first", &log, false))
            .with_subscriber(recorder("second", &log, false));

        events
            .dispatch_load_class_metadata(&ClassMetadata::new("Article"), &NoClasses)
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["first:Article".to_string(), "second:Article".to_string()]
        );
        assert!(events.has_listeners(LifecycleEvent::LoadClassMetadata));
        assert!(!events.has_listeners(LifecycleEvent::OnFlush));
    }

    #[test]
    fn test_dispatch_stops_at_first_error() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let events = EventManager::new()
            .with_subscriber(recorder("failing", &log, true))
            .with_subscriber(recorder("skipped", &log, false));

        let result = events.dispatch_load_class_metadata(&ClassMetadata::new("Article"), &NoClasses);
        assert!(result.is_err());
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
