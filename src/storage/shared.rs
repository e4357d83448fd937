//! A backend shared by several contexts, with change notifications

use std::sync::{Arc, Mutex, PoisonError};

use log::{trace, warn};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{KeyValueStore, StorageError, StorageEvent};

/// Identifier of one execution context (one tab, one process)
pub type ContextId = Uuid;

const EVENT_CAPACITY: usize = 64;

/// Handle onto a backend shared by a cluster of contexts.
///
/// Every handle writes through to the same inner backend. Writes that change a
/// value are published to all handles' subscribers, tagged with the writing
/// handle's context id so a context can skip its own changes. Writes from all
/// handles are serialized, so events are published in write order and each
/// event's `old_value` is the value the write replaced.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<dyn KeyValueStore>,
    events: broadcast::Sender<StorageEvent>,
    writes: Arc<Mutex<()>>,
    context: ContextId,
}

impl SharedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner,
            events,
            writes: Arc::new(Mutex::new(())),
            context: Uuid::new_v4(),
        }
    }

    /// A new handle for another context over the same backend
    pub fn attach(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            events: self.events.clone(),
            writes: self.writes.clone(),
            context: Uuid::new_v4(),
        }
    }

    pub fn context(&self) -> ContextId {
        self.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }

    fn publish(&self, key: &str, old_value: Option<String>, new_value: Option<String>) {
        if old_value == new_value {
            return;
        }
        let event = StorageEvent {
            key: key.to_string(),
            old_value,
            new_value,
            origin: self.context,
        };
        // no subscribers is fine
        if self.events.send(event).is_err() {
            trace!("No listeners for storage change on {}", key);
        }
    }

    fn previous(&self, key: &str) -> Option<String> {
        match self.inner.get(key) {
            Ok(value) => value,
            Err(err) => {
                warn!("Could not read {} before change: {}", key, err);
                None
            }
        }
    }
}

impl KeyValueStore for SharedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let old_value = self.previous(key);
        self.inner.set(key, value)?;
        self.publish(key, old_value, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let _write = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
        let old_value = self.previous(key);
        self.inner.remove(key)?;
        self.publish(key, old_value, None);
        Ok(())
    }
}
