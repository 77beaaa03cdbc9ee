//! In-process value store.
//!
//! Holds one watch channel per endpoint, so observers are notified as soon
//! as a value actually changes. Writes are journaled for inspection.

use super::{ControlWrite, PointValue, ValueStore, ValueWatch};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tokio::sync::watch;

/// Thread-safe in-memory store.
///
/// Setting a value equal to the current one does not notify observers.
#[derive(Default)]
pub struct MemoryStore {
    channels: RwLock<HashMap<String, watch::Sender<Option<PointValue>>>>,
    capacities: RwLock<HashMap<String, f64>>,
    journal: Mutex<Vec<ControlWrite>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an endpoint value. Returns true if observers were notified.
    pub fn set_value(&self, endpoint: &str, value: impl Into<PointValue>) -> bool {
        let value = value.into();
        let mut channels = self.channels.write();
        let sender = channels
            .entry(endpoint.to_string())
            .or_insert_with(|| watch::channel(None).0);
        sender.send_if_modified(|current| {
            if current.as_ref() == Some(&value) {
                false
            } else {
                *current = Some(value);
                true
            }
        })
    }

    /// Get an endpoint value without going through the async trait.
    pub fn get(&self, endpoint: &str) -> Option<PointValue> {
        self.channels
            .read()
            .get(endpoint)
            .and_then(|sender| sender.borrow().clone())
    }

    pub fn set_capacity(&self, node: &str, capacity: f64) {
        self.capacities.write().insert(node.to_string(), capacity);
    }

    pub fn remove_capacity(&self, node: &str) {
        self.capacities.write().remove(node);
    }

    /// All control-point writes, oldest first.
    pub fn writes(&self) -> Vec<ControlWrite> {
        self.journal.lock().clone()
    }

    /// Control-point writes to a single target, oldest first.
    pub fn writes_to(&self, target: &str) -> Vec<ControlWrite> {
        self.journal
            .lock()
            .iter()
            .filter(|w| w.target == target)
            .cloned()
            .collect()
    }

    /// Number of endpoints with a known value.
    pub fn len(&self) -> usize {
        self.channels
            .read()
            .values()
            .filter(|sender| sender.borrow().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn current_value(&self, endpoint: &str) -> Option<PointValue> {
        self.get(endpoint)
    }

    fn subscribe(&self, endpoint: &str) -> ValueWatch {
        self.channels
            .write()
            .entry(endpoint.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    async fn capacity(&self, node: &str) -> Option<f64> {
        self.capacities.read().get(node).copied()
    }

    async fn write_control_value(&self, write: ControlWrite) -> Result<()> {
        self.set_value(&write.target, write.value.clone());
        self.journal.lock().push(write);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DataType;

    #[test]
    fn test_set_only_notifies_on_change() {
        let store = MemoryStore::new();
        assert!(store.set_value("ep", "0"));
        assert!(!store.set_value("ep", "0"));
        assert!(store.set_value("ep", "1"));
        assert_eq!(store.get("ep"), Some(PointValue::from("1")));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_sees_initial_value_then_changes() {
        let store = MemoryStore::new();
        store.set_value("ep", "0");

        let mut watch = store.subscribe("ep");
        assert_eq!(*watch.borrow_and_update(), Some(PointValue::from("0")));

        store.set_value("ep", "1");
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow_and_update(), Some(PointValue::from("1")));
    }

    #[tokio::test]
    async fn test_subscribe_before_first_value() {
        let store = MemoryStore::new();
        let mut watch = store.subscribe("late");
        assert!(watch.borrow_and_update().is_none());

        store.set_value("late", 3.0);
        watch.changed().await.unwrap();
        assert_eq!(*watch.borrow(), Some(PointValue::Number(3.0)));
    }

    #[tokio::test]
    async fn test_write_is_journaled_and_visible() {
        let store = MemoryStore::new();
        store
            .write_control_value(ControlWrite::new("cp", "1", DataType::Real))
            .await
            .unwrap();

        assert_eq!(store.current_value("cp").await, Some(PointValue::from("1")));
        assert_eq!(store.writes_to("cp").len(), 1);
        assert!(store.writes_to("other").is_empty());
    }

    #[test]
    fn test_capacity_attribute() {
        let store = MemoryStore::new();
        assert_eq!(tokio_test::block_on(store.capacity("cp")), None);
        store.set_capacity("cp", 120.0);
        assert_eq!(tokio_test::block_on(store.capacity("cp")), Some(120.0));
        store.remove_capacity("cp");
        assert_eq!(tokio_test::block_on(store.capacity("cp")), None);
    }
}
