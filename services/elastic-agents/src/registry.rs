//! In-memory registry of provisioned workers.
//!
//! The registry is the only mutable state shared between the request path
//! and the background sweeper. Records are inserted whole under the write
//! lock, so readers never observe a partially written record, and
//! enumeration hands out a copy taken under the read lock.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::instance::WorkerRecord;

/// Concurrent name → record map.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: RwLock<HashMap<String, WorkerRecord>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record with the same name.
    pub async fn register(&self, record: WorkerRecord) {
        let mut instances = self.instances.write().await;
        instances.insert(record.name().to_string(), record);
    }

    pub async fn find(&self, name: &str) -> Option<WorkerRecord> {
        self.instances.read().await.get(name).cloned()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.instances.read().await.contains_key(name)
    }

    /// Remove a record. Removing an absent name is a no-op.
    pub async fn remove(&self, name: &str) -> Option<WorkerRecord> {
        self.instances.write().await.remove(name)
    }

    /// Copy of every record at this moment.
    pub async fn snapshot(&self) -> Vec<WorkerRecord> {
        self.instances.read().await.values().cloned().collect()
    }

    /// Copy of every name at this moment.
    pub async fn names(&self) -> Vec<String> {
        self.instances.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}
