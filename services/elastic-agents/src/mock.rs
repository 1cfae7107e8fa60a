//! In-memory cluster for testing and development.
//!
//! `MockCluster` behaves like a single namespace of a real cluster: it
//! stamps units with a creation time from its clock, reports missing units
//! as not found and treats deleting a missing unit as already gone. Every
//! call is counted and individual calls can be made to fail.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use kea_reconcile::{Clock, SystemClock};
use tracing::{debug, info};

use crate::cluster::{
    ClusterClient, ClusterClientFactory, ClusterError, Deletion, LabelSelector, Unit, UnitSpec,
};
use crate::config::Settings;

/// Mock cluster platform.
pub struct MockCluster {
    clock: Arc<dyn Clock>,
    units: Mutex<BTreeMap<String, Unit>>,

    fail_connect: AtomicBool,
    fail_create: AtomicBool,
    fail_list: AtomicBool,
    fail_get: Mutex<HashSet<String>>,
    fail_delete: Mutex<HashSet<String>>,

    connect_calls: AtomicUsize,
    create_calls: AtomicUsize,
    list_calls: AtomicUsize,
    get_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MockCluster {
    /// Create an empty cluster using the wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cluster that stamps units using `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            units: Mutex::new(BTreeMap::new()),
            fail_connect: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            fail_list: AtomicBool::new(false),
            fail_get: Mutex::new(HashSet::new()),
            fail_delete: Mutex::new(HashSet::new()),
            connect_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// This cluster as a client factory for [`crate::AgentInstances`].
    pub fn factory(self: &Arc<Self>) -> Arc<dyn ClusterClientFactory> {
        Arc::new(Arc::clone(self))
    }

    /// Put a unit into the cluster directly, as another process would.
    pub fn insert_unit(&self, unit: Unit) {
        lock(&self.units).insert(unit.name.clone(), unit);
    }

    /// Remove a unit behind the engine's back.
    pub fn remove_unit(&self, name: &str) -> Option<Unit> {
        lock(&self.units).remove(name)
    }

    pub fn unit(&self, name: &str) -> Option<Unit> {
        lock(&self.units).get(name).cloned()
    }

    pub fn has_unit(&self, name: &str) -> bool {
        lock(&self.units).contains_key(name)
    }

    pub fn unit_names(&self) -> Vec<String> {
        lock(&self.units).keys().cloned().collect()
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Make `get_unit(name)` fail with an API error.
    pub fn fail_get_for(&self, name: &str) {
        lock(&self.fail_get).insert(name.to_string());
    }

    /// Make `delete_unit(name)` fail with an API error.
    pub fn fail_delete_for(&self, name: &str) {
        lock(&self.fail_delete).insert(name.to_string());
    }

    pub fn clear_failures(&self) {
        self.set_fail_connect(false);
        self.set_fail_create(false);
        self.set_fail_list(false);
        lock(&self.fail_get).clear();
        lock(&self.fail_delete).clear();
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn injected(operation: &str, name: &str) -> ClusterError {
    ClusterError::Api {
        status: 500,
        message: format!("[MOCK] {operation} {name} failed"),
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_unit(&self, spec: &UnitSpec) -> Result<Unit, ClusterError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected("create", &spec.name));
        }

        let mut units = lock(&self.units);
        if units.contains_key(&spec.name) {
            return Err(ClusterError::Api {
                status: 409,
                message: format!("pods \"{}\" already exists", spec.name),
            });
        }

        let unit = Unit {
            name: spec.name.clone(),
            created_at: Some(self.clock.now()),
            labels: spec.labels.clone(),
            annotations: spec.annotations.clone(),
        };
        units.insert(unit.name.clone(), unit.clone());

        info!(unit = %unit.name, image = %spec.container.image, "[MOCK] Created unit");
        Ok(unit)
    }

    async fn list_units(&self, selector: &LabelSelector) -> Result<Vec<Unit>, ClusterError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(injected("list", &selector.to_query()));
        }

        let units: Vec<_> = lock(&self.units)
            .values()
            .filter(|unit| selector.matches(&unit.labels))
            .cloned()
            .collect();
        debug!(count = units.len(), selector = %selector.to_query(), "[MOCK] Listed units");
        Ok(units)
    }

    async fn get_unit(&self, name: &str) -> Result<Unit, ClusterError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.fail_get).contains(name) {
            return Err(injected("get", name));
        }

        lock(&self.units)
            .get(name)
            .cloned()
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))
    }

    async fn delete_unit(&self, name: &str) -> Result<Deletion, ClusterError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if lock(&self.fail_delete).contains(name) {
            return Err(injected("delete", name));
        }

        match lock(&self.units).remove(name) {
            Some(_) => {
                info!(unit = %name, "[MOCK] Deleted unit");
                Ok(Deletion::Deleted)
            }
            None => Ok(Deletion::AlreadyGone),
        }
    }
}

/// Hands out the mock cluster itself regardless of settings.
impl ClusterClientFactory for Arc<MockCluster> {
    fn client(&self, _settings: &Settings) -> Result<Arc<dyn ClusterClient>, ClusterError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClusterError::Config("[MOCK] connect failed".to_string()));
        }
        Ok(Arc::clone(self) as Arc<dyn ClusterClient>)
    }
}
