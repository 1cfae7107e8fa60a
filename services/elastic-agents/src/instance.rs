//! Worker records.

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};

use crate::cluster::Unit;
use crate::pod::{created_at_from_labels, ENVIRONMENT_LABEL_KEY};

/// Snapshot of one provisioned worker.
///
/// Records are equal when their names are equal; every other field is
/// metadata.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    name: String,
    created_at: DateTime<Utc>,
    environment: Option<String>,
    properties: BTreeMap<String, String>,
}

impl WorkerRecord {
    pub fn new(
        name: impl Into<String>,
        created_at: DateTime<Utc>,
        environment: Option<String>,
        properties: BTreeMap<String, String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_at,
            environment,
            properties,
        }
    }

    /// Build a record from a unit reported by the cluster.
    ///
    /// The platform's creation timestamp is authoritative. Without one the
    /// created-at label is used, then `fallback_now`.
    pub fn from_unit(unit: &Unit, fallback_now: DateTime<Utc>) -> Self {
        Self {
            name: unit.name.clone(),
            created_at: unit
                .created_at
                .or_else(|| created_at_from_labels(&unit.labels))
                .unwrap_or(fallback_now),
            environment: unit.labels.get(ENVIRONMENT_LABEL_KEY).cloned(),
            properties: unit.annotations.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }
}

impl PartialEq for WorkerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for WorkerRecord {}

impl Hash for WorkerRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
