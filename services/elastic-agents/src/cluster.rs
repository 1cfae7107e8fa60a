//! Cluster platform interface.
//!
//! The cluster platform runs workload units (pods) on behalf of this
//! system. The engine only ever needs four operations on it:
//! - create a unit from a spec
//! - list units matching a label selector
//! - fetch one unit by name
//! - delete one unit by name
//!
//! Implementations bind the target namespace when they are constructed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::Settings;

/// Errors reported by the cluster platform.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Transport-level failure talking to the platform.
    #[error("cluster request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The platform answered with a non-success status.
    #[error("cluster API error {status}: {message}")]
    Api { status: u16, message: String },

    /// A unit that was expected to exist does not.
    #[error("unit not found: {0}")]
    NotFound(String),

    /// The platform response could not be understood.
    #[error("failed to decode cluster response: {0}")]
    Decode(String),

    /// The client could not be built from the given settings.
    #[error("invalid cluster configuration: {0}")]
    Config(String),
}

impl ClusterError {
    /// Returns true if this error means the unit does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }
}

/// A workload unit as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,

    /// Creation time recorded by the platform, if it reported one.
    pub created_at: Option<DateTime<Utc>>,

    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl Unit {
    /// Returns true if the unit carries `key=value` among its labels.
    pub fn has_label(&self, key: &str, value: &str) -> bool {
        self.labels.get(key).is_some_and(|v| v == value)
    }
}

/// Resource limits for the single container of a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Memory limit in mebibytes.
    pub memory_mib: Option<u64>,

    /// CPU limit, passed through verbatim (e.g. `"500m"`, `"2"`).
    pub cpu: Option<String>,
}

/// Specification of the container that runs the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub image_pull_policy: String,

    /// Environment variables in declaration order.
    pub env: Vec<(String, String)>,

    pub limits: ResourceLimits,
}

/// Everything needed to materialise a new unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub container: ContainerSpec,
}

/// Equality-based label selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    /// A selector requiring a single `key=value` label.
    pub fn with(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(key.into(), value.into());
        Self(labels)
    }

    /// Returns true if `labels` satisfies every requirement.
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    /// Render as a `labelSelector` query value (`k1=v1,k2=v2`).
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    /// The unit existed and was deleted.
    Deleted,

    /// The unit was already gone.
    AlreadyGone,
}

/// Cluster platform client.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a unit and return it as the platform recorded it.
    async fn create_unit(&self, spec: &UnitSpec) -> Result<Unit, ClusterError>;

    /// List units in the bound namespace that match `selector`.
    async fn list_units(&self, selector: &LabelSelector) -> Result<Vec<Unit>, ClusterError>;

    /// Fetch a unit by name. Missing units are [`ClusterError::NotFound`].
    async fn get_unit(&self, name: &str) -> Result<Unit, ClusterError>;

    /// Delete a unit by name. Deleting a missing unit is not an error.
    async fn delete_unit(&self, name: &str) -> Result<Deletion, ClusterError>;
}

/// Builds cluster clients from settings.
pub trait ClusterClientFactory: Send + Sync {
    fn client(&self, settings: &Settings) -> Result<Arc<dyn ClusterClient>, ClusterError>;
}
