//! kea elastic agents
//!
//! Provisions ephemeral build agents as Kubernetes pods on behalf of an
//! orchestration server, and reclaims pods whose agent never registered
//! with the server within the auto-register period.
//!
//! ## Architecture
//!
//! - **AgentInstances**: the engine the server-facing component drives
//!   (create, terminate, refresh, timeout scans)
//! - **InstanceRegistry**: concurrent cache of the workers this process
//!   tracks, seeded once from the cluster
//! - **ClusterClient**: the cluster platform seam (Kubernetes in
//!   production, `MockCluster` in tests and dev)
//! - **Sweeper**: background loop running the timeout scan
//!
//! ## Modules
//!
//! - `cluster`: cluster platform interface
//! - `kubernetes`: Kubernetes REST implementation of the interface
//! - `pod`: worker pod specification and validation
//! - `instances`: lifecycle engine and garbage-collection policy

pub mod agents;
pub mod cluster;
pub mod config;
pub mod error;
pub mod instance;
pub mod instances;
pub mod kubernetes;
pub mod mock;
pub mod pod;
pub mod profile;
pub mod registry;
pub mod request;
pub mod sweeper;

// Re-export commonly used types
pub use agents::{Agent, AgentDirectory, Agents, KnownAgents};
pub use cluster::{ClusterClient, ClusterClientFactory, ClusterError, Unit};
pub use config::Settings;
pub use error::{InstanceError, ValidationError};
pub use instance::WorkerRecord;
pub use instances::{is_stale, AgentInstances, SweepReport};
pub use kubernetes::{KubernetesClient, KubernetesClientFactory};
pub use mock::MockCluster;
pub use request::CreateAgentRequest;
pub use sweeper::{Sweeper, SweeperConfig};
