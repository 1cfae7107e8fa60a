//! Worker lifecycle engine.
//!
//! `AgentInstances` is what the orchestration-server component drives. It
//! keeps the [`InstanceRegistry`] authoritative for which workers exist:
//! - `create` / `terminate` maintain it incrementally
//! - `refresh_all` seeds it from the cluster exactly once per process
//! - the timeout scans read it, re-checking the cluster only before a
//!   destructive decision
//!
//! Worker lifecycle:
//!
//! ```text
//! REQUESTED → PROVISIONED → REGISTERED ──────────────→ TERMINATED
//!                         └→ TIMED_OUT (not registered) → TERMINATED
//! ```

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use kea_id::WorkerName;
use kea_reconcile::{is_past_grace_period, partition_by_registration, Clock, SystemClock};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::agents::{AgentDirectory, Agents, KnownAgents};
use crate::cluster::{ClusterClient, ClusterClientFactory, Deletion, Unit};
use crate::config::Settings;
use crate::error::{InstanceError, InstanceResult};
use crate::instance::WorkerRecord;
use crate::pod::{self, KIND_LABEL_KEY, KIND_LABEL_VALUE};
use crate::registry::InstanceRegistry;
use crate::request::CreateAgentRequest;

/// Decide whether an unregistered worker has outlived its grace period.
///
/// The live unit's creation time wins over the cached one; the cached
/// value is only used when the platform reports none.
pub fn is_stale(
    candidate: &WorkerRecord,
    live: &Unit,
    now: DateTime<Utc>,
    period: TimeDelta,
) -> bool {
    let created_at = live.created_at.unwrap_or_else(|| candidate.created_at());
    is_past_grace_period(created_at, now, period)
}

/// Outcome of one [`AgentInstances::terminate_unregistered_instances`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Workers deleted from the cluster and forgotten.
    pub terminated: Vec<String>,

    /// Workers whose pod was already gone, forgotten without a delete.
    pub evicted: Vec<String>,

    /// Stale workers that registered before they could be terminated.
    pub spared: Vec<String>,

    /// Workers skipped because a cluster call failed.
    pub failed: Vec<String>,
}

impl SweepReport {
    /// Returns true if the pass changed nothing and hit no errors.
    pub fn is_empty(&self) -> bool {
        self.terminated.is_empty()
            && self.evicted.is_empty()
            && self.spared.is_empty()
            && self.failed.is_empty()
    }
}

/// Registry plus policy for elastic workers.
pub struct AgentInstances {
    factory: Arc<dyn ClusterClientFactory>,
    clock: Arc<dyn Clock>,
    registry: InstanceRegistry,

    /// Set once the registry has been seeded from the cluster. The mutex is
    /// held across the listing so that concurrent callers wait for the
    /// winner instead of listing again.
    refreshed: Mutex<bool>,
}

impl AgentInstances {
    pub fn new(factory: Arc<dyn ClusterClientFactory>) -> Self {
        Self::with_clock(factory, Arc::new(SystemClock))
    }

    pub fn with_clock(factory: Arc<dyn ClusterClientFactory>, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory,
            clock,
            registry: InstanceRegistry::new(),
            refreshed: Mutex::new(false),
        }
    }

    /// Provision a new worker and start tracking it.
    #[instrument(skip(self, request, settings), fields(environment = ?request.environment()))]
    pub async fn create(
        &self,
        request: &CreateAgentRequest,
        settings: &Settings,
    ) -> InstanceResult<WorkerRecord> {
        let name = WorkerName::new().to_string();
        let spec = pod::build_unit_spec(request, settings, &name, self.clock.now())?;

        let client = self.factory.client(settings)?;
        let mut unit = client.create_unit(&spec).await?;
        if unit.name.is_empty() {
            unit.name = name;
        }

        let record = WorkerRecord::from_unit(&unit, self.clock.now());
        self.registry.register(record.clone()).await;

        info!(
            worker = %record.name(),
            image = %spec.container.image,
            created_at = %record.created_at(),
            "Created worker"
        );
        Ok(record)
    }

    /// Delete a worker's pod and forget it.
    ///
    /// Unknown names are logged and ignored. If the delete call fails the
    /// worker stays tracked so the caller can retry.
    #[instrument(skip(self, settings))]
    pub async fn terminate(&self, name: &str, settings: &Settings) -> InstanceResult<()> {
        if !self.registry.has(name).await {
            warn!(worker = %name, "Requested to terminate an instance that does not exist");
            return Ok(());
        }

        let client = self.factory.client(settings)?;
        self.delete_and_forget(client.as_ref(), name).await
    }

    async fn delete_and_forget(
        &self,
        client: &dyn ClusterClient,
        name: &str,
    ) -> InstanceResult<()> {
        match client.delete_unit(name).await? {
            Deletion::Deleted => info!(worker = %name, "Terminated worker"),
            Deletion::AlreadyGone => info!(worker = %name, "Worker pod was already gone"),
        }
        self.registry.remove(name).await;
        Ok(())
    }

    /// Seed the registry from the cluster. Only the first successful call
    /// does any work.
    #[instrument(skip(self, settings))]
    pub async fn refresh_all(&self, settings: &Settings) -> InstanceResult<()> {
        let mut refreshed = self.refreshed.lock().await;
        if *refreshed {
            debug!("Workers already synced from cluster");
            return Ok(());
        }

        debug!("Syncing worker pods from cluster");
        let client = self.factory.client(settings)?;
        let units = client.list_units(&pod::kind_selector()).await?;

        let now = self.clock.now();
        let mut synced = 0usize;
        for unit in units
            .iter()
            .filter(|unit| unit.has_label(KIND_LABEL_KEY, KIND_LABEL_VALUE))
        {
            self.registry
                .register(WorkerRecord::from_unit(unit, now))
                .await;
            synced += 1;
        }

        *refreshed = true;
        info!(synced, listed = units.len(), "Synced workers from cluster");
        Ok(())
    }

    /// Returns true once [`AgentInstances::refresh_all`] has succeeded.
    pub async fn is_refreshed(&self) -> bool {
        *self.refreshed.lock().await
    }

    /// Known agents whose worker has outlived the auto-register period.
    ///
    /// Agents without a tracked worker are skipped.
    pub async fn instances_created_after_timeout(
        &self,
        settings: &Settings,
        agents: &Agents,
    ) -> Agents {
        let period = settings.auto_register_period();
        let now = self.clock.now();

        let mut stale = Vec::new();
        for agent in agents {
            let Some(record) = self.registry.find(&agent.elastic_agent_id).await else {
                continue;
            };
            if is_past_grace_period(record.created_at(), now, period) {
                stale.push(agent.clone());
            }
        }

        if !stale.is_empty() {
            debug!(count = stale.len(), "Found agents past the registration timeout");
        }
        Agents::new(stale)
    }

    /// Terminate tracked workers that never registered with the server
    /// within the auto-register period.
    ///
    /// Each candidate's age comes from a fresh read of its pod. Failures
    /// for one candidate are logged and do not stop the pass. `agents` is
    /// asked again right before each termination.
    #[instrument(skip(self, settings, agents))]
    pub async fn terminate_unregistered_instances(
        &self,
        settings: &Settings,
        agents: &dyn KnownAgents,
    ) -> InstanceResult<SweepReport> {
        let client = self.factory.client(settings)?;

        let mut report = SweepReport::default();
        let stale = self
            .stale_candidates(client.as_ref(), settings, agents, &mut report)
            .await;
        self.terminate_stale(client.as_ref(), stale, agents, &mut report)
            .await;

        Ok(report)
    }

    /// Same as [`AgentInstances::terminate_unregistered_instances`], with
    /// the agent set read from `directory`. The directory is read a second
    /// time after the pod reads, and terminations are checked against that
    /// fresh copy.
    ///
    /// If the second read fails nothing is terminated and the stale workers
    /// are reported as failed.
    #[instrument(skip(self, settings, directory))]
    pub async fn reclaim_unregistered(
        &self,
        settings: &Settings,
        directory: &dyn AgentDirectory,
    ) -> InstanceResult<SweepReport> {
        let agents = directory
            .known_agents()
            .await
            .map_err(|e| InstanceError::Directory(format!("{e:#}")))?;
        let client = self.factory.client(settings)?;

        let mut report = SweepReport::default();
        let stale = self
            .stale_candidates(client.as_ref(), settings, &agents, &mut report)
            .await;
        if stale.is_empty() {
            return Ok(report);
        }

        let current = match directory.known_agents().await {
            Ok(current) => current,
            Err(e) => {
                warn!(
                    error = %e,
                    workers = ?stale,
                    "Failed to re-read known agents, leaving stale workers"
                );
                report.failed.extend(stale);
                return Ok(report);
            }
        };
        self.terminate_stale(client.as_ref(), stale, &current, &mut report)
            .await;

        Ok(report)
    }

    /// Unregistered workers whose live pod is past the grace period.
    ///
    /// Pods that no longer exist are forgotten here and reported as evicted.
    async fn stale_candidates(
        &self,
        client: &dyn ClusterClient,
        settings: &Settings,
        agents: &dyn KnownAgents,
        report: &mut SweepReport,
    ) -> Vec<String> {
        let period = settings.auto_register_period();
        let now = self.clock.now();

        let (_, candidates) = partition_by_registration(self.registry.names().await, |name| {
            agents.contains_agent_with_id(name)
        });

        let mut stale = Vec::new();
        for name in candidates {
            let Some(record) = self.registry.find(&name).await else {
                continue;
            };

            match client.get_unit(&name).await {
                Ok(unit) => {
                    if is_stale(&record, &unit, now, period) {
                        stale.push(name);
                    }
                }
                Err(e) if e.is_not_found() => {
                    info!(worker = %name, "Worker pod no longer exists, forgetting it");
                    self.registry.remove(&name).await;
                    report.evicted.push(name);
                }
                Err(e) => {
                    warn!(worker = %name, error = %e, "Failed to fetch worker pod, skipping");
                    report.failed.push(name);
                }
            }
        }
        stale
    }

    async fn terminate_stale(
        &self,
        client: &dyn ClusterClient,
        stale: Vec<String>,
        agents: &dyn KnownAgents,
        report: &mut SweepReport,
    ) {
        if stale.is_empty() {
            return;
        }

        warn!(workers = ?stale, "Terminating instances that did not register");
        for name in stale {
            if agents.contains_agent_with_id(&name) {
                info!(worker = %name, "Worker registered during sweep, sparing it");
                report.spared.push(name);
                continue;
            }
            if !self.registry.has(&name).await {
                continue;
            }

            match self.delete_and_forget(client, &name).await {
                Ok(()) => report.terminated.push(name),
                Err(e) => {
                    warn!(worker = %name, error = %e, "Failed to terminate worker, skipping");
                    report.failed.push(name);
                }
            }
        }
    }

    pub async fn find(&self, name: &str) -> Option<WorkerRecord> {
        self.registry.find(name).await
    }

    pub async fn has(&self, name: &str) -> bool {
        self.registry.has(name).await
    }

    /// Every tracked worker.
    pub async fn instances(&self) -> Vec<WorkerRecord> {
        self.registry.snapshot().await
    }
}
