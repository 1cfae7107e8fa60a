//! Background sweeper.
//!
//! The sweeper is the periodic path of the engine. Each pass:
//! - seeds the registry from the cluster, if that has not happened yet
//! - fetches the agents the server currently knows about
//! - reads the pods of unregistered workers
//! - fetches the agents again and terminates the stale workers still
//!   missing from that list

use std::sync::Arc;
use std::time::Duration;

use kea_reconcile::DEFAULT_SWEEP_INTERVAL;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::agents::AgentDirectory;
use crate::config::Settings;
use crate::error::InstanceError;
use crate::instances::{AgentInstances, SweepReport};

/// Sweeper configuration.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Interval between sweeps.
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Periodically reclaims workers that failed to register.
pub struct Sweeper {
    instances: Arc<AgentInstances>,
    settings: Settings,
    directory: Arc<dyn AgentDirectory>,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(
        instances: Arc<AgentInstances>,
        settings: Settings,
        directory: Arc<dyn AgentDirectory>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            instances,
            settings,
            directory,
            config,
        }
    }

    /// Run sweeps until shutdown is signalled or the sender is dropped.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting worker sweeper"
        );

        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("Shutdown sender dropped, worker sweeper stopping");
                        break;
                    }
                    if *shutdown.borrow() {
                        info!("Worker sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single sweep.
    ///
    /// Returns `None` when the pass could not get as far as the timeout
    /// scan.
    pub async fn sweep_once(&self) -> Option<SweepReport> {
        debug!("Starting sweep");

        if let Err(e) = self.instances.refresh_all(&self.settings).await {
            warn!(error = %e, "Failed to sync workers from cluster, will retry");
        }

        match self
            .instances
            .reclaim_unregistered(&self.settings, self.directory.as_ref())
            .await
        {
            Ok(report) => {
                if !report.is_empty() {
                    info!(
                        terminated = report.terminated.len(),
                        evicted = report.evicted.len(),
                        spared = report.spared.len(),
                        failed = report.failed.len(),
                        "Sweep complete"
                    );
                }
                Some(report)
            }
            Err(InstanceError::Directory(e)) => {
                warn!(error = %e, "Failed to fetch known agents, skipping sweep");
                None
            }
            Err(e) => {
                error!(error = %e, "Sweep failed");
                None
            }
        }
    }
}
