//! Fleet health service. Builds one consolidated snapshot per refresh.
//!
//! Every configured project is checked concurrently. Sharded projects ask
//! their aggregator; simple projects get a single direct probe. Each branch
//! is bounded by its own timeout and recovers its own failures, so a refresh
//! always produces a snapshot covering every configured project.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tracing::{debug, info, warn};

use opsdeck_core::{
    ConfigError, OpsdeckConfig, Project, ProjectTarget, ShardLayout, SystemSnapshot, TargetKind,
    Worker, WorkerStatus,
};

use crate::aggregator::{AggregatorClient, placeholder_slots};
use crate::prober::Prober;

/// Builds fleet snapshots for a fixed set of projects.
#[derive(Debug, Clone)]
pub struct FleetHealthService {
    targets: Arc<[ProjectTarget]>,
    prober: Prober,
    aggregator: AggregatorClient,
}

impl FleetHealthService {
    pub fn new(targets: Vec<ProjectTarget>, prober: Prober, aggregator: AggregatorClient) -> Self {
        Self {
            targets: targets.into(),
            prober,
            aggregator,
        }
    }

    /// Validate `config` and build a service for its projects.
    pub fn from_config(config: &OpsdeckConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.resolve()?,
            Prober::from_config(&config.probe),
            AggregatorClient::from_config(&config.aggregator),
        ))
    }

    pub fn targets(&self) -> &[ProjectTarget] {
        &self.targets
    }

    /// Run one full refresh cycle. Never fails: unreachable projects are
    /// reported as data.
    pub async fn refresh(&self) -> SystemSnapshot {
        let checks = self.targets.iter().map(|target| self.check_project(target));
        let projects = join_all(checks).await;

        let snapshot = SystemSnapshot::new(projects, epoch_millis());
        let counts = snapshot.counts();
        info!(
            projects = counts.total(),
            healthy = counts.healthy,
            degraded = counts.degraded,
            critical = counts.critical,
            offline = counts.offline,
            "fleet refresh complete"
        );
        snapshot
    }

    async fn check_project(&self, target: &ProjectTarget) -> Project {
        match &target.kind {
            TargetKind::Simple { port } => self.check_simple(target, *port).await,
            TargetKind::Sharded(layout) => self.check_sharded(target, layout).await,
        }
    }

    async fn check_simple(&self, target: &ProjectTarget, port: u16) -> Project {
        let outcome = self.prober.probe(&target.host, port).await;
        let status = if outcome.reachable {
            WorkerStatus::Online
        } else {
            WorkerStatus::Offline
        };
        debug!(project = %target.id, port, reachable = outcome.reachable, "simple project probed");

        let mut endpoint = Worker::with_status(port, target.name.clone(), status);
        endpoint.latency_ms = outcome.latency_ms;

        Project::simple(
            target.id.clone(),
            target.name.clone(),
            target.patcher_port,
            target.prod_port.clone(),
            endpoint,
        )
    }

    async fn check_sharded(&self, target: &ProjectTarget, layout: &ShardLayout) -> Project {
        let slots = match self.aggregator.fetch_project_state(target, layout).await {
            Ok(slots) => slots,
            Err(e) => {
                warn!(
                    project = %target.id,
                    error = %e,
                    slots = layout.slots.len(),
                    "aggregator unavailable, reporting placeholder slots"
                );
                placeholder_slots(layout)
            }
        };

        Project::sharded(
            target.id.clone(),
            target.name.clone(),
            target.patcher_port,
            target.prod_port.clone(),
            slots,
        )
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
