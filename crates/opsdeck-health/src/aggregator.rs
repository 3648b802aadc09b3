//! Upstream aggregator client.
//!
//! Each sharded project runs a control-plane service that reports
//! process-supervisor state for every slot. Its response shape is loose
//! and varies between deployments, so all normalization happens here:
//! [`parse_report`] is the single boundary that turns raw bytes into
//! either [`UpstreamReport::Parsed`] or [`UpstreamReport::Malformed`],
//! and [`build_slots`] maps parsed slots onto the configured topology.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use opsdeck_core::config::{AggregatorConfig, SlotConfig};
use opsdeck_core::{ProjectTarget, ShardLayout, Slot, SlotId, Worker, WorkerStatus};

use crate::transport::{self, TransportError};

/// Why a project's aggregator produced no usable state.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("project {0} has no control plane configured")]
    NotConfigured(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("aggregator returned HTTP {0}")]
    Status(u16),

    #[error("aggregator reported failure: {0}")]
    Rejected(String),

    #[error("malformed aggregator response: {0}")]
    Malformed(String),
}

// ── Wire shape ────────────────────────────────────────────────────

/// Result of normalizing one aggregator response body.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamReport {
    Parsed(Vec<UpstreamSlot>),
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpstreamSlot {
    #[serde(alias = "slotId", alias = "slot_id", alias = "slot", deserialize_with = "lenient_slot_id")]
    pub id: SlotId,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "pm2")]
    pub processes: Vec<UpstreamProcess>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpstreamProcess {
    pub name: String,
    #[serde(default, alias = "state")]
    pub status: String,
    #[serde(default)]
    pub pid: Option<u32>,
    /// Milliseconds since the process started.
    #[serde(default)]
    pub uptime: Option<u64>,
    #[serde(default)]
    pub restarts: Option<u32>,
    #[serde(default, alias = "lastPing")]
    pub last_ping: Option<String>,
    #[serde(default)]
    pub monit: Option<Monit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Monit {
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HealthAll {
    Wrapped {
        #[serde(default)]
        success: Option<bool>,
        #[serde(default)]
        error: Option<String>,
        #[serde(alias = "servers", alias = "data")]
        slots: Vec<UpstreamSlot>,
    },
    Bare(Vec<UpstreamSlot>),
}

fn lenient_slot_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SlotId, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(SlotId),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid slot id {s:?}"))),
    }
}

/// Normalize a raw aggregator body.
pub fn parse_report(body: &[u8]) -> UpstreamReport {
    match serde_json::from_slice::<HealthAll>(body) {
        Ok(HealthAll::Wrapped {
            success: Some(false),
            error,
            ..
        }) => UpstreamReport::Malformed(error.unwrap_or_else(|| "success=false".to_string())),
        Ok(HealthAll::Wrapped { slots, .. }) | Ok(HealthAll::Bare(slots)) => {
            UpstreamReport::Parsed(slots)
        }
        Err(e) => UpstreamReport::Malformed(e.to_string()),
    }
}

// ── Topology mapping ──────────────────────────────────────────────

/// Lowercase alphanumeric tokens of a structured name.
fn tokens(name: &str) -> Vec<String> {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Whether the role's tokens appear, in order and adjacent, in the
/// process name's tokens (`bids-07-bid-matcher` matches "Bid Matcher").
pub fn matches_role(process_name: &str, role: &str) -> bool {
    let role = tokens(role);
    if role.is_empty() {
        return false;
    }
    tokens(process_name)
        .windows(role.len())
        .any(|window| window == role.as_slice())
}

/// Format a millisecond uptime as a compact age string.
pub fn format_uptime(ms: u64) -> String {
    let secs = ms / 1000;
    let (days, hours, mins) = (secs / 86_400, (secs % 86_400) / 3600, (secs % 3600) / 60);
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {mins}m")
    } else if mins > 0 {
        format!("{mins}m")
    } else {
        format!("{secs}s")
    }
}

fn expected_workers(layout: &ShardLayout, slot_id: SlotId) -> Vec<Worker> {
    layout
        .roles
        .iter()
        .enumerate()
        .map(|(index, role)| Worker::offline(layout.worker_port(index, slot_id), role.clone()))
        .collect()
}

fn placeholder(layout: &ShardLayout, slot: &SlotConfig) -> Slot {
    Slot::unreported(
        slot.id,
        slot.tradeline.clone(),
        layout.main_port(slot.id),
        expected_workers(layout, slot.id),
    )
}

/// All-offline placeholders for every configured slot.
pub fn placeholder_slots(layout: &ShardLayout) -> Vec<Slot> {
    layout.slots.iter().map(|s| placeholder(layout, s)).collect()
}

fn reported_slot(layout: &ShardLayout, config: &SlotConfig, upstream: &UpstreamSlot) -> Slot {
    let main_port = layout.main_port(config.id);
    if let Some(port) = upstream.port.filter(|p| *p != main_port) {
        debug!(slot = config.id, reported = port, expected = main_port, "aggregator port differs from scheme");
    }

    let mut workers = expected_workers(layout, config.id);

    // Each process backs at most one role. More specific roles claim first,
    // so "Bid Matcher" takes `bids-07-bid-matcher` before "Matcher" can.
    let mut order: Vec<usize> = (0..layout.roles.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(tokens(&layout.roles[i]).len()));
    let mut claimed = vec![false; upstream.processes.len()];

    for index in order {
        let role = &layout.roles[index];
        let Some(found) = upstream
            .processes
            .iter()
            .zip(&claimed)
            .position(|(p, taken)| !taken && matches_role(&p.name, role))
        else {
            continue;
        };
        claimed[found] = true;
        let process = &upstream.processes[found];
        let worker = &mut workers[index];
        worker.status = WorkerStatus::from_supervisor(&process.status);
        worker.pid = process.pid;
        worker.uptime = process.uptime.map(format_uptime);
        worker.error_count = process.restarts;
        worker.last_ping = process.last_ping.clone();
    }

    let gauges: Vec<Monit> = upstream.processes.iter().filter_map(|p| p.monit).collect();
    let cpu = gauges
        .iter()
        .filter_map(|m| m.cpu)
        .fold(None, |acc: Option<f64>, v| Some(acc.unwrap_or(0.0) + v));
    let memory = gauges
        .iter()
        .filter_map(|m| m.memory)
        .fold(None, |acc: Option<u64>, v| Some(acc.unwrap_or(0) + v));

    Slot::from_workers(config.id, config.tradeline.clone(), main_port, workers).with_gauges(cpu, memory)
}

/// Map parsed upstream slots onto the configured topology.
///
/// Every configured slot appears exactly once, with one worker per role.
/// Slots the aggregator did not mention become placeholders; slots it
/// reports but the configuration does not know are ignored.
pub fn build_slots(layout: &ShardLayout, upstream: &[UpstreamSlot]) -> Vec<Slot> {
    for extra in upstream.iter().filter(|u| !layout.has_slot(u.id)) {
        debug!(slot = extra.id, "ignoring unconfigured slot from aggregator");
    }

    layout
        .slots
        .iter()
        .map(|config| match upstream.iter().find(|u| u.id == config.id) {
            Some(reported) => reported_slot(layout, config, reported),
            None => placeholder(layout, config),
        })
        .collect()
}

// ── Client ────────────────────────────────────────────────────────

/// Queries project aggregators.
#[derive(Debug, Clone)]
pub struct AggregatorClient {
    timeout: Duration,
}

impl AggregatorClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &AggregatorConfig) -> Self {
        Self::new(config.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch and normalize the state of every slot in a sharded project.
    ///
    /// Failures are project-wide; the caller decides how to degrade.
    pub async fn fetch_project_state(
        &self,
        target: &ProjectTarget,
        layout: &ShardLayout,
    ) -> Result<Vec<Slot>, AggregatorError> {
        let address = target
            .control_address()
            .ok_or_else(|| AggregatorError::NotConfigured(target.id.clone()))?;

        let reply = transport::get(&address, &layout.path, self.timeout).await?;
        if !reply.status.is_success() {
            return Err(AggregatorError::Status(reply.status.as_u16()));
        }

        match parse_report(&reply.body) {
            UpstreamReport::Parsed(slots) => {
                debug!(project = %target.id, reported = slots.len(), "aggregator report parsed");
                Ok(build_slots(layout, &slots))
            }
            UpstreamReport::Malformed(reason) => {
                warn!(project = %target.id, %reason, "aggregator response malformed");
                Err(AggregatorError::Malformed(reason))
            }
        }
    }
}
