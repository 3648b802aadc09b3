//! Domain types for fleet health snapshots and operator actions.
//!
//! A [`SystemSnapshot`] is rebuilt in full on every refresh. Slot and
//! project health are private fields set only by the constructors, which
//! derive them through [`crate::rollup`].

use serde::{Deserialize, Serialize};

use crate::rollup::{self, HealthCounts};

/// Unique identifier for a project.
pub type ProjectId = String;

/// Identifier of a shard within a sharded project.
pub type SlotId = u16;

// ── Status values ─────────────────────────────────────────────────

/// Reachability of a single worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Online,
    Offline,
    Error,
}

impl WorkerStatus {
    /// Normalize a process-supervisor status string.
    ///
    /// `online` maps to online and `errored` to error. Anything else
    /// (`stopped`, `launching`, unknown values) counts as offline.
    pub fn from_supervisor(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "online" => Self::Online,
            "errored" | "error" => Self::Error,
            _ => Self::Offline,
        }
    }
}

/// Derived health of a slot or project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Critical,
    Offline,
}

impl Health {
    /// Whether `action` makes sense against a target in this state.
    ///
    /// Used by consumers to enable or disable controls.
    pub fn allows(self, action: Action) -> bool {
        match action {
            Action::Start => self != Health::Healthy,
            Action::Stop | Action::Restart => self != Health::Offline,
            Action::Reboot => true,
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────

/// A single addressable process inside a slot (or the sole endpoint of
/// a simple project).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub port: u16,
    /// Role label, e.g. "Engine".
    pub name: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<String>,
    /// Restart count reported by the supervisor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    /// Round-trip time of a direct probe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl Worker {
    /// A worker with no reported data, shown as offline.
    pub fn offline(port: u16, name: impl Into<String>) -> Self {
        Self::with_status(port, name, WorkerStatus::Offline)
    }

    pub fn with_status(port: u16, name: impl Into<String>, status: WorkerStatus) -> Self {
        Self {
            port,
            name: name.into(),
            status,
            last_ping: None,
            error_count: None,
            pid: None,
            uptime: None,
            latency_ms: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == WorkerStatus::Online
    }
}

// ── Slot ──────────────────────────────────────────────────────────

/// One shard of a sharded project.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Slot {
    pub slot_id: SlotId,
    pub tradeline: String,
    pub main_port: u16,
    workers: Vec<Worker>,
    health: Health,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

impl Slot {
    /// Build a slot whose health is rolled up from `workers`.
    pub fn from_workers(
        slot_id: SlotId,
        tradeline: impl Into<String>,
        main_port: u16,
        workers: Vec<Worker>,
    ) -> Self {
        let health = rollup::slot_health(&workers);
        Self {
            slot_id,
            tradeline: tradeline.into(),
            main_port,
            workers,
            health,
            cpu: None,
            memory: None,
        }
    }

    /// Placeholder for a slot whose aggregator gave no data this cycle.
    ///
    /// `workers` keeps the expected topology (all offline) for labeling;
    /// health is `Offline` because nothing was reported.
    pub fn unreported(
        slot_id: SlotId,
        tradeline: impl Into<String>,
        main_port: u16,
        workers: Vec<Worker>,
    ) -> Self {
        Self {
            slot_id,
            tradeline: tradeline.into(),
            main_port,
            workers,
            health: Health::Offline,
            cpu: None,
            memory: None,
        }
    }

    pub fn with_gauges(mut self, cpu: Option<f64>, memory: Option<u64>) -> Self {
        self.cpu = cpu;
        self.memory = memory;
        self
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn health(&self) -> Health {
        self.health
    }

    /// Online worker count, for "3/5" style labels.
    pub fn online_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_online()).count()
    }
}

// ── Project ───────────────────────────────────────────────────────

/// A product/service group: either sharded (slots) or simple (one endpoint).
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Control-plane (aggregator) port.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patcher_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prod_port: Option<String>,
    slots: Vec<Slot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<Worker>,
    health: Health,
}

impl Project {
    /// A sharded project. Slots are ordered by ascending slot id.
    pub fn sharded(
        id: impl Into<ProjectId>,
        name: impl Into<String>,
        patcher_port: Option<u16>,
        prod_port: Option<String>,
        mut slots: Vec<Slot>,
    ) -> Self {
        slots.sort_by_key(|s| s.slot_id);
        let healths: Vec<Health> = slots.iter().map(Slot::health).collect();
        Self {
            id: id.into(),
            name: name.into(),
            patcher_port,
            prod_port,
            health: rollup::project_health(&healths),
            slots,
            endpoint: None,
        }
    }

    /// A simple project whose health is the one-worker roll-up of its
    /// single probe.
    pub fn simple(
        id: impl Into<ProjectId>,
        name: impl Into<String>,
        patcher_port: Option<u16>,
        prod_port: Option<String>,
        endpoint: Worker,
    ) -> Self {
        let health = rollup::slot_health(std::slice::from_ref(&endpoint));
        Self {
            id: id.into(),
            name: name.into(),
            patcher_port,
            prod_port,
            slots: Vec::new(),
            endpoint: Some(endpoint),
            health,
        }
    }

    pub fn health(&self) -> Health {
        self.health
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn slot(&self, slot_id: SlotId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.slot_id == slot_id)
    }

    pub fn endpoint(&self) -> Option<&Worker> {
        self.endpoint.as_ref()
    }

    pub fn is_sharded(&self) -> bool {
        self.endpoint.is_none()
    }

    /// Slot counts by health, recomputed from the current slot list.
    pub fn slot_counts(&self) -> HealthCounts {
        HealthCounts::tally(self.slots.iter().map(Slot::health))
    }
}

// ── Snapshot ──────────────────────────────────────────────────────

/// One complete picture of fleet health from a single refresh.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemSnapshot {
    projects: Vec<Project>,
    /// Unix timestamp (milliseconds) when the refresh finished.
    pub last_check: u64,
}

impl SystemSnapshot {
    /// Build a snapshot, ordering projects by id.
    pub fn new(mut projects: Vec<Project>, last_check: u64) -> Self {
        projects.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            projects,
            last_check,
        }
    }

    /// The snapshot served before the first refresh completes.
    pub fn empty() -> Self {
        Self {
            projects: Vec::new(),
            last_check: 0,
        }
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    /// Project counts by health, recomputed from the current project list.
    pub fn counts(&self) -> HealthCounts {
        HealthCounts::tally(self.projects.iter().map(Project::health))
    }
}

// ── Actions ───────────────────────────────────────────────────────

/// Lifecycle action an operator can trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Restart,
    Stop,
    Reboot,
}

impl Action {
    /// Path segment used by the command endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Restart => "restart",
            Action::Stop => "stop",
            Action::Reboot => "reboot",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Action::Start),
            "restart" => Ok(Action::Restart),
            "stop" => Ok(Action::Stop),
            "reboot" => Ok(Action::Reboot),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// What an action applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionScope {
    Worker { project: ProjectId, port: u16 },
    Slot { project: ProjectId, slot: SlotId },
    Project { project: ProjectId },
    /// Every project with a control plane.
    All,
}

/// A one-shot operator command. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: Action,
    pub scope: ActionScope,
}

impl ActionRequest {
    pub fn new(action: Action, scope: ActionScope) -> Self {
        Self { action, scope }
    }

    /// Stop, fleet-wide actions, and project-wide reboots need an explicit
    /// confirmation before dispatch.
    pub fn requires_confirmation(&self) -> bool {
        match (&self.action, &self.scope) {
            (Action::Stop, _) => true,
            (_, ActionScope::All) => true,
            (Action::Reboot, ActionScope::Project { .. }) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(port: u16, status: WorkerStatus) -> Worker {
        Worker::with_status(port, format!("w{port}"), status)
    }

    fn slot(id: SlotId, statuses: &[WorkerStatus]) -> Slot {
        let workers = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| worker(5000 + i as u16, *s))
            .collect();
        Slot::from_workers(id, format!("slot-{id}"), 5000, workers)
    }

    #[test]
    fn supervisor_status_normalization() {
        assert_eq!(WorkerStatus::from_supervisor("online"), WorkerStatus::Online);
        assert_eq!(WorkerStatus::from_supervisor(" Online "), WorkerStatus::Online);
        assert_eq!(WorkerStatus::from_supervisor("errored"), WorkerStatus::Error);
        assert_eq!(WorkerStatus::from_supervisor("stopped"), WorkerStatus::Offline);
        assert_eq!(WorkerStatus::from_supervisor("launching"), WorkerStatus::Offline);
        assert_eq!(WorkerStatus::from_supervisor(""), WorkerStatus::Offline);
    }

    #[test]
    fn slot_health_follows_workers() {
        let s = slot(1, &[WorkerStatus::Online, WorkerStatus::Error]);
        assert_eq!(s.health(), Health::Degraded);
        assert_eq!(s.online_workers(), 1);
    }

    #[test]
    fn unreported_slot_is_offline_with_full_topology() {
        let workers = vec![Worker::offline(5001, "Engine"), Worker::offline(5101, "Discovery")];
        let s = Slot::unreported(1, "Construction", 5001, workers);
        assert_eq!(s.health(), Health::Offline);
        assert_eq!(s.workers().len(), 2);
    }

    #[test]
    fn project_orders_slots_and_counts_them() {
        let project = Project::sharded(
            "alpha",
            "Alpha",
            Some(7000),
            None,
            vec![
                slot(3, &[WorkerStatus::Offline]),
                slot(1, &[WorkerStatus::Online]),
                slot(2, &[WorkerStatus::Online, WorkerStatus::Offline]),
            ],
        );
        let ids: Vec<SlotId> = project.slots().iter().map(|s| s.slot_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(project.health(), Health::Degraded);

        let counts = project.slot_counts();
        assert_eq!(counts.healthy, 1);
        assert_eq!(counts.degraded, 1);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.offline, 0);
    }

    #[test]
    fn simple_project_uses_single_probe() {
        let up = Project::simple("web", "Web", None, None, worker(3000, WorkerStatus::Online));
        assert_eq!(up.health(), Health::Healthy);
        assert!(!up.is_sharded());

        let down = Project::simple("web", "Web", None, None, worker(3000, WorkerStatus::Offline));
        assert_eq!(down.health(), Health::Critical);
    }

    #[test]
    fn sharded_project_without_slots_is_offline() {
        let project = Project::sharded("empty", "Empty", Some(7000), None, Vec::new());
        assert_eq!(project.health(), Health::Offline);
    }

    #[test]
    fn snapshot_orders_projects_and_counts() {
        let snapshot = SystemSnapshot::new(
            vec![
                Project::simple("zeta", "Zeta", None, None, worker(1, WorkerStatus::Online)),
                Project::simple("alpha", "Alpha", None, None, worker(2, WorkerStatus::Offline)),
            ],
            42,
        );
        let ids: Vec<&str> = snapshot.projects().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);

        let counts = snapshot.counts();
        assert_eq!(counts.healthy, 1);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn confirmation_rules() {
        let project = || "alpha".to_string();
        let stop = ActionRequest::new(Action::Stop, ActionScope::Worker { project: project(), port: 5001 });
        assert!(stop.requires_confirmation());

        let restart_all = ActionRequest::new(Action::Restart, ActionScope::All);
        assert!(restart_all.requires_confirmation());

        let reboot_project = ActionRequest::new(Action::Reboot, ActionScope::Project { project: project() });
        assert!(reboot_project.requires_confirmation());

        let restart_slot = ActionRequest::new(Action::Restart, ActionScope::Slot { project: project(), slot: 3 });
        assert!(!restart_slot.requires_confirmation());
    }

    #[test]
    fn action_enablement() {
        assert!(!Health::Healthy.allows(Action::Start));
        assert!(Health::Critical.allows(Action::Start));
        assert!(!Health::Offline.allows(Action::Stop));
        assert!(Health::Degraded.allows(Action::Restart));
        assert!(Health::Offline.allows(Action::Reboot));
    }

    #[test]
    fn action_request_json_shape() {
        let json = r#"{"action":"restart","scope":{"kind":"slot","project":"alpha","slot":4}}"#;
        let req: ActionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.action, Action::Restart);
        assert_eq!(
            req.scope,
            ActionScope::Slot {
                project: "alpha".to_string(),
                slot: 4
            }
        );

        let all: ActionRequest = serde_json::from_str(r#"{"action":"start","scope":{"kind":"all"}}"#).unwrap();
        assert_eq!(all.scope, ActionScope::All);
    }

    #[test]
    fn action_parse_and_display() {
        assert_eq!("reboot".parse::<Action>(), Ok(Action::Reboot));
        assert!("explode".parse::<Action>().is_err());
        assert_eq!(Action::Restart.to_string(), "restart");
    }
}
