//! opsdeck.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::ports::{MAX_ROLE_INDEX, PortScheme};
use crate::types::{ProjectId, SlotId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpsdeckConfig {
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Host used for projects without their own `host`.
    pub host: String,
    pub timeout: String,
    /// Timeout of the retry against `/` after `health_path` fails.
    pub fallback_timeout: String,
    pub health_path: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            timeout: "3s".to_string(),
            fallback_timeout: "2s".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub timeout: String,
    pub path: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout: "5s".to_string(),
            path: "/server/health-all".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub slow_interval: String,
    pub fast_interval: String,
    /// Delay before the follow-up refresh after an accepted command.
    pub repoll_delay: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            slow_interval: "30s".to_string(),
            fast_interval: "3s".to_string(),
            repoll_delay: "3s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub timeout: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: ProjectId,
    pub name: String,
    pub host: Option<String>,
    /// Display label for the production port.
    pub prod_port: Option<String>,
    /// Liveness port of a simple project.
    pub port: Option<u16>,
    /// Control-plane port. Required for sharded projects.
    pub patcher_port: Option<u16>,
    pub shards: Option<ShardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    pub port_prefix: u16,
    /// Canonical worker roles, in port-index order.
    pub roles: Vec<String>,
    #[serde(default)]
    pub slots: Vec<SlotConfig>,
    /// Overrides `aggregator.path` for this project.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotConfig {
    pub id: SlotId,
    pub tradeline: String,
}

/// A validated project, ready to be probed or commanded.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectTarget {
    pub id: ProjectId,
    pub name: String,
    pub host: String,
    pub prod_port: Option<String>,
    pub patcher_port: Option<u16>,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TargetKind {
    Simple { port: u16 },
    Sharded(ShardLayout),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShardLayout {
    pub scheme: PortScheme,
    pub roles: Vec<String>,
    pub slots: Vec<SlotConfig>,
    pub path: String,
}

impl ShardLayout {
    /// Expected worker port. Validated at load time for every configured
    /// slot; falls back to the slot's main port for unknown combinations.
    pub fn worker_port(&self, role_index: usize, slot_id: SlotId) -> u16 {
        self.scheme
            .worker_port(role_index, slot_id)
            .or_else(|| self.scheme.main_port(slot_id))
            .unwrap_or(self.scheme.prefix)
    }

    pub fn main_port(&self, slot_id: SlotId) -> u16 {
        self.worker_port(0, slot_id)
    }

    pub fn has_slot(&self, slot_id: SlotId) -> bool {
        self.slots.iter().any(|s| s.id == slot_id)
    }
}

impl ProjectTarget {
    pub fn address(&self, port: u16) -> String {
        format!("{}:{}", self.host, port)
    }

    /// Address of the project's control plane, if it has one.
    pub fn control_address(&self) -> Option<String> {
        self.patcher_port.map(|port| self.address(port))
    }
}

impl OpsdeckConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OpsdeckConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate every section and resolve projects into targets.
    pub fn resolve(&self) -> Result<Vec<ProjectTarget>, ConfigError> {
        self.validate_durations()?;

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            if !seen.insert(project.id.as_str()) {
                return Err(ConfigError::DuplicateProject(project.id.clone()));
            }
            targets.push(self.resolve_project(project)?);
        }
        Ok(targets)
    }

    fn resolve_project(&self, project: &ProjectConfig) -> Result<ProjectTarget, ConfigError> {
        let kind = match (&project.port, &project.shards) {
            (Some(port), None) => TargetKind::Simple { port: *port },
            (None, Some(shards)) => {
                if project.patcher_port.is_none() {
                    return Err(ConfigError::MissingAggregator(project.id.clone()));
                }
                TargetKind::Sharded(self.resolve_shards(&project.id, shards)?)
            }
            _ => return Err(ConfigError::AmbiguousKind(project.id.clone())),
        };

        Ok(ProjectTarget {
            id: project.id.clone(),
            name: project.name.clone(),
            host: project
                .host
                .clone()
                .unwrap_or_else(|| self.probe.host.clone()),
            prod_port: project.prod_port.clone(),
            patcher_port: project.patcher_port,
            kind,
        })
    }

    fn resolve_shards(&self, project: &str, shards: &ShardConfig) -> Result<ShardLayout, ConfigError> {
        if shards.roles.is_empty() {
            return Err(ConfigError::NoRoles(project.to_string()));
        }
        if shards.roles.len() > MAX_ROLE_INDEX + 1 {
            return Err(ConfigError::TooManyRoles {
                project: project.to_string(),
                max: MAX_ROLE_INDEX + 1,
                got: shards.roles.len(),
            });
        }

        let scheme = PortScheme::new(shards.port_prefix);
        let mut slot_ids = HashSet::new();
        for slot in &shards.slots {
            if !slot_ids.insert(slot.id) {
                return Err(ConfigError::DuplicateSlot {
                    project: project.to_string(),
                    slot: slot.id,
                });
            }
            for role in 0..shards.roles.len() {
                if scheme.worker_port(role, slot.id).is_none() {
                    return Err(ConfigError::PortOverflow {
                        project: project.to_string(),
                        slot: slot.id,
                        role,
                        prefix: shards.port_prefix,
                    });
                }
            }
        }

        Ok(ShardLayout {
            scheme,
            roles: shards.roles.clone(),
            slots: shards.slots.clone(),
            path: shards
                .path
                .clone()
                .unwrap_or_else(|| self.aggregator.path.clone()),
        })
    }

    fn validate_durations(&self) -> Result<(), ConfigError> {
        let fields: [(&'static str, &str); 7] = [
            ("probe.timeout", &self.probe.timeout),
            ("probe.fallback_timeout", &self.probe.fallback_timeout),
            ("aggregator.timeout", &self.aggregator.timeout),
            ("poll.slow_interval", &self.poll.slow_interval),
            ("poll.fast_interval", &self.poll.fast_interval),
            ("poll.repoll_delay", &self.poll.repoll_delay),
            ("dispatch.timeout", &self.dispatch.timeout),
        ];
        // Zero is rejected too.
        for (field, value) in fields {
            if !parse_duration(value).is_some_and(|d| !d.is_zero()) {
                return Err(ConfigError::InvalidDuration {
                    field,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(3))
    }

    pub fn fallback_timeout(&self) -> Duration {
        parse_duration(&self.fallback_timeout).unwrap_or(Duration::from_secs(2))
    }
}

impl AggregatorConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

impl PollConfig {
    pub fn slow_interval(&self) -> Duration {
        parse_duration(&self.slow_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn fast_interval(&self) -> Duration {
        parse_duration(&self.fast_interval).unwrap_or(Duration::from_secs(3))
    }

    pub fn repoll_delay(&self) -> Duration {
        parse_duration(&self.repoll_delay).unwrap_or(Duration::from_secs(3))
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }
}

/// Parse a duration string like "5s", "500ms", "1m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
