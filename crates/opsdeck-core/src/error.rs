//! Error types for opsdeck configuration.

use thiserror::Error;

/// Errors found while validating an `opsdeck.toml`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("duplicate project id: {0}")]
    DuplicateProject(String),

    #[error("project {0}: set exactly one of `port` or `[shards]`")]
    AmbiguousKind(String),

    #[error("project {0}: sharded projects need a `patcher_port`")]
    MissingAggregator(String),

    #[error("project {0}: shard role list is empty")]
    NoRoles(String),

    #[error("project {project}: at most {max} roles are supported, got {got}")]
    TooManyRoles {
        project: String,
        max: usize,
        got: usize,
    },

    #[error("project {project}: duplicate slot id {slot}")]
    DuplicateSlot { project: String, slot: u16 },

    #[error("project {project}: slot {slot} role {role} has no valid port under prefix {prefix}")]
    PortOverflow {
        project: String,
        slot: u16,
        role: usize,
        prefix: u16,
    },

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },
}
