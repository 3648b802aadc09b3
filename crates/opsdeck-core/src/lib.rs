//! opsdeck-core — domain types and pure logic for fleet health.
//!
//! Everything in this crate is synchronous and free of I/O:
//!
//! - [`types`]: workers, slots, projects, snapshots, and operator actions
//! - [`rollup`]: the worker → slot → project health roll-up
//! - [`ports`]: the deterministic worker port encoding
//! - [`config`]: `opsdeck.toml` parsing and validation into [`ProjectTarget`]s
//!
//! Derived values (slot health, project health, counters) are computed from
//! the records they summarize and are never stored independently of them.

pub mod config;
pub mod error;
pub mod ports;
pub mod rollup;
pub mod types;

pub use config::{OpsdeckConfig, ProjectTarget, ShardLayout, TargetKind};
pub use error::ConfigError;
pub use ports::PortScheme;
pub use rollup::{HealthCounts, project_health, slot_health};
pub use types::*;
