//! opsdeck-health — fleet health probing and polling.
//!
//! Determines, for every configured project, whether its processes are
//! reachable, and rolls the results up into one snapshot per refresh.
//!
//! # Architecture
//!
//! ```text
//! PollScheduler (Idle | Polling(slow | fast))
//!   └── FleetHealthService::refresh()      one task per refresh
//!         ├── sharded project → AggregatorClient → build_slots()
//!         │                       └── on failure: placeholder_slots()
//!         ├── simple project  → Prober (/health, then /)
//!         └── SystemSnapshot  → SnapshotStore (replaced whole)
//! ```
//!
//! # Failure handling
//!
//! Transport failures, timeouts, and malformed aggregator bodies never
//! escape a refresh. They surface as `offline` workers and slots, so the
//! snapshot always covers every configured project.

pub mod aggregator;
pub mod fleet;
pub mod prober;
pub mod scheduler;
pub mod snapshot;
pub mod transport;

pub use aggregator::{AggregatorClient, AggregatorError, UpstreamReport};
pub use fleet::FleetHealthService;
pub use prober::{ProbeOutcome, Prober};
pub use scheduler::{Cadence, Focus, PollIntervals, PollScheduler, PollState, fleet_refresh};
pub use snapshot::SnapshotStore;
pub use transport::{HttpReply, TransportError};
