//! Status roll-up: worker statuses → slot health → project health.
//!
//! Both functions are pure and recompute from their input on every call.
//! They are parallel in shape but differ in the "all failed" case: a slot
//! with no online worker is `Critical`, a project with no healthy or
//! degraded slot is `Critical`, and an empty input is `Offline` for both.

use serde::Serialize;

use crate::types::{Health, Worker};

/// Slot health from its worker list.
pub fn slot_health(workers: &[Worker]) -> Health {
    if workers.is_empty() {
        return Health::Offline;
    }
    let online = workers.iter().filter(|w| w.is_online()).count();
    if online == 0 {
        Health::Critical
    } else if online == workers.len() {
        Health::Healthy
    } else {
        Health::Degraded
    }
}

/// Project health from the health of its slots.
pub fn project_health(slots: &[Health]) -> Health {
    if slots.is_empty() {
        return Health::Offline;
    }
    let serving = slots
        .iter()
        .filter(|h| matches!(h, Health::Healthy | Health::Degraded))
        .count();
    if serving == 0 {
        Health::Critical
    } else if slots.iter().all(|h| *h == Health::Healthy) {
        Health::Healthy
    } else {
        Health::Degraded
    }
}

/// Counts of items per health category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthCounts {
    pub healthy: usize,
    pub degraded: usize,
    pub critical: usize,
    pub offline: usize,
}

impl HealthCounts {
    /// Count a fresh sequence of health values.
    pub fn tally(healths: impl IntoIterator<Item = Health>) -> Self {
        healths
            .into_iter()
            .fold(Self::default(), |mut counts, health| {
                match health {
                    Health::Healthy => counts.healthy += 1,
                    Health::Degraded => counts.degraded += 1,
                    Health::Critical => counts.critical += 1,
                    Health::Offline => counts.offline += 1,
                }
                counts
            })
    }

    pub fn total(&self) -> usize {
        self.healthy + self.degraded + self.critical + self.offline
    }
}
