//! Liveness probe for a single endpoint.
//!
//! A probe cares about process liveness only: any completed HTTP response,
//! including 4xx and 5xx, counts as reachable. When the liveness path fails
//! at the transport level the root path is tried once with a shorter
//! timeout, since some processes never implement `/health`.

use std::time::{Duration, Instant};

use tracing::debug;

use opsdeck_core::config::ProbeConfig;

use crate::transport;

/// Result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    /// Round-trip time of the attempt that got a response.
    pub latency_ms: Option<u64>,
}

impl ProbeOutcome {
    pub fn unreachable() -> Self {
        Self {
            reachable: false,
            latency_ms: None,
        }
    }
}

/// Issues bounded liveness checks.
#[derive(Debug, Clone)]
pub struct Prober {
    health_path: String,
    timeout: Duration,
    fallback_timeout: Duration,
}

impl Prober {
    pub fn new(health_path: impl Into<String>, timeout: Duration, fallback_timeout: Duration) -> Self {
        Self {
            health_path: health_path.into(),
            timeout,
            fallback_timeout,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(
            config.health_path.clone(),
            config.timeout(),
            config.fallback_timeout(),
        )
    }

    /// Longest time a single probe can take.
    pub fn worst_case(&self) -> Duration {
        self.timeout + self.fallback_timeout
    }

    pub async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        let address = format!("{host}:{port}");

        if let Some(latency) = attempt(&address, &self.health_path, self.timeout).await {
            return reached(latency);
        }
        if self.health_path == "/" {
            return ProbeOutcome::unreachable();
        }

        debug!(%address, path = %self.health_path, "liveness path failed, retrying root");
        match attempt(&address, "/", self.fallback_timeout).await {
            Some(latency) => reached(latency),
            None => ProbeOutcome::unreachable(),
        }
    }
}

async fn attempt(address: &str, path: &str, timeout: Duration) -> Option<Duration> {
    let started = Instant::now();
    match transport::get(address, path, timeout).await {
        Ok(reply) => {
            if !reply.status.is_success() {
                debug!(%address, %path, status = %reply.status, "probe got non-2xx, still live");
            }
            Some(started.elapsed())
        }
        Err(e) => {
            debug!(%address, %path, error = %e, "probe failed");
            None
        }
    }
}

fn reached(latency: Duration) -> ProbeOutcome {
    ProbeOutcome {
        reachable: true,
        latency_ms: Some(latency.as_millis() as u64),
    }
}
