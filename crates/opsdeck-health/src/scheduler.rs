//! Poll scheduler. Drives fleet refreshes at an adaptive cadence.
//!
//! The scheduler is `Idle` until a consumer subscribes. It then polls at
//! the slow cadence, or at the fast cadence while a slot is focused. Every
//! transition into a new polling session cancels the previous session's
//! timer and refreshes once right away.
//!
//! Refreshes run in their own task. A refresh still in flight when its
//! session is cancelled runs to completion (probes bound themselves by
//! timeout) and its snapshot is discarded.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use opsdeck_core::config::PollConfig;
use opsdeck_core::{ProjectId, SlotId, SystemSnapshot};

use crate::fleet::FleetHealthService;
use crate::snapshot::SnapshotStore;

/// Produces one fresh snapshot per call.
pub type RefreshFn = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = SystemSnapshot> + Send>>;

/// Wrap a fleet service as a [`RefreshFn`].
pub fn fleet_refresh(fleet: FleetHealthService) -> RefreshFn {
    Arc::new(move || {
        let fleet = fleet.clone();
        Box::pin(async move { fleet.refresh().await })
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Slow,
    Fast,
}

/// The slot an operator has drilled into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Focus {
    pub project: ProjectId,
    pub slot: SlotId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Polling {
        cadence: Cadence,
        focus: Option<Focus>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    pub slow: Duration,
    pub fast: Duration,
}

impl PollIntervals {
    pub fn from_config(config: &PollConfig) -> Self {
        Self {
            slow: config.slow_interval(),
            fast: config.fast_interval(),
        }
    }

    fn of(&self, cadence: Cadence) -> Duration {
        match cadence {
            Cadence::Slow => self.slow,
            Cadence::Fast => self.fast,
        }
    }
}

/// A running polling session.
struct PollSession {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl PollSession {
    fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
    }
}

struct Inner {
    state: PollState,
    session: Option<PollSession>,
}

pub struct PollScheduler {
    refresh: RefreshFn,
    store: SnapshotStore,
    intervals: PollIntervals,
    inner: Mutex<Inner>,
}

impl PollScheduler {
    pub fn new(refresh: RefreshFn, store: SnapshotStore, intervals: PollIntervals) -> Self {
        Self {
            refresh,
            store,
            intervals,
            inner: Mutex::new(Inner {
                state: PollState::Idle,
                session: None,
            }),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn state(&self) -> PollState {
        self.inner.lock().await.state.clone()
    }

    /// Start polling at the slow cadence. No-op while already polling.
    pub async fn subscribe(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state != PollState::Idle {
            return;
        }
        self.restart(&mut inner, None);
    }

    /// Stop polling. Nothing keeps running without a subscriber.
    pub async fn unsubscribe(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.session.take() {
            session.stop();
        }
        if inner.state != PollState::Idle {
            info!("poll scheduler idle");
        }
        inner.state = PollState::Idle;
    }

    /// Focus a slot (fast cadence) or clear the focus (slow cadence).
    ///
    /// Changing focus refreshes immediately and reschedules; repeating the
    /// current focus does nothing. Focusing while idle also subscribes.
    pub async fn focus(&self, focus: Option<Focus>) {
        let mut inner = self.inner.lock().await;
        if let PollState::Polling { focus: current, .. } = &inner.state {
            if *current == focus {
                return;
            }
        }
        self.restart(&mut inner, focus);
    }

    /// Refresh once after `delay`, independent of the polling session.
    ///
    /// Used after a dispatched command, since supervisors restart processes
    /// asynchronously.
    pub fn refresh_after(&self, delay: Duration) -> JoinHandle<()> {
        let refresh = Arc::clone(&self.refresh);
        let store = self.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(?delay, "delayed refresh");
            let generation = store.begin();
            store.publish(generation, refresh().await);
        })
    }

    fn restart(&self, inner: &mut Inner, focus: Option<Focus>) {
        if let Some(old) = inner.session.take() {
            old.stop();
        }

        let cadence = if focus.is_some() {
            Cadence::Fast
        } else {
            Cadence::Slow
        };
        let interval = self.intervals.of(cadence);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh = Arc::clone(&self.refresh);
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            run_poll_loop(refresh, store, interval, shutdown_rx).await;
        });

        info!(?cadence, interval_ms = interval.as_millis() as u64, focus = ?focus, "polling");
        inner.session = Some(PollSession {
            handle,
            shutdown_tx,
        });
        inner.state = PollState::Polling { cadence, focus };
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        if let Some(session) = self.inner.get_mut().session.take() {
            session.stop();
        }
    }
}

/// Refresh immediately, then once per `interval` until shut down.
async fn run_poll_loop(
    refresh: RefreshFn,
    store: SnapshotStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let generation = store.begin();
        let pending = tokio::spawn(refresh());

        tokio::select! {
            result = pending => match result {
                Ok(snapshot) => {
                    if *shutdown.borrow() {
                        break;
                    }
                    store.publish(generation, snapshot);
                }
                Err(e) => error!(error = %e, "refresh task failed"),
            },
            _ = shutdown.changed() => {
                debug!("poll session cancelled during refresh");
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                debug!("poll session cancelled");
                break;
            }
        }
    }
}
