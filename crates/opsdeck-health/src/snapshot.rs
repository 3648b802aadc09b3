//! Shared holder for the latest fleet snapshot.
//!
//! Snapshots are replaced whole; readers get an `Arc` to either the
//! previous or the new snapshot, never a mix of the two.
//!
//! Every refresh takes a generation from [`SnapshotStore::begin`] before it
//! starts. A snapshot is only published if no refresh that started later
//! has already published, so a slow refresh cannot overwrite a fresher one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::debug;

use opsdeck_core::SystemSnapshot;

#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<SystemSnapshot>>>,
    /// Last generation handed out.
    started: Arc<AtomicU64>,
    /// Generation of the snapshot currently held. Only written while the
    /// channel's value is locked.
    published: Arc<AtomicU64>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(SystemSnapshot::empty()));
        Self {
            tx: Arc::new(tx),
            started: Arc::new(AtomicU64::new(0)),
            published: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn current(&self) -> Arc<SystemSnapshot> {
        self.tx.borrow().clone()
    }

    /// Reserve the generation for a refresh that is about to start.
    pub fn begin(&self) -> u64 {
        self.started.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publish the result of the refresh that called [`begin`](Self::begin)
    /// with `generation`. Returns `false` when a newer refresh already
    /// published and the snapshot was dropped.
    pub fn publish(&self, generation: u64, snapshot: SystemSnapshot) -> bool {
        let published = &self.published;
        let accepted = self.tx.send_if_modified(move |current| {
            if generation <= published.load(Ordering::SeqCst) {
                return false;
            }
            *current = Arc::new(snapshot);
            published.store(generation, Ordering::SeqCst);
            true
        });
        if !accepted {
            debug!(generation, "dropping snapshot from an older refresh");
        }
        accepted
    }

    /// Receiver notified on every publish.
    pub fn watch(&self) -> watch::Receiver<Arc<SystemSnapshot>> {
        self.tx.subscribe()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}
