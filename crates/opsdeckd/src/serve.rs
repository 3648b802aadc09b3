//! Serve mode: polls the fleet and exposes the REST API.
//!
//! In this mode, the daemon:
//! 1. Resolves the configured projects into probe/command targets
//! 2. Builds the fleet health service, snapshot store and poll scheduler
//! 3. Subscribes the scheduler unless told to wait for a consumer
//! 4. Serves the REST API until Ctrl-C, then stops polling

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info};

use opsdeck_api::{ApiState, build_router};
use opsdeck_control::CommandDispatcher;
use opsdeck_core::OpsdeckConfig;
use opsdeck_health::{FleetHealthService, PollIntervals, PollScheduler, SnapshotStore, fleet_refresh};

pub async fn run(config: OpsdeckConfig, port: u16, autostart: bool) -> anyhow::Result<()> {
    info!("opsdeck daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let fleet = FleetHealthService::from_config(&config)?;
    info!(projects = fleet.targets().len(), "fleet health service initialized");

    let dispatcher = CommandDispatcher::from_config(&config)?;

    let store = SnapshotStore::new();
    let intervals = PollIntervals::from_config(&config.poll);
    let scheduler = Arc::new(PollScheduler::new(
        fleet_refresh(fleet),
        store.clone(),
        intervals,
    ));
    info!(
        slow_ms = intervals.slow.as_millis() as u64,
        fast_ms = intervals.fast.as_millis() as u64,
        "poll scheduler initialized"
    );

    if autostart {
        scheduler.subscribe().await;
    }

    // ── Start API server ───────────────────────────────────────

    let router = build_router(ApiState {
        store,
        scheduler: Arc::clone(&scheduler),
        dispatcher,
        repoll_delay: config.poll.repoll_delay(),
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.unsubscribe().await;

    info!("opsdeck daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
