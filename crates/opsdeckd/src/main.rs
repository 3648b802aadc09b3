//! opsdeckd — the opsdeck daemon.
//!
//! Single binary that assembles the console backend:
//! - Fleet health service (probes + aggregator client)
//! - Snapshot store and poll scheduler
//! - Command dispatcher
//! - REST API
//!
//! # Usage
//!
//! ```text
//! opsdeckd serve --config opsdeck.toml --port 8480
//! opsdeckd check --config opsdeck.toml
//! opsdeckd action restart --project bids --slot 3
//! ```

mod serve;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tracing::info;

use opsdeck_api::SnapshotView;
use opsdeck_control::CommandDispatcher;
use opsdeck_core::{Action, ActionRequest, ActionScope, OpsdeckConfig, SlotId};
use opsdeck_health::FleetHealthService;

#[derive(Parser)]
#[command(name = "opsdeckd", about = "opsdeck fleet health daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the REST API and poll the fleet while subscribed.
    Serve {
        /// Path to the fleet configuration.
        #[arg(long, default_value = "opsdeck.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8480")]
        port: u16,

        /// Wait for a consumer to subscribe instead of polling at startup.
        #[arg(long)]
        no_autostart: bool,
    },

    /// Run one refresh and print the snapshot as JSON.
    Check {
        #[arg(long, default_value = "opsdeck.toml")]
        config: PathBuf,
    },

    /// Dispatch one lifecycle action.
    Action {
        #[arg(long, default_value = "opsdeck.toml")]
        config: PathBuf,

        /// start, stop, restart, or reboot.
        action: Action,

        /// Target project.
        #[arg(long, required_unless_present = "all")]
        project: Option<String>,

        /// Target one slot of a sharded project.
        #[arg(long, conflicts_with = "port")]
        slot: Option<SlotId>,

        /// Target one worker by port.
        #[arg(long)]
        port: Option<u16>,

        /// Target every project with a control plane.
        #[arg(long, conflicts_with_all = ["project", "slot", "port"])]
        all: bool,

        /// Confirm a destructive action.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "info,opsdeckd=debug,opsdeck_health=debug,opsdeck_control=debug",
                )
            }),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            no_autostart,
        } => serve::run(load_config(&config)?, port, !no_autostart).await,
        Command::Check { config } => run_check(load_config(&config)?).await,
        Command::Action {
            config,
            action,
            project,
            slot,
            port,
            all,
            yes,
        } => {
            let scope = action_scope(project, slot, port, all)?;
            run_action(load_config(&config)?, ActionRequest::new(action, scope), yes).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<OpsdeckConfig> {
    let config = OpsdeckConfig::from_file(path)
        .map_err(|e| anyhow::anyhow!("load {}: {e}", path.display()))?;
    info!(path = %path.display(), projects = config.projects.len(), "configuration loaded");
    Ok(config)
}

fn action_scope(
    project: Option<String>,
    slot: Option<SlotId>,
    port: Option<u16>,
    all: bool,
) -> anyhow::Result<ActionScope> {
    if all {
        return Ok(ActionScope::All);
    }
    let project = project.ok_or_else(|| anyhow::anyhow!("--project or --all is required"))?;
    Ok(match (slot, port) {
        (Some(slot), _) => ActionScope::Slot { project, slot },
        (None, Some(port)) => ActionScope::Worker { project, port },
        (None, None) => ActionScope::Project { project },
    })
}

async fn run_check(config: OpsdeckConfig) -> anyhow::Result<()> {
    let fleet = FleetHealthService::from_config(&config)?;
    let snapshot = fleet.refresh().await;
    println!("{}", serde_json::to_string_pretty(&SnapshotView::new(&snapshot))?);
    Ok(())
}

async fn run_action(
    config: OpsdeckConfig,
    request: ActionRequest,
    confirmed: bool,
) -> anyhow::Result<()> {
    let dispatcher = CommandDispatcher::from_config(&config)?;
    let ack = dispatcher
        .dispatch(&request, confirmed)
        .await
        .map_err(|e| match e {
            opsdeck_control::DispatchError::ConfirmationRequired(action) => {
                anyhow::anyhow!("{action} needs confirmation; re-run with --yes")
            }
            other => other.into(),
        })?;
    println!("{}", serde_json::to_string_pretty(&ack)?);
    Ok(())
}
