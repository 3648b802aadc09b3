//! opsdeck-api — REST surface for the operations console.
//!
//! The presentation layer reads one snapshot and writes one kind of
//! command; the remaining routes tell the poll scheduler what is on
//! screen.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/snapshot` | Current fleet snapshot with counts |
//! | POST | `/api/v1/actions` | Dispatch a lifecycle action |
//! | GET | `/api/v1/watch` | Poll scheduler state |
//! | POST | `/api/v1/watch` | Subscribe (start polling) |
//! | DELETE | `/api/v1/watch` | Unsubscribe (stop polling) |
//! | PUT | `/api/v1/watch/focus` | Focus or unfocus a slot |

pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post, put};
use opsdeck_control::CommandDispatcher;
use opsdeck_health::{PollScheduler, SnapshotStore};

pub use handlers::SnapshotView;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: SnapshotStore,
    pub scheduler: Arc<PollScheduler>,
    pub dispatcher: CommandDispatcher,
    /// Delay before re-polling after an accepted command.
    pub repoll_delay: Duration,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/snapshot", get(handlers::get_snapshot))
        .route("/actions", post(handlers::post_action))
        .route(
            "/watch",
            get(handlers::watch_state)
                .post(handlers::subscribe)
                .delete(handlers::unsubscribe),
        )
        .route("/watch/focus", put(handlers::set_focus))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
