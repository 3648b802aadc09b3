//! REST API handlers.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use opsdeck_control::DispatchError;
use opsdeck_core::{Action, ActionRequest, ActionScope, HealthCounts, SlotId, SystemSnapshot};
use opsdeck_health::Focus;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Snapshot ───────────────────────────────────────────────────

/// Snapshot plus counters derived from it at read time.
#[derive(serde::Serialize)]
pub struct SnapshotView<'a> {
    #[serde(flatten)]
    snapshot: &'a SystemSnapshot,
    counts: HealthCounts,
    slot_counts: BTreeMap<&'a str, HealthCounts>,
}

impl<'a> SnapshotView<'a> {
    pub fn new(snapshot: &'a SystemSnapshot) -> Self {
        Self {
            snapshot,
            counts: snapshot.counts(),
            slot_counts: snapshot
                .projects()
                .iter()
                .filter(|p| p.is_sharded())
                .map(|p| (p.id.as_str(), p.slot_counts()))
                .collect(),
        }
    }
}

/// GET /api/v1/snapshot
pub async fn get_snapshot(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.store.current();
    ApiResponse::ok(SnapshotView::new(&snapshot)).into_response()
}

// ── Actions ────────────────────────────────────────────────────

/// Action request body.
#[derive(serde::Deserialize)]
pub struct ActionBody {
    pub action: Action,
    pub scope: ActionScope,
    #[serde(default)]
    pub confirm: bool,
}

fn dispatch_status(err: &DispatchError) -> StatusCode {
    match err {
        DispatchError::ConfirmationRequired(_) => StatusCode::CONFLICT,
        DispatchError::UnknownProject(_)
        | DispatchError::UnknownSlot { .. }
        | DispatchError::UnknownWorker { .. } => StatusCode::NOT_FOUND,
        DispatchError::NoControlPlane(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DispatchError::Unreachable { .. }
        | DispatchError::Rejected { .. }
        | DispatchError::Incomplete { .. } => StatusCode::BAD_GATEWAY,
    }
}

/// POST /api/v1/actions
pub async fn post_action(
    State(state): State<ApiState>,
    Json(body): Json<ActionBody>,
) -> impl IntoResponse {
    let request = ActionRequest::new(body.action, body.scope);
    match state.dispatcher.dispatch(&request, body.confirm).await {
        Ok(ack) => {
            // Supervisors restart asynchronously; look again shortly.
            state.scheduler.refresh_after(state.repoll_delay);
            ApiResponse::ok(ack).into_response()
        }
        Err(e) => {
            // Some control planes took the command; their projects still change.
            if matches!(e, DispatchError::Incomplete { accepted, .. } if accepted > 0) {
                state.scheduler.refresh_after(state.repoll_delay);
            }
            error_response(&e.to_string(), dispatch_status(&e)).into_response()
        }
    }
}

// ── Watch ──────────────────────────────────────────────────────

/// GET /api/v1/watch
pub async fn watch_state(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.scheduler.state().await).into_response()
}

/// POST /api/v1/watch
pub async fn subscribe(State(state): State<ApiState>) -> impl IntoResponse {
    state.scheduler.subscribe().await;
    ApiResponse::ok(state.scheduler.state().await).into_response()
}

/// DELETE /api/v1/watch
pub async fn unsubscribe(State(state): State<ApiState>) -> impl IntoResponse {
    state.scheduler.unsubscribe().await;
    ApiResponse::ok(state.scheduler.state().await).into_response()
}

/// Focus body. Both fields set focuses a slot; both absent clears focus.
#[derive(serde::Deserialize)]
pub struct FocusBody {
    pub project: Option<String>,
    pub slot: Option<SlotId>,
}

/// PUT /api/v1/watch/focus
pub async fn set_focus(
    State(state): State<ApiState>,
    Json(body): Json<FocusBody>,
) -> impl IntoResponse {
    let focus = match (body.project, body.slot) {
        (Some(project), Some(slot)) => {
            if !state.dispatcher.has_slot(&project, slot) {
                return error_response("unknown slot", StatusCode::NOT_FOUND).into_response();
            }
            Some(Focus { project, slot })
        }
        (None, None) => None,
        _ => {
            return error_response("project and slot go together", StatusCode::BAD_REQUEST)
                .into_response();
        }
    };

    info!(?focus, "focus changed");
    state.scheduler.focus(focus).await;
    ApiResponse::ok(state.scheduler.state().await).into_response()
}
