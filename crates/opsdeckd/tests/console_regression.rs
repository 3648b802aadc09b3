//! Console regression tests.
//!
//! Wires the daemon's subsystems against stub upstreams and drives the
//! REST API end to end: snapshot shape, command dispatch with the follow-up
//! re-poll, and the watch/focus lifecycle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use serde_json::{Value, json};
use tower::ServiceExt;

use opsdeck_api::{ApiState, build_router};
use opsdeck_control::CommandDispatcher;
use opsdeck_core::OpsdeckConfig;
use opsdeck_health::{FleetHealthService, PollIntervals, PollScheduler, SnapshotStore, fleet_refresh};

type Seen = Arc<Mutex<Vec<String>>>;

async fn health_all() -> Json<Value> {
    Json(json!({
        "success": true,
        "slots": [
            {
                "id": 1,
                "processes": [
                    { "name": "bids-01-engine", "status": "online", "pid": 101, "uptime": 65000, "monit": { "cpu": 1.5, "memory": 1000 } },
                    { "name": "bids-01-discovery", "status": "online", "monit": { "cpu": 0.5, "memory": 500 } }
                ]
            },
            {
                "id": "2",
                "processes": [
                    { "name": "bids-02-engine", "status": "online" },
                    { "name": "bids-02-discovery", "status": "errored", "restarts": 7 }
                ]
            }
        ]
    }))
}

async fn command(
    State(seen): State<Seen>,
    Path((action, target)): Path<(String, String)>,
) -> Json<Value> {
    seen.lock().unwrap().push(format!("{action}/{target}"));
    Json(json!({ "success": true, "message": "queued" }))
}

/// One stub serving the aggregator, the command endpoints, and a
/// plain `/health` for simple projects.
async fn upstream() -> (u16, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/server/health-all", get(health_all))
        .route("/server/{action}/{target}", post(command))
        .route("/health", get(|| async { "ok" }))
        .with_state(Arc::clone(&seen));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (port, seen)
}

fn config(upstream_port: u16) -> OpsdeckConfig {
    toml::from_str(&format!(
        r#"
[probe]
timeout = "300ms"
fallback_timeout = "200ms"

[aggregator]
timeout = "300ms"

[poll]
slow_interval = "30s"
fast_interval = "3s"
repoll_delay = "50ms"

[[projects]]
id = "bids"
name = "Bid Engine"
patcher_port = {upstream_port}

[projects.shards]
port_prefix = 5
roles = ["Engine", "Discovery"]
slots = [
    {{ id = 1, tradeline = "Construction" }},
    {{ id = 2, tradeline = "Janitorial" }},
    {{ id = 3, tradeline = "Roofing" }},
]

[[projects]]
id = "dark"
name = "Dark"
patcher_port = 1

[projects.shards]
port_prefix = 6
roles = ["Engine"]
slots = [{{ id = 1, tradeline = "Idle" }}]

[[projects]]
id = "portal"
name = "Portal"
port = {upstream_port}
"#
    ))
    .unwrap()
}

struct Console {
    state: ApiState,
    router: Router,
    seen: Seen,
}

async fn console() -> Console {
    let (port, seen) = upstream().await;
    let config = config(port);

    let store = SnapshotStore::new();
    let scheduler = PollScheduler::new(
        fleet_refresh(FleetHealthService::from_config(&config).unwrap()),
        store.clone(),
        PollIntervals::from_config(&config.poll),
    );
    let state = ApiState {
        store,
        scheduler: Arc::new(scheduler),
        dispatcher: CommandDispatcher::from_config(&config).unwrap(),
        repoll_delay: config.poll.repoll_delay(),
    };
    let router = build_router(state.clone());
    Console {
        state,
        router,
        seen,
    }
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn snapshot_is_empty_before_first_refresh() {
    let c = console().await;

    let req = Request::builder()
        .uri("/api/v1/snapshot")
        .body(Body::empty())
        .unwrap();
    let resp = c.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["projects"], json!([]));
    assert_eq!(body["data"]["last_check"], 0);
}

#[tokio::test]
async fn snapshot_reflects_a_refresh() {
    let c = console().await;
    let mut rx = c.state.store.watch();

    let req = json_request("POST", "/api/v1/watch", json!(null));
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["data"]["state"], "polling");

    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();

    let req = Request::builder()
        .uri("/api/v1/snapshot")
        .body(Body::empty())
        .unwrap();
    let body = body_json(c.router.clone().oneshot(req).await.unwrap()).await;
    let data = &body["data"];

    let projects = data["projects"].as_array().unwrap();
    let ids: Vec<&str> = projects.iter().map(|p| p["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["bids", "dark", "portal"]);

    // Slot 1 all online, slot 2 has an errored worker, slot 3 unreported.
    let bids = &projects[0];
    let slots = bids["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[0]["health"], "healthy");
    assert_eq!(slots[0]["main_port"], 5001);
    assert_eq!(slots[0]["cpu"], 2.0);
    assert_eq!(slots[0]["memory"], 1500);
    assert_eq!(slots[0]["workers"][0]["uptime"], "1m");
    assert_eq!(slots[1]["health"], "degraded");
    assert_eq!(slots[1]["workers"][1]["port"], 5102);
    assert_eq!(slots[1]["workers"][1]["status"], "error");
    assert_eq!(slots[1]["workers"][1]["error_count"], 7);
    assert_eq!(slots[2]["health"], "offline");
    assert_eq!(bids["health"], "degraded");

    // Unreachable aggregator: every slot offline, project critical.
    let dark = &projects[1];
    assert_eq!(dark["health"], "critical");
    assert_eq!(dark["slots"][0]["health"], "offline");
    assert_eq!(dark["slots"][0]["workers"][0]["port"], 6101);

    let portal = &projects[2];
    assert_eq!(portal["health"], "healthy");
    assert_eq!(portal["endpoint"]["status"], "online");

    assert_eq!(data["counts"]["healthy"], 1);
    assert_eq!(data["counts"]["degraded"], 1);
    assert_eq!(data["counts"]["critical"], 1);
    assert_eq!(data["counts"]["offline"], 0);
    assert_eq!(data["slot_counts"]["bids"]["healthy"], 1);
    assert_eq!(data["slot_counts"]["bids"]["offline"], 1);
    assert!(data["slot_counts"].get("portal").is_none());

    c.state.scheduler.unsubscribe().await;
}

#[tokio::test]
async fn accepted_action_triggers_a_repoll() {
    let c = console().await;
    let mut rx = c.state.store.watch();

    let req = json_request(
        "POST",
        "/api/v1/actions",
        json!({ "action": "restart", "scope": { "kind": "slot", "project": "bids", "slot": 2 } }),
    );
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["accepted"], true);
    assert_eq!(*c.seen.lock().unwrap(), vec!["restart/2".to_string()]);

    // The scheduler is idle; only the delayed re-poll can publish.
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.state.store.current().projects().len(), 3);
}

#[tokio::test]
async fn destructive_actions_need_confirmation() {
    let c = console().await;

    let stop = json!({ "action": "stop", "scope": { "kind": "worker", "project": "bids", "port": 5101 } });
    let resp = c
        .router
        .clone()
        .oneshot(json_request("POST", "/api/v1/actions", stop.clone()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["success"], false);
    assert!(c.seen.lock().unwrap().is_empty());

    let mut confirmed = stop;
    confirmed["confirm"] = json!(true);
    let resp = c
        .router
        .clone()
        .oneshot(json_request("POST", "/api/v1/actions", confirmed))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(*c.seen.lock().unwrap(), vec!["stop/5101".to_string()]);
}

#[tokio::test]
async fn fleet_wide_action_reports_partial_failure() {
    let c = console().await;
    let mut rx = c.state.store.watch();

    let req = json_request(
        "POST",
        "/api/v1/actions",
        json!({ "action": "restart", "scope": { "kind": "all" }, "confirm": true }),
    );
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("dark"));
    assert_eq!(*c.seen.lock().unwrap(), vec!["restart/all".to_string()]);

    // bids accepted the restart, so the scheduler still re-polls.
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.state.store.current().projects().len(), 3);
}

#[tokio::test]
async fn rejected_action_does_not_repoll() {
    let c = console().await;
    let mut rx = c.state.store.watch();

    let req = json_request(
        "POST",
        "/api/v1/actions",
        json!({ "action": "restart", "scope": { "kind": "project", "project": "dark" } }),
    );
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let waited = tokio::time::timeout(Duration::from_millis(500), rx.changed()).await;
    assert!(waited.is_err());
    assert_eq!(c.state.store.current().last_check, 0);
}

#[tokio::test]
async fn unknown_targets_are_not_found() {
    let c = console().await;

    let req = json_request(
        "POST",
        "/api/v1/actions",
        json!({ "action": "start", "scope": { "kind": "slot", "project": "bids", "slot": 9 } }),
    );
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn focus_switches_cadence() {
    let c = console().await;

    let req = json_request("PUT", "/api/v1/watch/focus", json!({ "project": "bids", "slot": 1 }));
    let resp = c.router.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["state"], "polling");
    assert_eq!(body["data"]["cadence"], "fast");
    assert_eq!(body["data"]["focus"]["slot"], 1);

    let req = json_request("PUT", "/api/v1/watch/focus", json!({ "project": null, "slot": null }));
    let body = body_json(c.router.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(body["data"]["cadence"], "slow");
    assert_eq!(body["data"]["focus"], Value::Null);

    let req = Request::builder()
        .method("DELETE")
        .uri("/api/v1/watch")
        .body(Body::empty())
        .unwrap();
    let body = body_json(c.router.clone().oneshot(req).await.unwrap()).await;
    assert_eq!(body["data"]["state"], "idle");

    let req = Request::builder()
        .uri("/api/v1/watch")
        .body(Body::empty())
        .unwrap();
    let body = body_json(c.router.oneshot(req).await.unwrap()).await;
    assert_eq!(body["data"]["state"], "idle");
}
