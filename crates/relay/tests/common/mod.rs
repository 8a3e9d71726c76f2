#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderName, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use livenb_core::error::CoreError;
use livenb_core::memory::{MemoryLeaseStore, MemoryUsageStore};
use livenb_relay::config::RelayConfig;
use livenb_relay::jobs::{Job, JobScheduler, SpawnRequest};
use livenb_relay::launcher::ProcessLauncher;
use livenb_relay::relay::Relay;
use livenb_relay::routes;
use livenb_relay::state::AppState;
use livenb_relay::ws::GroupManager;
use tower::ServiceExt;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Records submitted jobs instead of running them.
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<(Job, Option<Duration>)>>,
}

impl RecordingScheduler {
    pub fn jobs(&self) -> Vec<(Job, Option<Duration>)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn spawn_jobs(&self) -> Vec<SpawnRequest> {
        self.jobs()
            .into_iter()
            .filter_map(|(job, _)| match job {
                Job::SpawnWorker(req) => Some(req),
                _ => None,
            })
            .collect()
    }
}

impl JobScheduler for RecordingScheduler {
    fn submit(&self, job: Job) {
        self.jobs.lock().unwrap().push((job, None));
    }

    fn submit_delayed(&self, job: Job, delay: Duration) {
        self.jobs.lock().unwrap().push((job, Some(delay)));
    }
}

/// Records start requests and hands out increasing pids.
#[derive(Default)]
pub struct FakeLauncher {
    started: Mutex<Vec<SpawnRequest>>,
}

impl FakeLauncher {
    pub fn started(&self) -> Vec<SpawnRequest> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn start(&self, request: &SpawnRequest) -> Result<u32, CoreError> {
        let mut started = self.started.lock().unwrap();
        started.push(request.clone());
        Ok(1000 + started.len() as u32)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub struct Fixture {
    pub groups: Arc<GroupManager>,
    pub leases: Arc<MemoryLeaseStore>,
    pub usage: Arc<MemoryUsageStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub relay: Arc<Relay>,
}

pub fn fixture() -> Fixture {
    let groups = Arc::new(GroupManager::new());
    let leases = Arc::new(MemoryLeaseStore::new());
    let usage = Arc::new(MemoryUsageStore::new());
    let scheduler = Arc::new(RecordingScheduler::default());
    let relay = Arc::new(Relay::new(
        Arc::clone(&groups),
        leases.clone(),
        usage.clone(),
        scheduler.clone(),
        chrono::Duration::minutes(2),
    ));
    Fixture {
        groups,
        leases,
        usage,
        scheduler,
        relay,
    }
}

pub fn test_config() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        database_url: String::new(),
        machine_id: "test-host".to_string(),
        max_running_workers: 20,
        stale_worker_minutes: 2,
        worker_command: "livenb-worker".to_string(),
        storage_root: "./media".to_string(),
        media_url: "/media".to_string(),
        heartbeat_secs: 30,
    }
}

/// Router with the request-id layers production uses.
pub fn build_test_app(fixture: &Fixture) -> Router {
    let state = AppState {
        config: Arc::new(test_config()),
        groups: Arc::clone(&fixture.groups),
        relay: Arc::clone(&fixture.relay),
    };
    let request_id_header = HeaderName::from_static("x-request-id");
    routes::router()
        .layer(PropagateRequestIdLayer::new(request_id_header.clone()))
        .layer(SetRequestIdLayer::new(request_id_header, MakeRequestUuid))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn assert_status(response: &Response, status: StatusCode) {
    assert_eq!(response.status(), status, "unexpected status");
}
