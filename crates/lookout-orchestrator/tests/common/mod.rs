//! Shared fixtures: a stateful fake worker served by wiremock.

#![allow(dead_code)]

use async_trait::async_trait;
use lookout_core::backoff::BackoffConfig;
use lookout_core::config::{
    OrchestratorConfig, PollingConfig, ReadinessConfig, TimeoutConfig, WorkerConfig,
};
use lookout_core::{LookoutError, Result, WorkerKind};
use lookout_worker::{ProcessSpawner, SpawnedProcess, WorkerDescriptor};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, Request, Respond, ResponseTemplate,
    matchers::{method, path},
};

/// Mutable state of a fake worker.
#[derive(Debug, Default)]
pub struct WorkerState {
    pub active: bool,
    pub session_id: u64,
    pub result: Option<Value>,
    pub recognized: Vec<Value>,
    pub starts: u32,
    pub stops: u32,
    /// Produce a result when stopped, like the multi-subject worker
    pub result_on_stop: bool,
}

/// A worker that behaves like the real ones: `/start` opens a new session,
/// `/stop` ends it, `/status` and `/current-frame` reflect the state.
#[derive(Debug, Clone)]
pub struct FakeWorker {
    pub state: Arc<Mutex<WorkerState>>,
    pub frame_delay: Duration,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(WorkerState {
                session_id: 100,
                ..WorkerState::default()
            })),
            frame_delay: Duration::ZERO,
        }
    }

    pub fn with_result_on_stop(self) -> Self {
        self.state.lock().unwrap().result_on_stop = true;
        self
    }

    pub fn with_frame_delay(mut self, delay: Duration) -> Self {
        self.frame_delay = delay;
        self
    }

    pub fn recognise(&self, email: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .recognized
            .push(json!({"email": email, "name": name}));
    }

    pub fn finish(&self, success: bool, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.active = false;
        state.result = Some(json!({
            "success": success,
            "message": message,
            "recognized_users": state.recognized.clone(),
            "session_id": state.session_id,
        }));
    }

    /// End the run without producing a result.
    pub fn go_idle(&self) {
        self.state.lock().unwrap().active = false;
    }

    pub fn starts(&self) -> u32 {
        self.state.lock().unwrap().starts
    }

    pub fn stops(&self) -> u32 {
        self.state.lock().unwrap().stops
    }

    pub fn session_id(&self) -> u64 {
        self.state.lock().unwrap().session_id
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/start"))
            .respond_with(Route::Start(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/stop"))
            .respond_with(Route::Stop(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .respond_with(Route::Status(self.clone()))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/current-frame"))
            .respond_with(Route::Frame(self.clone()))
            .mount(server)
            .await;
    }
}

enum Route {
    Start(FakeWorker),
    Stop(FakeWorker),
    Status(FakeWorker),
    Frame(FakeWorker),
}

impl Respond for Route {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        match self {
            Route::Start(worker) => {
                let mut state = worker.state.lock().unwrap();
                if state.active {
                    return ResponseTemplate::new(409)
                        .set_body_json(json!({"success": false, "message": "Already running"}));
                }
                state.active = true;
                state.session_id += 1;
                state.starts += 1;
                state.result = None;
                state.recognized.clear();
                ResponseTemplate::new(200).set_body_json(
                    json!({"success": true, "message": "Started", "session_id": state.session_id}),
                )
            }
            Route::Stop(worker) => {
                let mut state = worker.state.lock().unwrap();
                state.stops += 1;
                if state.active && state.result_on_stop && state.result.is_none() {
                    let count = state.recognized.len();
                    state.result = Some(json!({
                        "success": count > 0,
                        "message": format!("Authentication stopped manually. {count} users recognized."),
                        "recognized_users": state.recognized.clone(),
                        "session_id": state.session_id,
                    }));
                }
                state.active = false;
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "message": "Stopped", "session_id": state.session_id}))
            }
            Route::Status(worker) => {
                let state = worker.state.lock().unwrap();
                let body = match &state.result {
                    Some(result) => result.clone(),
                    None => json!({
                        "status": if state.active { "running" } else { "idle" },
                        "active": state.active,
                        "recognized_users": state.recognized.clone(),
                        "session_id": state.session_id,
                    }),
                };
                ResponseTemplate::new(200).set_body_json(body)
            }
            Route::Frame(worker) => {
                let state = worker.state.lock().unwrap();
                let frame = state.active.then(|| format!("frame-{}", state.session_id));
                ResponseTemplate::new(200)
                    .set_body_json(json!({
                        "frame": frame,
                        "active": state.active,
                        "session_id": state.session_id,
                    }))
                    .set_delay(worker.frame_delay)
            }
        }
    }
}

/// Counts launches; never creates processes.
#[derive(Debug, Default)]
pub struct CountingSpawner {
    pub spawns: AtomicU32,
    pub fail: bool,
}

impl CountingSpawner {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessSpawner for CountingSpawner {
    async fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<SpawnedProcess> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LookoutError::spawn_failed(
                descriptor.kind,
                "python: No such file or directory",
            ));
        }
        Ok(SpawnedProcess { pid: 4_000_001 })
    }
}

/// Worker settings pointing at `address`, tuned for fast tests.
pub fn worker_config(kind: WorkerKind, address: &str) -> WorkerConfig {
    WorkerConfig {
        address: address.to_string(),
        pid_file: None,
        readiness: ReadinessConfig {
            max_attempts: 2,
            spacing_ms: 10,
        },
        reset_pause_ms: 10,
        status_interval_ms: 40,
        auto_finalize_after_ms: 0,
        ..WorkerConfig::defaults_for(kind)
    }
}

/// Orchestrator settings with every worker unreachable and short timings.
pub fn test_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig {
        timeouts: TimeoutConfig {
            health_ms: 300,
            readiness_probe_ms: 300,
            start_ms: 500,
            stop_ms: 500,
            force_stop_ms: 300,
            status_ms: 500,
            frame_ms: 500,
        },
        polling: PollingConfig {
            frame_interval_ms: 20,
            finalize_timeout_ms: 1_000,
            max_consecutive_failures: 3,
            backoff: BackoffConfig {
                initial_delay_ms: 10,
                max_delay_ms: 40,
                multiplier: 2.0,
            },
        },
        ..OrchestratorConfig::default()
    };
    for kind in WorkerKind::all() {
        config = config.with_worker(kind, worker_config(kind, "127.0.0.1:9"));
    }
    config
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
