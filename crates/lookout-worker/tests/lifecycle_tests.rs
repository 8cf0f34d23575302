//! Integration tests for the worker lifecycle manager.
//!
//! Workers are wiremock servers; process launching is replaced by a fake
//! spawner that only counts launches.

use async_trait::async_trait;
use lookout_core::config::TimeoutConfig;
use lookout_core::{HealthState, LookoutError, Result, WorkerKind};
use lookout_worker::{
    EnsureOutcome, ForceStopOutcome, PidSource, ProcessSpawner, SpawnedProcess, WorkerDescriptor,
    WorkerLifecycleManager,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, method, path},
};

/// Records launches without creating processes.
#[derive(Debug, Default)]
struct FakeSpawner {
    spawns: AtomicU32,
    delay: Duration,
    fail_with: Option<String>,
}

impl FakeSpawner {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn failing(reason: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(reason.to_string()),
            ..Self::default()
        })
    }

    fn count(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, descriptor: &WorkerDescriptor) -> Result<SpawnedProcess> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.fail_with {
            Some(reason) => Err(LookoutError::spawn_failed(descriptor.kind, reason.clone())),
            None => Ok(SpawnedProcess { pid: 4_000_000 }),
        }
    }
}

fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        health_ms: 500,
        readiness_probe_ms: 500,
        start_ms: 500,
        stop_ms: 500,
        force_stop_ms: 500,
        status_ms: 500,
        frame_ms: 500,
    }
}

fn manager(
    descriptor: WorkerDescriptor,
    spawner: Arc<FakeSpawner>,
) -> WorkerLifecycleManager {
    WorkerLifecycleManager::new(descriptor, fast_timeouts()).with_spawner(spawner)
}

fn registration(server: &MockServer) -> WorkerDescriptor {
    WorkerDescriptor::new(WorkerKind::Registration, server.uri())
        .without_pid_file()
        .with_readiness(5, Duration::from_millis(10))
        .with_reset_on_reuse(true, Duration::from_millis(10))
}

#[tokio::test]
async fn test_unhealthy_worker_is_spawned_and_started() {
    let server = MockServer::start().await;

    // Initial probe and first readiness poll fail, second readiness poll succeeds
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .and(body_json(json!({"subjectId": "ada@example.com", "displayName": "Ada"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "Started", "session_id": 1712})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let spawner = FakeSpawner::new();
    let manager = manager(registration(&server), spawner.clone());

    let payload = json!({"subjectId": "ada@example.com", "displayName": "Ada"});
    let outcome = manager.ensure_running(Some(&payload)).await.unwrap();

    match outcome {
        EnsureOutcome::SpawnedAndHealthy(ack) => {
            assert_eq!(ack.session_id.as_deref(), Some("1712"));
            assert!(!ack.joined);
        }
        other => panic!("expected SpawnedAndHealthy, got {other:?}"),
    }
    assert_eq!(spawner.count(), 1);

    let state = manager.runtime_state();
    assert_eq!(state.health, HealthState::Healthy);
    assert_eq!(state.owned_process.map(|p| p.pid), Some(4_000_000));
}

#[tokio::test]
async fn test_healthy_worker_is_reset_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let spawner = FakeSpawner::new();
    let manager = manager(registration(&server), spawner.clone());

    let outcome = manager.ensure_running(None).await.unwrap();
    assert!(matches!(outcome, EnsureOutcome::AlreadyHealthyReused(_)));
    assert_eq!(spawner.count(), 0);
    assert!(manager.runtime_state().owned_process.is_none());
}

#[tokio::test]
async fn test_concurrent_ensure_running_spawns_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    let spawner = FakeSpawner::slow(Duration::from_millis(100));
    let manager = Arc::new(manager(registration(&server), spawner.clone()));

    let first = tokio::spawn({
        let manager = manager.clone();
        async move { manager.ensure_running(None).await }
    });
    let second = tokio::spawn({
        let manager = manager.clone();
        async move { manager.ensure_running(None).await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert!(first.is_running());
    assert!(second.is_running());
    assert_eq!(spawner.count(), 1, "exactly one process must be spawned");

    let spawned = [&first, &second]
        .iter()
        .filter(|o| matches!(o, EnsureOutcome::SpawnedAndHealthy(_)))
        .count();
    assert_eq!(spawned, 1);
}

#[tokio::test]
async fn test_active_worker_is_joined_without_reset() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"active": true, "status": "running", "session_id": "crowd-7", "current_count": 3}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let descriptor = WorkerDescriptor::new(WorkerKind::CrowdCount, server.uri()).without_pid_file();
    let manager = manager(descriptor, FakeSpawner::new());

    match manager.ensure_running(None).await.unwrap() {
        EnsureOutcome::AlreadyHealthyReused(ack) => {
            assert!(ack.joined);
            assert_eq!(ack.session_id.as_deref(), Some("crowd-7"));
        }
        other => panic!("expected AlreadyHealthyReused, got {other:?}"),
    }
}

#[tokio::test]
async fn test_self_starting_spawn_skips_start() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"active": true})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let descriptor = WorkerDescriptor::new(WorkerKind::CrowdCount, server.uri())
        .without_pid_file()
        .with_readiness(3, Duration::from_millis(10));
    let spawner = FakeSpawner::new();
    let manager = manager(descriptor, spawner.clone());

    match manager.ensure_running(None).await.unwrap() {
        EnsureOutcome::SpawnedAndHealthy(ack) => assert!(ack.joined),
        other => panic!("expected SpawnedAndHealthy, got {other:?}"),
    }
    assert_eq!(spawner.count(), 1);
}

#[tokio::test]
async fn test_start_rejection_is_reported_verbatim() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"success": false, "message": "Face already registered"})),
        )
        .mount(&server)
        .await;

    let manager = manager(registration(&server), FakeSpawner::new());
    let outcome = manager.ensure_running(None).await.unwrap();

    match &outcome {
        EnsureOutcome::StartRejected {
            status_code,
            message,
            ..
        } => {
            assert_eq!(*status_code, 400);
            assert_eq!(message, "Face already registered");
        }
        other => panic!("expected StartRejected, got {other:?}"),
    }
    assert!(matches!(
        outcome.to_error(WorkerKind::Registration),
        Some(LookoutError::WorkerRejection { status_code: 400, .. })
    ));
}

#[tokio::test]
async fn test_success_false_with_2xx_is_a_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "Camera busy"})),
        )
        .mount(&server)
        .await;

    let manager = manager(registration(&server), FakeSpawner::new());
    let outcome = manager.ensure_running(None).await.unwrap();
    assert!(matches!(outcome, EnsureOutcome::StartRejected { status_code: 200, .. }));
}

#[tokio::test]
async fn test_never_healthy_reports_attempts_and_log_tail() {
    let server = MockServer::start().await;

    // One initial probe plus exactly three readiness attempts
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(4)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("registration.log");
    tokio::fs::write(&log, "ModuleNotFoundError: No module named 'cv2'\n")
        .await
        .unwrap();

    let descriptor = registration(&server)
        .with_readiness(3, Duration::from_millis(10))
        .with_log_file(&log);
    let manager = manager(descriptor, FakeSpawner::new());

    match manager.ensure_running(None).await.unwrap() {
        EnsureOutcome::NeverBecameHealthy { attempts, log_tail } => {
            assert_eq!(attempts, 3);
            assert!(log_tail.unwrap().contains("No module named 'cv2'"));
        }
        other => panic!("expected NeverBecameHealthy, got {other:?}"),
    }
    assert_eq!(manager.runtime_state().health, HealthState::Unhealthy);
}

#[tokio::test]
async fn test_spawn_failure_is_a_distinct_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager(
        registration(&server),
        FakeSpawner::failing("python: No such file or directory"),
    );

    match manager.ensure_running(None).await.unwrap() {
        EnsureOutcome::SpawnFailed { reason } => assert!(reason.contains("No such file")),
        other => panic!("expected SpawnFailed, got {other:?}"),
    }
    assert!(manager.runtime_state().owned_process.is_none());
}

#[tokio::test]
async fn test_stop_never_started_worker_succeeds_for_every_kind() {
    for kind in WorkerKind::all() {
        let descriptor = WorkerDescriptor::new(kind, "http://127.0.0.1:9").without_pid_file();
        let manager = WorkerLifecycleManager::new(descriptor, fast_timeouts());

        let report = manager.stop().await;
        assert!(!report.acknowledged, "{kind} should not acknowledge");

        // Repeated stops behave the same
        let again = manager.stop().await;
        assert_eq!(report.acknowledged, again.acknowledged);
    }
}

#[tokio::test]
async fn test_stop_acknowledged_by_running_worker() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "Stopped"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let manager = manager(registration(&server), FakeSpawner::new());
    let report = manager.stop().await;
    assert!(report.acknowledged);
    assert_eq!(report.message, "Stopped");
    assert!(manager.stop().await.acknowledged);
}

#[tokio::test]
async fn test_force_stop_missing_pid_file_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/stop"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = WorkerDescriptor::new(WorkerKind::CrowdCount, server.uri())
        .with_pid_file(dir.path().join("crowd_counting_stream.pid"));
    let manager = manager(descriptor, FakeSpawner::new());

    assert_eq!(manager.force_stop().await.unwrap(), ForceStopOutcome::NothingToStop);
}

#[tokio::test]
async fn test_force_stop_malformed_pid_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("crowd_counting_stream.pid");
    tokio::fs::write(&pid_file, "abc").await.unwrap();

    let descriptor =
        WorkerDescriptor::new(WorkerKind::CrowdCount, "http://127.0.0.1:9").with_pid_file(&pid_file);
    let manager = WorkerLifecycleManager::new(descriptor, fast_timeouts());

    let err = manager.force_stop().await.unwrap_err();
    assert!(matches!(err, LookoutError::MalformedState { .. }));
    // A malformed file is left for the operator to inspect
    assert!(pid_file.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn test_force_stop_terminates_pid_from_file() {
    let mut child = tokio::process::Command::new("sleep")
        .arg("30")
        .spawn()
        .unwrap();
    let pid = child.id().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("crowd_counting_stream.pid");
    tokio::fs::write(&pid_file, format!("{pid}\n")).await.unwrap();

    let descriptor =
        WorkerDescriptor::new(WorkerKind::CrowdCount, "http://127.0.0.1:9").with_pid_file(&pid_file);
    let manager = WorkerLifecycleManager::new(descriptor, fast_timeouts());

    let outcome = manager.force_stop().await.unwrap();
    assert_eq!(
        outcome,
        ForceStopOutcome::Terminated {
            pid,
            source: PidSource::PidFile
        }
    );
    assert!(!child.wait().await.unwrap().success());
    assert!(!pid_file.exists());
}
