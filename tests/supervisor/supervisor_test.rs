//! Process supervision against small shell-script gateways.

#![cfg(unix)]

use std::time::Duration;

use serde_json::json;
use sqlgate::supervisor::{ProcessState, Supervisor, SupervisorError};
use sqlgate::transport::{Request, Response};

fn shell(script: &str) -> Supervisor {
    Supervisor::new("sh", vec!["-c".to_string(), script.to_string()])
        .with_poll_interval(Duration::from_millis(20))
        .with_request_timeout(Duration::from_secs(5))
}

/// Wait until the supervisor reports `state`, or give up after two seconds.
async fn wait_for(supervisor: &mut Supervisor, state: ProcessState) {
    for _ in 0..100 {
        if supervisor.status().state == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("supervisor never reached {state}, still {}", supervisor.state());
}

#[tokio::test]
async fn test_round_trip_through_child() {
    let mut supervisor = shell(r#"while read line; do echo '{"id":1,"result":{"tables":[]}}'; done"#);

    let response = supervisor
        .send(&Request::new(1, "list_tables", json!({})))
        .await
        .unwrap();
    assert_eq!(response, Response::ok(json!(1), json!({ "tables": [] })));

    let status = supervisor.status();
    assert_eq!(status.state, ProcessState::Running);
    assert_eq!(status.generation, 1);
    assert!(status.pid.is_some());

    supervisor.terminate().await;
    assert_eq!(supervisor.state(), ProcessState::Terminated);
    assert_eq!(supervisor.failure_count(), 0);
}

#[tokio::test]
async fn test_unexpected_exit_starts_backoff() {
    let mut supervisor = shell("echo oops >&2; exit 1");
    supervisor.ensure_running().await.unwrap();

    wait_for(&mut supervisor, ProcessState::RestartPending).await;
    let status = supervisor.status();
    assert_eq!(status.failures, 1);
    assert_eq!(status.last_exit_code, Some(1));
    assert_eq!(status.backoff_remaining_secs, Some(2));

    // Give the stderr drain a moment to deliver its last line.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(supervisor.drain_diagnostics().contains(&"oops".to_string()));
    assert!(supervisor.drain_diagnostics().is_empty());

    let err = supervisor.ensure_running().await.unwrap_err();
    assert!(matches!(err, SupervisorError::BackingOff { failures: 1, .. }));

    let err = supervisor.restart(false).await.unwrap_err();
    assert!(matches!(err, SupervisorError::BackingOff { .. }));
}

#[tokio::test]
async fn test_forced_restart_resets_failures() {
    let mut supervisor = shell("exit 3");
    supervisor.ensure_running().await.unwrap();
    wait_for(&mut supervisor, ProcessState::RestartPending).await;
    assert_eq!(supervisor.failure_count(), 1);

    supervisor.restart(true).await.unwrap();
    assert_eq!(supervisor.failure_count(), 0);
    assert_eq!(supervisor.status().generation, 2);

    supervisor.terminate().await;
}

#[tokio::test]
async fn test_broken_channel_kills_and_counts_failure() {
    let mut supervisor = shell("read line; exit 0");

    let err = supervisor.call("list_tables", json!({})).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Transport(_)));
    assert_eq!(supervisor.state(), ProcessState::RestartPending);
    assert_eq!(supervisor.failure_count(), 1);

    // Exit of the killed process is not counted twice.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(supervisor.status().failures, 1);

    let err = supervisor.call("list_tables", json!({})).await.unwrap_err();
    assert!(matches!(err, SupervisorError::BackingOff { .. }));
}

#[tokio::test]
async fn test_missing_program() {
    let mut supervisor = Supervisor::new("/nonexistent/sqlgate-gateway", Vec::new());
    let err = supervisor.ensure_running().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Spawn { .. }));
    assert_eq!(supervisor.state(), ProcessState::RestartPending);
}
