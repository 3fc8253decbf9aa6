//! Stop, restart, status and logs on deployed instances.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{Fleet, LONG_RUNNING, TOKEN_A};
use zcfleet::instance::InstanceStatus;
use zcfleet::lifecycle::LifecycleError;
use zcfleet::process::{ManagedProcess, is_pid_alive};

#[tokio::test]
async fn stop_is_idempotent() {
    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;
    let pid = instance.pid().unwrap();

    let stopped = fleet.state.lifecycle.stop(instance.id).await.unwrap();
    assert_eq!(stopped.status(), InstanceStatus::Stopped);
    assert!(stopped.pid().is_none());
    assert!(common::wait_for_exit(pid, Duration::from_secs(5)).await);

    let again = fleet.state.lifecycle.stop(instance.id).await.unwrap();
    assert_eq!(again.status(), InstanceStatus::Stopped);

    // Stop keeps the workspace and the log.
    assert!(instance.workspace_path.is_dir());
    assert!(instance.log_file_path.is_file());
}

#[tokio::test]
async fn repeated_restarts_bump_count_and_append_to_log() {
    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;

    let mut previous_pid = instance.pid().unwrap();
    let mut previous_stamp = None;
    for n in 1..=3 {
        let restarted = fleet.state.lifecycle.restart(instance.id).await.unwrap();
        let pid = restarted.pid().unwrap();

        assert!(restarted.is_running());
        assert_eq!(restarted.restart_count, n);
        assert_ne!(pid, previous_pid);
        assert!(common::wait_for_exit(previous_pid, Duration::from_secs(5)).await);

        let stamp = restarted.last_restart_at.unwrap();
        if let Some(prev) = previous_stamp {
            assert!(stamp > prev, "restart stamps must strictly increase");
        }
        previous_stamp = Some(stamp);
        previous_pid = pid;
    }

    // Give the last incarnation time to print its marker.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let log = std::fs::read_to_string(&instance.log_file_path).unwrap();
    assert_eq!(log.lines().filter(|l| *l == "started").count(), 4);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn recorded_pid_reused_by_another_process_is_never_signalled() {
    use std::os::unix::process::CommandExt;

    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;
    let own_pid = instance.pid().unwrap();
    ManagedProcess::from_pid(own_pid).kill();
    assert!(common::wait_for_exit(own_pid, Duration::from_secs(5)).await);

    // Something zcfleet never launched now sits behind the recorded pid.
    let mut stranger = std::process::Command::new("sleep")
        .arg("30")
        .process_group(0)
        .spawn()
        .unwrap();
    let stranger_pid = stranger.id();
    let registry = &fleet.state.registry;
    registry
        .record_restart(instance.id, stranger_pid, Utc::now())
        .unwrap();

    let restarted = fleet.state.lifecycle.restart(instance.id).await.unwrap();
    assert_ne!(restarted.pid(), Some(stranger_pid));
    assert!(is_pid_alive(restarted.pid().unwrap()));
    assert!(stranger.try_wait().unwrap().is_none());

    let relaunched_pid = restarted.pid().unwrap();
    ManagedProcess::from_pid(relaunched_pid).kill();
    assert!(common::wait_for_exit(relaunched_pid, Duration::from_secs(5)).await);
    registry
        .record_restart(instance.id, stranger_pid, Utc::now())
        .unwrap();

    let stopped = fleet.state.lifecycle.stop(instance.id).await.unwrap();
    assert_eq!(stopped.status(), InstanceStatus::Stopped);
    assert!(stranger.try_wait().unwrap().is_none());

    stranger.kill().unwrap();
    stranger.wait().unwrap();
}

#[tokio::test]
async fn restart_without_workspace_fails_and_stops() {
    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;
    std::fs::remove_dir_all(&instance.workspace_path).unwrap();

    let err = fleet.state.lifecycle.restart(instance.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::WorkspaceMissing(_)), "{err:?}");

    let row = fleet.state.registry.get(instance.id).unwrap();
    assert_eq!(row.status(), InstanceStatus::Stopped);
}

#[tokio::test]
async fn restart_refuses_token_held_by_another_instance() {
    let fleet = Fleet::new();
    let first = fleet
        .deploy(fleet.request("telegram", Some(TOKEN_A), LONG_RUNNING))
        .await;
    fleet.state.lifecycle.stop(first.id).await.unwrap();
    let second = fleet
        .deploy(fleet.request("telegram", Some(TOKEN_A), LONG_RUNNING))
        .await;

    let err = fleet.state.lifecycle.restart(first.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::DuplicateToken), "{err:?}");

    assert!(!fleet.state.registry.get(first.id).unwrap().is_running());
    assert!(fleet.state.registry.get(second.id).unwrap().is_running());
}

#[tokio::test]
async fn status_reflects_the_process() {
    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;

    let report = fleet.state.lifecycle.status(instance.id).await.unwrap();
    assert!(report.liveness.is_alive());

    let pid = instance.pid().unwrap();
    unsafe {
        libc::kill(-(pid as i32), libc::SIGKILL);
    }
    assert!(common::wait_for_exit(pid, Duration::from_secs(5)).await);

    let report = fleet.state.lifecycle.status(instance.id).await.unwrap();
    assert!(!report.liveness.is_alive());
    // Status only observes; the row is still recorded as running.
    assert!(report.instance.is_running());
}

#[tokio::test]
async fn unknown_id_is_not_found_everywhere() {
    let fleet = Fleet::new();
    let lifecycle = &fleet.state.lifecycle;

    assert!(matches!(
        lifecycle.stop(404).await,
        Err(LifecycleError::NotFound(404))
    ));
    assert!(matches!(
        lifecycle.restart(404).await,
        Err(LifecycleError::NotFound(404))
    ));
    assert!(matches!(
        lifecycle.status(404).await,
        Err(LifecycleError::NotFound(404))
    ));
    assert!(matches!(
        lifecycle.logs(404, 10).await,
        Err(LifecycleError::NotFound(404))
    ));
}

#[tokio::test]
async fn logs_tail_and_missing_file() {
    let fleet = Fleet::new();
    let instance = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;

    let text = fleet.state.lifecycle.logs(instance.id, 1).await.unwrap();
    assert_eq!(text, "started");

    let text = fleet.state.lifecycle.logs(instance.id, 100).await.unwrap();
    assert!(text.contains("fetching"));
    assert!(text.lines().count() > 1);

    std::fs::remove_file(&instance.log_file_path).unwrap();
    let err = fleet.state.lifecycle.logs(instance.id, 10).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LogFileMissing(_)), "{err:?}");
}

#[tokio::test]
async fn startup_sweep_marks_everything_stopped() {
    let fleet = Fleet::new();
    let a = fleet
        .deploy(fleet.request("process", None, LONG_RUNNING))
        .await;
    let b = fleet
        .deploy(fleet.request("telegram", Some(TOKEN_A), LONG_RUNNING))
        .await;

    // Same database, new supervisor.
    let restarted = fleet.reopen();
    let swept = restarted.lifecycle.startup_sweep().unwrap();
    assert_eq!(swept, 2);

    for id in [a.id, b.id] {
        let row = restarted.registry.get(id).unwrap();
        assert_eq!(row.status(), InstanceStatus::Stopped);
        assert!(row.pid().is_none());
    }
    assert_eq!(restarted.lifecycle.startup_sweep().unwrap(), 0);

    // The sweep does not signal survivors.
    assert!(is_pid_alive(a.pid().unwrap()));
    for pid in [a.pid().unwrap(), b.pid().unwrap()] {
        zcfleet::process::ManagedProcess::from_pid(pid).kill();
    }
}
