// tests/process_group.rs

use std::error::Error;
use std::path::Path;
use std::time::Duration;

use eventdroid::bridge::{BridgeSettings, MessageBridge};
use eventdroid::errors::DroidError;
use eventdroid::process::{LaunchSpec, WorkerProcessGroup};
use eventdroid_test_utils::builders::fast_termination;
use eventdroid_test_utils::memory_transport::{WorkerEnd, memory_pair};
use eventdroid_test_utils::{init_tracing, wait_until, with_timeout};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

fn bridge_settings() -> BridgeSettings {
    BridgeSettings {
        reader_backoff: Duration::from_millis(5),
        liveness_interval: Duration::from_millis(20),
        child_kill_grace: Duration::from_millis(100),
    }
}

fn start(spec: &LaunchSpec) -> Result<(WorkerProcessGroup, MessageBridge, WorkerEnd), DroidError> {
    let (transport, worker) = memory_pair();
    let (bridge, endpoints) = MessageBridge::new();
    let group = WorkerProcessGroup::start(
        spec,
        Box::new(transport),
        endpoints,
        bridge.command_sender(),
        bridge_settings(),
        fast_termination(),
    )?;
    Ok((group, bridge, worker))
}

fn proc_exists(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[tokio::test]
async fn terminate_is_idempotent() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let (mut group, _bridge, _worker) = start(&LaunchSpec::new("sleep 30", dir.path()))?;
    let pid = group.worker_pid().ok_or("no worker pid")?;

    assert!(group.is_alive());
    assert!(!group.was_killed());

    with_timeout(group.terminate()).await;
    assert!(!group.is_alive());
    assert!(group.was_killed());
    let first = group.poll_exit();
    assert_eq!(first, Some(143));
    assert!(!proc_exists(pid));

    with_timeout(group.terminate()).await;
    assert!(!group.is_alive());
    assert_eq!(group.poll_exit(), first);

    with_timeout(group.kill()).await;
    assert_eq!(group.poll_exit(), first);
    Ok(())
}

#[tokio::test]
async fn kill_stops_worker_and_aux() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let spec = LaunchSpec::new("sleep 30", dir.path()).with_aux("sleep 30");
    let (mut group, _bridge, _worker) = start(&spec)?;
    let aux = group.aux_pid().ok_or("no aux pid")?;
    let worker = group.worker_pid().ok_or("no worker pid")?;

    with_timeout(group.kill()).await;

    assert!(!group.is_alive());
    assert!(wait_until(Duration::from_secs(2), || !proc_exists(worker)).await);
    assert!(wait_until(Duration::from_secs(2), || !proc_exists(aux)).await);
    assert!(dir.path().join("token_extractor_stdout.txt").exists());
    Ok(())
}

#[tokio::test]
async fn survivor_of_sigterm_is_killed() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let (mut group, _bridge, _worker) =
        start(&LaunchSpec::new("trap '' TERM; while true; do sleep 0.05; done", dir.path()))?;
    let pid = group.worker_pid().ok_or("no worker pid")?;

    with_timeout(group.terminate()).await;

    assert!(!group.is_alive());
    assert_eq!(group.poll_exit(), Some(137));
    assert!(wait_until(Duration::from_secs(2), || !proc_exists(pid)).await);
    Ok(())
}

#[tokio::test]
async fn worker_exit_is_observed() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let (mut group, _bridge, _worker) = start(&LaunchSpec::new("sleep 0.2; exit 3", dir.path()))?;

    assert!(wait_until(Duration::from_secs(5), || !group.is_alive()).await);
    assert_eq!(group.poll_exit(), Some(3));
    assert!(!group.was_killed());
    Ok(())
}

#[tokio::test]
async fn worker_output_is_captured() -> TestResult {
    let dir = tempdir()?;
    let (mut group, _bridge, _worker) =
        start(&LaunchSpec::new("echo hello; echo oops >&2; sleep 0.2", dir.path()))?;

    assert!(wait_until(Duration::from_secs(5), || !group.is_alive()).await);
    assert_eq!(std::fs::read_to_string(dir.path().join("worker_stdout.txt"))?, "hello\n");
    assert_eq!(std::fs::read_to_string(dir.path().join("worker_stderr.txt"))?, "oops\n");
    Ok(())
}

#[tokio::test]
async fn transport_failure_takes_the_group_down() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let (mut group, _bridge, worker) = start(&LaunchSpec::new("sleep 30", dir.path()))?;

    // The worker hanging up is a read failure on our side.
    drop(worker);

    assert!(wait_until(Duration::from_secs(5), || !group.is_alive()).await);
    assert!(group.poll_exit().is_some());
    Ok(())
}

#[tokio::test]
async fn bridge_forwards_both_ways_in_order() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let (mut group, mut bridge, mut worker) = start(&LaunchSpec::new("sleep 30", dir.path()))?;

    worker.ready();
    worker.say("second");
    let mut inbound = Vec::new();
    assert!(
        wait_until(Duration::from_secs(2), || {
            while let Some(m) = bridge.try_next() {
                inbound.push(m);
            }
            inbound.len() == 2
        })
        .await
    );
    assert_eq!(inbound, vec!["Ready for events".to_string(), "second".to_string()]);

    bridge.send("[{\"eventRangeID\": \"r-1\"}]".to_string())?;
    bridge.send("No more events".to_string())?;
    assert_eq!(
        worker.next(Duration::from_secs(2)).await.as_deref(),
        Some("[{\"eventRangeID\": \"r-1\"}]")
    );
    assert_eq!(worker.next(Duration::from_secs(2)).await.as_deref(), Some("No more events"));

    with_timeout(group.terminate()).await;
    Ok(())
}

#[tokio::test]
async fn send_after_bridge_is_gone_fails() -> TestResult {
    let dir = tempdir()?;
    let (mut group, bridge, _worker) = start(&LaunchSpec::new("sleep 30", dir.path()))?;

    with_timeout(group.kill()).await;
    assert!(wait_until(Duration::from_secs(2), || group.task_finished()).await);

    let err = bridge.send("late".to_string()).err().ok_or("send should fail")?;
    assert!(matches!(err, DroidError::TransportError(_)));
    Ok(())
}

#[tokio::test]
async fn launch_in_missing_directory_is_a_process_error() -> TestResult {
    let dir = tempdir()?;
    let missing = dir.path().join("does/not/exist");

    let err = start(&LaunchSpec::new("sleep 30", &missing))
        .err()
        .ok_or("launch should fail")?;
    assert!(matches!(err, DroidError::ProcessError(_)));
    Ok(())
}
