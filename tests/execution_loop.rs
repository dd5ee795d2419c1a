// tests/execution_loop.rs

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eventdroid::config::NodeConfig;
use eventdroid::coordinator::methods;
use eventdroid::engine::{ExecutionLoop, LoopExit, LoopState};
use eventdroid::types::{EventRange, NO_MORE_EVENTS};
use eventdroid_test_utils::builders::{JobBuilder, NodeConfigBuilder, ranges};
use eventdroid_test_utils::fake_coordinator::FakeCoordinator;
use eventdroid_test_utils::memory_transport::{MemoryTransportFactory, WorkerEnd};
use eventdroid_test_utils::{init_tracing, with_timeout};
use serde_json::json;
use tempfile::tempdir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

/// Worker that runs until a `done` file appears in its working directory.
const WAIT_FOR_DONE: &str = "while [ ! -e done ]; do sleep 0.05; done";

fn done_file(config: &NodeConfig) -> PathBuf {
    config.node_dir().join("done")
}

/// Play a well-behaved worker: ask for work, finish every range, and exit
/// once told there is nothing more. The worker end is handed back so the
/// connection outlives the process.
async fn cooperative_worker(
    mut ends: UnboundedReceiver<WorkerEnd>,
    done: PathBuf,
) -> (Vec<String>, Option<WorkerEnd>) {
    let Some(mut worker) = ends.recv().await else {
        return (Vec::new(), None);
    };

    let mut processed = Vec::new();
    loop {
        worker.ready();
        let Some(msg) = worker.next(Duration::from_secs(5)).await else {
            break;
        };
        if msg == NO_MORE_EVENTS {
            break;
        }
        let batch: Vec<EventRange> = serde_json::from_str(&msg).expect("batch is a JSON array");
        for range in batch {
            worker.finished(&range.id);
            processed.push(range.id);
        }
    }

    std::fs::write(&done, b"").expect("done file written");
    (processed, Some(worker))
}

fn method_params(fake: &FakeCoordinator, method: &str) -> Vec<serde_json::Value> {
    fake.calls()
        .into_iter()
        .filter(|c| c.method == method)
        .map(|c| c.params)
        .collect()
}

fn config(dir: &Path) -> NodeConfig {
    NodeConfigBuilder::new(dir).node_id(4).build()
}

#[tokio::test]
async fn no_job_exits_with_no_job_code() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let fake = FakeCoordinator::new();
    let (factory, _ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(config(dir.path()), fake.clone(), factory, CancellationToken::new());
    let exit = with_timeout(lp.run()).await?;

    assert_eq!(exit, LoopExit::NoJob);
    assert_eq!(exit.exit_code(), 2);
    assert_eq!(lp.state(), LoopState::Finished);
    assert_eq!(fake.methods(), vec!["getJob".to_string(), "finishNode".to_string()]);
    assert!(dir.path().join("node_4").is_dir());
    Ok(())
}

#[tokio::test]
async fn job_runs_to_completion() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let cfg = config(dir.path());
    let done = done_file(&cfg);
    let node_dir = cfg.node_dir();

    let fake = FakeCoordinator::new()
        .with_job(
            JobBuilder::new("job-1", WAIT_FOR_DONE)
                .post_run("echo ran > postrun.txt")
                .to_json(),
        )
        .with_ranges(ranges("Range", 3));
    let (factory, ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(cfg, fake.clone(), factory, CancellationToken::new());
    let (exit, (processed, _worker)) =
        tokio::join!(with_timeout(lp.run()), cooperative_worker(ends, done));

    assert_eq!(exit?, LoopExit::Completed);
    assert_eq!(processed, vec!["Range-1", "Range-2", "Range-3"]);
    assert_eq!(
        fake.reported_ids("finished"),
        vec!["Range-1".to_string(), "Range-2".to_string(), "Range-3".to_string()]
    );

    // One request per freed slot, plus the one that came back empty.
    assert_eq!(fake.count(methods::GET_EVENT_RANGES), 4);
    for params in method_params(&fake, methods::GET_EVENT_RANGES) {
        assert_eq!(params["nRanges"], json!(1));
        assert_eq!(params["jobId"], json!("job-1"));
    }

    assert!(fake.count(methods::HEARTBEAT) >= 3);
    assert_eq!(
        method_params(&fake, methods::FINISH_JOB),
        vec![json!({"jobId": "job-1", "node": 4, "state": "finished"})]
    );
    assert_eq!(fake.count(methods::FINISH_NODE), 1);
    assert_eq!(fake.methods().last().map(String::as_str), Some("finishNode"));

    assert!(node_dir.join("postrun.txt").exists());
    assert!(node_dir.join("worker_stdout.txt").exists());
    let metrics = lp.metrics().get("job-1").ok_or("no metrics for job")?;
    assert_eq!(metrics.accounting.processed_events, 3);
    assert_eq!(metrics.accounting.queued_events, 3);
    assert!(metrics.accounting.end_time.is_some());
    assert!(lp.metrics().path().exists());
    Ok(())
}

#[tokio::test]
async fn stop_request_reports_results_and_finishes_node_once() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let cfg = config(dir.path());
    let node_dir = cfg.node_dir();

    let fake = FakeCoordinator::new()
        .with_job(
            JobBuilder::new("job-2", "sleep 30")
                .post_run("touch stopped.txt")
                .to_json(),
        )
        .with_job(JobBuilder::new("job-3", "sleep 30").to_json())
        .with_ranges(ranges("Range", 5));
    let (factory, mut ends) = MemoryTransportFactory::new();
    let shutdown = CancellationToken::new();

    let mut lp = ExecutionLoop::new(cfg, fake.clone(), factory, shutdown.clone());

    let driver = async move {
        let mut worker = ends.recv().await.expect("job started");
        worker.ready();
        let first = worker.next(Duration::from_secs(5)).await.expect("first range");
        assert!(first.contains("Range-1"));
        worker.finished("Range-1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        worker
    };

    let (exit, _worker) = tokio::join!(with_timeout(lp.run()), driver);

    let exit = exit?;
    assert_eq!(exit, LoopExit::Stopped);
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(lp.state(), LoopState::Finished);

    assert_eq!(fake.reported_ids("finished"), vec!["Range-1".to_string()]);
    assert_eq!(fake.count(methods::FINISH_NODE), 1);
    assert_eq!(fake.count(methods::FINISH_JOB), 0);
    // The second job is never fetched.
    assert_eq!(fake.count(methods::GET_JOB), 1);
    assert!(node_dir.join("stopped.txt").exists());
    Ok(())
}

#[tokio::test]
async fn setup_failures_end_the_node_after_limit() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let fake = FakeCoordinator::new()
        .with_job(JobBuilder::new("bad-cores", "sleep 30").cores(0).to_json())
        .with_job(JobBuilder::new("bad-hook", "sleep 30").pre_setup("exit 4").to_json())
        .with_job(JobBuilder::new("never", "sleep 30").to_json());
    let (factory, _ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(config(dir.path()), fake.clone(), factory, CancellationToken::new());
    let exit = with_timeout(lp.run()).await?;

    assert_eq!(exit, LoopExit::TooManyFailures);
    assert_eq!(exit.exit_code(), 1);
    let states: Vec<_> = method_params(&fake, methods::FINISH_JOB)
        .into_iter()
        .map(|p| p["state"].clone())
        .collect();
    assert_eq!(states, vec![json!("failed"), json!("failed")]);
    assert_eq!(fake.count(methods::GET_JOB), 2);
    assert_eq!(fake.count(methods::FINISH_NODE), 1);
    Ok(())
}

#[tokio::test]
async fn repeated_request_failures_wind_the_job_down() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let cfg = NodeConfigBuilder::new(dir.path())
        .max_request_failures(3)
        .build();
    let done = done_file(&cfg);

    let fake = FakeCoordinator::new()
        .with_job(JobBuilder::new("job-4", WAIT_FOR_DONE).to_json())
        .with_ranges(ranges("Range", 2))
        .failing_range_requests(3);
    let (factory, ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(cfg, fake.clone(), factory, CancellationToken::new());
    let (exit, (processed, _worker)) =
        tokio::join!(with_timeout(lp.run()), cooperative_worker(ends, done));

    assert_eq!(exit?, LoopExit::Completed);
    assert!(processed.is_empty());
    assert_eq!(fake.count(methods::GET_EVENT_RANGES), 3);
    assert_eq!(fake.remaining_ranges(), 2);
    assert!(fake.reported().is_empty());
    assert_eq!(
        method_params(&fake, methods::FINISH_JOB)[0]["state"],
        json!("finished")
    );
    Ok(())
}

#[tokio::test]
async fn unparseable_result_fails_the_job() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let fake = FakeCoordinator::new()
        .with_job(JobBuilder::new("job-5", "sleep 30").to_json())
        .with_ranges(ranges("Range", 2));
    let (factory, mut ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(config(dir.path()), fake.clone(), factory, CancellationToken::new());

    let driver = async move {
        let mut worker = ends.recv().await.expect("job started");
        worker.ready();
        worker.next(Duration::from_secs(5)).await.expect("first range");
        worker.finished("not-a-known-range");
        worker
    };

    let (exit, _worker) = tokio::join!(with_timeout(lp.run()), driver);

    // The failed job counts once; the coordinator then has no more jobs.
    assert_eq!(exit?, LoopExit::Completed);
    assert_eq!(
        method_params(&fake, methods::FINISH_JOB)[0]["state"],
        json!("failed")
    );
    assert!(fake.reported_ids("finished").is_empty());
    assert_eq!(fake.count(methods::FINISH_NODE), 1);
    Ok(())
}

#[tokio::test]
async fn malformed_job_is_reported_failed() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let fake = FakeCoordinator::new().with_job(json!({"jobId": "broken", "ATHENA_PROC_NUMBER": 2}));
    let (factory, _ends) = MemoryTransportFactory::new();

    let mut lp = ExecutionLoop::new(config(dir.path()), fake.clone(), factory, CancellationToken::new());
    let exit = with_timeout(lp.run()).await?;

    // The job counts as run, so the node does not report "no job".
    assert_eq!(exit, LoopExit::Completed);
    assert_eq!(
        method_params(&fake, methods::FINISH_JOB),
        vec![json!({"jobId": "broken", "node": 4, "state": "failed"})]
    );
    assert_eq!(fake.count(methods::GET_JOB), 2);
    assert_eq!(fake.count(methods::GET_EVENT_RANGES), 0);
    assert_eq!(fake.count(methods::FINISH_NODE), 1);
    Ok(())
}
