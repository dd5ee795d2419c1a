// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use eventdroid::config::{from_toml_str, load_and_validate, parse_duration};
use eventdroid::errors::DroidError;
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

const MINIMAL: &str = r#"
[node]
id = 7

[coordinator]
exchange_dir = "/shared/exchange/node_7"
"#;

#[test]
fn minimal_config_gets_defaults() -> TestResult {
    let cfg = from_toml_str(MINIMAL)?;

    assert_eq!(cfg.node_id, 7);
    assert_eq!(cfg.work_dir, PathBuf::from("."));
    assert_eq!(cfg.node_dir(), PathBuf::from("./node_7"));
    assert_eq!(
        cfg.socket_path(),
        PathBuf::from("./node_7/EventService_EventRanges")
    );
    assert_eq!(
        cfg.metrics_path(),
        PathBuf::from("./node_7/jobMetrics-node_7.json")
    );

    assert_eq!(cfg.coordinator.poll_interval, Duration::from_secs(1));
    assert_eq!(cfg.coordinator.max_request_failures, 30);

    let t = cfg.worker.termination;
    assert_eq!(t.stop_grace, Duration::from_secs(2));
    assert_eq!(t.term_grace, Duration::from_secs(5));
    assert_eq!(cfg.worker.reader_backoff, Duration::from_secs(1));
    assert_eq!(cfg.worker.drain_timeout, Duration::from_secs(30 * 60));

    assert_eq!(cfg.run_loop.heartbeat_interval, Duration::from_secs(60));
    assert_eq!(cfg.run_loop.idle_sleep, Duration::from_millis(1));
    assert_eq!(cfg.run_loop.cpu_sample_interval, Duration::from_secs(60));
    assert_eq!(cfg.run_loop.max_failed_jobs, 2);
    Ok(())
}

#[test]
fn overrides_are_applied() -> TestResult {
    let cfg = from_toml_str(
        r#"
[node]
id = 1
work_dir = "/scratch/run"

[coordinator]
exchange_dir = "/x"
poll_interval = "250ms"
max_request_failures = 5

[worker]
socket_name = "droid.sock"
stop_grace = "1s"
term_grace = "3s"
drain_timeout = "2h"

[loop]
heartbeat_interval = "30s"
max_failed_jobs = 4
"#,
    )?;

    assert_eq!(cfg.work_dir, PathBuf::from("/scratch/run"));
    assert_eq!(cfg.socket_path(), PathBuf::from("/scratch/run/node_1/droid.sock"));
    assert_eq!(cfg.coordinator.poll_interval, Duration::from_millis(250));
    assert_eq!(cfg.coordinator.max_request_failures, 5);
    assert_eq!(cfg.worker.termination.stop_grace, Duration::from_secs(1));
    assert_eq!(cfg.worker.termination.term_grace, Duration::from_secs(3));
    assert_eq!(cfg.worker.drain_timeout, Duration::from_secs(7200));
    assert_eq!(cfg.run_loop.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(cfg.run_loop.max_failed_jobs, 4);
    Ok(())
}

#[test]
fn invalid_values_are_config_errors() {
    let cases = [
        ("[worker]\nsocket_name = \"\"", "empty socket"),
        ("[worker]\nsocket_name = \"a/b\"", "socket path"),
        ("[worker]\nstop_grace = \"5x\"", "bad unit"),
        ("[loop]\nidle_sleep = \"soon\"", "no number"),
        ("[loop]\nmax_failed_jobs = 0", "zero jobs"),
    ];

    for (extra, what) in cases {
        let text = format!("{}\n{}", MINIMAL, extra);
        match from_toml_str(&text) {
            Err(DroidError::ConfigError(_)) => {}
            other => panic!("{}: expected ConfigError, got {:?}", what, other),
        }
    }
}

#[test]
fn missing_required_fields_fail_to_parse() {
    let err = from_toml_str("[node]\nid = 1\n").expect_err("coordinator section is required");
    assert!(matches!(err, DroidError::TomlError(_)));
}

#[test]
fn load_from_file() -> TestResult {
    let dir = tempdir()?;
    let path = dir.path().join("eventdroid.toml");
    fs::write(&path, MINIMAL)?;

    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.node_id, 7);

    let missing = load_and_validate(dir.path().join("nope.toml"));
    assert!(matches!(missing, Err(DroidError::IoError(_))));
    Ok(())
}

#[test]
fn duration_strings() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
    assert_eq!(parse_duration("30m"), Ok(Duration::from_secs(1800)));
    assert_eq!(parse_duration("2H"), Ok(Duration::from_secs(7200)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("s").is_err());
    assert!(parse_duration("3d").is_err());
}
