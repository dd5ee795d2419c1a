// tests/proc_tree.rs

use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eventdroid::process::tree::{descendants, parse_stat_line, read_stat};
use eventdroid::supervisor::accounting::{CpuEstimator, CpuSources, job_report_cpu};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

/// Write a `stat` file with the given parent and CPU ticks.
fn fake_proc(root: &Path, pid: u32, comm: &str, ppid: u32, utime: u64, stime: u64) -> TestResult {
    let dir = root.join(pid.to_string());
    fs::create_dir_all(&dir)?;
    let line = format!(
        "{pid} ({comm}) S {ppid} {pid} {pid} 0 -1 4194304 100 0 0 0 {utime} {stime} 0 0 20 0 1 0 1000 0 0\n"
    );
    fs::write(dir.join("stat"), line)?;
    Ok(())
}

#[test]
fn stat_line_with_odd_command_name() {
    let stat = parse_stat_line("4242 (my (weird) cmd) R 17 4242 4242 0 -1 0 0 0 0 0 250 50 0 0")
        .expect("line parses");
    assert_eq!(stat.pid, 4242);
    assert_eq!(stat.ppid, 17);
    assert_eq!(stat.cpu_ticks, 300);

    assert!(parse_stat_line("garbage").is_none());
    assert!(parse_stat_line("12 (short) S 1").is_none());
}

#[test]
fn descendants_are_collected_transitively() -> TestResult {
    let proc_root = tempdir()?;
    let p = proc_root.path();

    fake_proc(p, 1, "init", 0, 0, 0)?;
    fake_proc(p, 100, "sh", 1, 1, 0)?;
    fake_proc(p, 101, "athena.py", 100, 10, 2)?;
    fake_proc(p, 102, "athena worker 0", 101, 500, 20)?;
    fake_proc(p, 103, "athena worker 1", 101, 400, 10)?;
    fake_proc(p, 200, "unrelated", 1, 99, 0)?;
    fs::create_dir_all(p.join("self"))?;
    fs::write(p.join("uptime"), "1.0 1.0")?;

    let mut found = descendants(100, p);
    assert_eq!(found[0], 100);
    found.sort_unstable();
    assert_eq!(found, vec![100, 101, 102, 103]);

    assert_eq!(descendants(999, p), vec![999]);
    assert_eq!(read_stat(102, p).map(|s| s.cpu_ticks), Some(520));
    Ok(())
}

#[test]
fn descendant_sum_never_regresses() -> TestResult {
    let proc_root = tempdir()?;
    let work = tempdir()?;
    let p = proc_root.path();

    fake_proc(p, 10, "sh", 1, 0, 0)?;
    fake_proc(p, 11, "worker", 10, 1000, 0)?;

    let sources = CpuSources {
        work_dir: work.path().to_path_buf(),
        proc_root: p.to_path_buf(),
        roots: vec![10],
        killed: Arc::new(AtomicBool::new(false)),
    };
    let ticks = eventdroid::process::tree::clock_ticks();

    let mut est = CpuEstimator::new(0.0);
    let first = est.descendant_sum(&sources);
    assert!((first - 1000.0 / ticks).abs() < 1e-9);

    // Reading regresses and the process disappears: the maximum is kept.
    fake_proc(p, 11, "worker", 10, 10, 0)?;
    assert!((est.descendant_sum(&sources) - first).abs() < 1e-9);
    fs::remove_dir_all(p.join("11"))?;
    assert!((est.descendant_sum(&sources) - first).abs() < 1e-9);
    Ok(())
}

#[test]
fn killed_group_uses_descendant_sum() -> TestResult {
    let proc_root = tempdir()?;
    let work = tempdir()?;
    let p = proc_root.path();
    let ticks = eventdroid::process::tree::clock_ticks();

    // Small enough that the 10% margin alone would not pick it.
    let worker_ticks = (5.0 * ticks) as u64;
    fake_proc(p, 10, "worker", 1, worker_ticks, 0)?;

    let killed = Arc::new(AtomicBool::new(false));
    let sources = CpuSources {
        work_dir: work.path().to_path_buf(),
        proc_root: p.to_path_buf(),
        roots: vec![10],
        killed: Arc::clone(&killed),
    };

    let mut est = CpuEstimator::new(0.0);
    assert!((est.sample(&sources, 20.0) - 20.0).abs() < 1e-9);

    // Once killed the descendant sum is taken, but the estimate never drops.
    killed.store(true, std::sync::atomic::Ordering::SeqCst);
    assert!((est.sample(&sources, 20.0) - 20.0).abs() < 1e-9);

    // Descendants dominating by more than 10% win even when not killed.
    killed.store(false, std::sync::atomic::Ordering::SeqCst);
    fake_proc(p, 10, "worker", 1, (50.0 * ticks) as u64, 0)?;
    let cpu = est.sample(&sources, 20.0);
    assert!((cpu - (50.0 * ticks) as u64 as f64 / ticks).abs() < 1e-9);
    Ok(())
}

#[test]
fn job_report_cpu_sums_executors() -> TestResult {
    let work = tempdir()?;
    assert_eq!(job_report_cpu(work.path()), None);

    fs::write(
        work.path().join("jobReport.json"),
        r#"{"resource": {"executor": {
            "EVNTtoHITS": {"cpuTime": 120.5},
            "HITSMerge": {"cpuTime": 30},
            "broken": {"wallTime": 3}
        }}}"#,
    )?;
    assert_eq!(job_report_cpu(work.path()), Some(150.5));
    Ok(())
}

#[test]
fn small_job_report_is_ignored() -> TestResult {
    let proc_root = tempdir()?;
    let work = tempdir()?;
    fs::write(
        work.path().join("jobReport.json"),
        r#"{"resource": {"executor": {"a": {"cpuTime": 4.0}}}}"#,
    )?;
    let sources = CpuSources {
        work_dir: work.path().to_path_buf(),
        proc_root: proc_root.path().to_path_buf(),
        roots: vec![],
        killed: Arc::new(AtomicBool::new(false)),
    };

    let mut est = CpuEstimator::new(1.0);
    assert!((est.sample(&sources, 3.0) - 2.0).abs() < 1e-9);

    fs::write(
        work.path().join("jobReport.json"),
        r#"{"resource": {"executor": {"a": {"cpuTime": 40.0}}}}"#,
    )?;
    assert!((est.sample(&sources, 3.0) - 40.0).abs() < 1e-9);
    Ok(())
}
