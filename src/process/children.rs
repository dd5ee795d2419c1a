// src/process/children.rs

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::errors::{DroidError, Result};
use crate::process::tree;

pub const WORKER_STDOUT: &str = "worker_stdout.txt";
pub const WORKER_STDERR: &str = "worker_stderr.txt";
pub const AUX_OUTPUT: &str = "token_extractor_stdout.txt";

/// What to launch for one job.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Shell command of the main worker.
    pub worker_cmd: String,
    /// Optional helper launched alongside the worker.
    pub aux_cmd: Option<String>,
    /// Working directory of both processes; output files land here too.
    pub work_dir: PathBuf,
    /// Root of the process table, `/proc` outside tests.
    pub proc_root: PathBuf,
}

impl LaunchSpec {
    pub fn new(worker_cmd: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            worker_cmd: worker_cmd.into(),
            aux_cmd: None,
            work_dir: work_dir.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    pub fn with_aux(mut self, aux_cmd: impl Into<String>) -> Self {
        self.aux_cmd = Some(aux_cmd.into());
        self
    }
}

/// The worker and optional auxiliary process, each leading its own process
/// group.
///
/// Owned by the bridge task; the parent only ever sees pids and signals.
#[derive(Debug)]
pub struct WorkerProcesses {
    worker: Child,
    worker_pid: Option<u32>,
    worker_status: Option<ExitStatus>,
    aux: Option<Child>,
    aux_pid: Option<u32>,
    aux_configured: bool,
    proc_root: PathBuf,
}

impl WorkerProcesses {
    /// Start the auxiliary process (if any), then the worker.
    ///
    /// A process that fails to spawn or has already exited right after spawn
    /// is a `ProcessError`; anything started so far is killed on drop.
    pub fn launch(spec: &LaunchSpec) -> Result<Self> {
        let aux = match &spec.aux_cmd {
            Some(cmd) => {
                let out = open_output(&spec.work_dir, AUX_OUTPUT)?;
                let err = out.try_clone()?;
                let child = spawn_group_leader("auxiliary", cmd, &spec.work_dir, out, err)?;
                Some(child)
            }
            None => None,
        };

        let out = open_output(&spec.work_dir, WORKER_STDOUT)?;
        let err = open_output(&spec.work_dir, WORKER_STDERR)?;
        let worker = spawn_group_leader("worker", &spec.worker_cmd, &spec.work_dir, out, err)?;

        let worker_pid = worker.id();
        let aux_pid = aux.as_ref().and_then(|c| c.id());
        info!(?worker_pid, ?aux_pid, "worker processes launched");

        Ok(Self {
            worker,
            worker_pid,
            worker_status: None,
            aux,
            aux_pid,
            aux_configured: spec.aux_cmd.is_some(),
            proc_root: spec.proc_root.clone(),
        })
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    pub fn aux_pid(&self) -> Option<u32> {
        self.aux_pid
    }

    fn poll_worker(&mut self) -> Option<ExitStatus> {
        if self.worker_status.is_none() {
            match self.worker.try_wait() {
                Ok(Some(status)) => {
                    info!(pid = ?self.worker_pid, %status, "worker exited");
                    self.worker_status = Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "failed to poll worker status; treating it as exited");
                    self.worker_status = Some(ExitStatus::default());
                }
            }
        }
        self.worker_status
    }

    /// True once the group can no longer make progress: the auxiliary process
    /// was configured but is missing, the worker has exited, or the socket
    /// reader has stopped.
    pub fn is_child_dead(&mut self, reader_running: bool) -> bool {
        if self.aux_configured && self.aux.is_none() {
            return true;
        }
        if self.poll_worker().is_some() {
            return true;
        }
        !reader_running
    }

    fn worker_running(&mut self) -> bool {
        self.poll_worker().is_none()
    }

    fn aux_running(&mut self) -> bool {
        match self.aux.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// SIGTERM both process groups, then SIGKILL whatever is left after
    /// `kill_grace`, then reap.
    pub async fn terminate_child(&mut self, kill_grace: Duration) {
        let worker_running = self.worker_running();
        let aux_running = self.aux_running();

        if worker_running {
            self.signal_group(self.worker_pid, libc::SIGTERM);
        }
        if aux_running {
            self.signal_group(self.aux_pid, libc::SIGTERM);
        }

        if worker_running || aux_running {
            sleep(kill_grace).await;
        }

        if self.worker_running() {
            if let Some(pid) = self.worker_pid {
                debug!(pid, "worker survived SIGTERM");
                tree::kill_tree(pid, &self.proc_root);
            }
        }
        if self.aux_running() {
            if let Some(pid) = self.aux_pid {
                tree::kill_tree(pid, &self.proc_root);
            }
        }

        self.reap(kill_grace).await;
    }

    async fn reap(&mut self, bound: Duration) {
        if self.worker_status.is_none() {
            match timeout(bound, self.worker.wait()).await {
                Ok(Ok(status)) => self.worker_status = Some(status),
                Ok(Err(e)) => warn!(error = %e, "waiting for worker failed"),
                Err(_) => warn!(pid = ?self.worker_pid, "worker not reaped in time"),
            }
        }
        if let Some(aux) = self.aux.as_mut() {
            let _ = timeout(bound, aux.wait()).await;
        }
    }

    fn signal_group(&self, pgid: Option<u32>, signal: i32) {
        if let Some(pgid) = pgid {
            if let Err(e) = tree::signal_group(pgid, signal) {
                warn!(pgid, signal, error = %e, "failed to signal process group");
            }
        }
    }

    /// Exit status of the worker as a plain integer: the exit code, or
    /// `128 + signal` when it was killed. `-1` if it has not exited.
    pub fn exit_code(&mut self) -> i32 {
        match self.poll_worker() {
            Some(status) => status_code(status),
            None => -1,
        }
    }
}

pub fn status_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(sig)) => 128 + sig,
        (None, None) => -1,
    }
}

fn open_output(dir: &Path, name: &str) -> Result<File> {
    let path = dir.join(name);
    File::create(&path).map_err(|e| {
        DroidError::ProcessError(format!("cannot create {}: {}", path.display(), e))
    })
}

fn spawn_group_leader(
    role: &str,
    cmd_line: &str,
    work_dir: &Path,
    stdout: File,
    stderr: File,
) -> Result<Child> {
    info!(role, cmd = %cmd_line, "starting process");

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(cmd_line)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| DroidError::ProcessError(format!("spawning {} process: {}", role, e)))?;

    match child.try_wait() {
        Ok(Some(status)) => Err(DroidError::ProcessError(format!(
            "{} process exited immediately ({})",
            role, status
        ))),
        Ok(None) => Ok(child),
        Err(e) => Err(DroidError::ProcessError(format!(
            "polling {} process after spawn: {}",
            role, e
        ))),
    }
}
