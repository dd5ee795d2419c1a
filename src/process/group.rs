// src/process/group.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::bridge::{BridgeCommand, BridgeEndpoints, BridgeSettings, WorkerTransport, spawn_bridge};
use crate::config::TerminationPolicy;
use crate::errors::Result;
use crate::process::children::{LaunchSpec, WorkerProcesses};
use crate::process::tree;

const EXIT_POLL: Duration = Duration::from_millis(20);

/// Parent-side handle on the worker group: the bridge task plus the worker
/// and auxiliary processes it owns.
///
/// The group is alive until the bridge task has reported the worker's exit
/// code.
#[derive(Debug)]
pub struct WorkerProcessGroup {
    commands: UnboundedSender<BridgeCommand>,
    exit_rx: oneshot::Receiver<i32>,
    task: JoinHandle<()>,
    worker_pid: Option<u32>,
    aux_pid: Option<u32>,
    exit_status: Option<i32>,
    killed: Arc<AtomicBool>,
    policy: TerminationPolicy,
    proc_root: PathBuf,
}

impl WorkerProcessGroup {
    /// Launch the worker processes and the bridge task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        spec: &LaunchSpec,
        transport: Box<dyn WorkerTransport>,
        endpoints: BridgeEndpoints,
        commands: UnboundedSender<BridgeCommand>,
        settings: BridgeSettings,
        policy: TerminationPolicy,
    ) -> Result<Self> {
        let processes = WorkerProcesses::launch(spec)?;
        let worker_pid = processes.worker_pid();
        let aux_pid = processes.aux_pid();

        let (task, exit_rx) = spawn_bridge(transport, processes, endpoints, settings);

        Ok(Self {
            commands,
            exit_rx,
            task,
            worker_pid,
            aux_pid,
            exit_status: None,
            killed: Arc::new(AtomicBool::new(false)),
            policy,
            proc_root: spec.proc_root.clone(),
        })
    }

    pub fn worker_pid(&self) -> Option<u32> {
        self.worker_pid
    }

    pub fn aux_pid(&self) -> Option<u32> {
        self.aux_pid
    }

    /// Shared flag set as soon as a termination was requested. Read by the
    /// CPU sampler.
    pub fn killed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }

    pub fn was_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Worker exit code once the group is dead.
    pub fn poll_exit(&mut self) -> Option<i32> {
        if self.exit_status.is_none() {
            self.exit_status = match self.exit_rx.try_recv() {
                Ok(code) => Some(code),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => {
                    warn!("bridge task ended without reporting an exit code");
                    Some(-1)
                }
            };
        }
        self.exit_status
    }

    pub fn is_alive(&mut self) -> bool {
        self.poll_exit().is_none()
    }

    /// Poll until the group is dead or `bound` has elapsed. Returns whether
    /// it is still alive.
    async fn wait_for_exit(&mut self, bound: Duration) -> bool {
        let deadline = Instant::now() + bound;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return true;
            }
            sleep(EXIT_POLL).await;
        }
        false
    }

    fn signal_groups(&self, signal: i32) {
        for pgid in [self.worker_pid, self.aux_pid].into_iter().flatten() {
            if let Err(e) = tree::signal_group(pgid, signal) {
                warn!(pgid, signal, error = %e, "failed to signal process group");
            }
        }
    }

    fn kill_trees(&self) {
        for pid in [self.worker_pid, self.aux_pid].into_iter().flatten() {
            tree::kill_tree(pid, &self.proc_root);
        }
    }

    /// Graceful shutdown cascade: stop sentinel, SIGTERM to the process
    /// groups, then SIGKILL of every descendant. Each step only runs if the
    /// group survived the previous one. Safe to call repeatedly.
    pub async fn terminate(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        if !self.is_alive() {
            debug!("terminate: worker group already dead");
            return;
        }

        info!(worker_pid = ?self.worker_pid, "terminating worker group");
        let _ = self.commands.send(BridgeCommand::Stop);

        if !self.wait_for_exit(self.policy.stop_grace).await {
            return;
        }

        info!("worker group still alive; sending SIGTERM");
        self.signal_groups(libc::SIGTERM);

        if !self.wait_for_exit(self.policy.term_grace).await {
            return;
        }

        warn!("worker group survived SIGTERM; killing process trees");
        self.kill_trees();
        self.wait_for_exit(self.policy.child_kill_grace + self.policy.stop_grace)
            .await;
    }

    /// Immediate variant of [`terminate`](Self::terminate) with no grace
    /// periods between the steps.
    pub async fn kill(&mut self) {
        self.killed.store(true, Ordering::SeqCst);
        if !self.is_alive() {
            return;
        }

        info!(worker_pid = ?self.worker_pid, "killing worker group");
        let _ = self.commands.send(BridgeCommand::Stop);
        self.signal_groups(libc::SIGTERM);
        if self.is_alive() {
            self.kill_trees();
        }
        self.wait_for_exit(self.policy.child_kill_grace + self.policy.stop_grace)
            .await;
    }

    /// True once the bridge task itself has returned.
    pub fn task_finished(&self) -> bool {
        self.task.is_finished()
    }
}
