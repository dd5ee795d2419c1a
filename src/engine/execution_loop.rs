// src/engine/execution_loop.rs

use std::fmt;
use std::time::Instant;

use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::TransportFactory;
use crate::config::NodeConfig;
use crate::coordinator::{Coordinator, CoordinatorClient, JobState};
use crate::engine::job::{JobDescription, raw_job_id, run_hook};
use crate::engine::metrics::{HeartbeatMetrics, MetricsFile};
use crate::engine::results::{
    ResultStager, StagerFactory, dump_undelivered, immediate_reporting, partition_outputs,
};
use crate::engine::{JobOutcome, LoopExit, LoopState};
use crate::errors::{DroidError, Result};
use crate::process::LaunchSpec;
use crate::supervisor::{DefaultMessageParser, SupervisorSettings, WorkUnitSupervisor};
use crate::types::WorkBatch;

/// One job between setup and its final report.
struct ActiveJob {
    job: JobDescription,
    supervisor: WorkUnitSupervisor,
    stager: Box<dyn ResultStager>,
    started: Instant,
    last_heartbeat: Option<Instant>,
    request_failures: u32,
    failed: bool,
}

/// The per-node control loop.
///
/// Fetches jobs from the coordinator one at a time, feeds each job's worker
/// group with as many event ranges as it can take, reports results and
/// heartbeats, and runs the stop sequence when the shutdown token fires.
pub struct ExecutionLoop<C: Coordinator, F: TransportFactory> {
    config: NodeConfig,
    client: CoordinatorClient<C>,
    transports: F,
    stager_factory: StagerFactory,
    shutdown: CancellationToken,
    metrics: MetricsFile,
    state: LoopState,
    stopping: bool,
    node_finished: bool,
    failed_jobs: u32,
}

impl<C: Coordinator, F: TransportFactory> fmt::Debug for ExecutionLoop<C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLoop")
            .field("node_id", &self.config.node_id)
            .field("state", &self.state)
            .field("failed_jobs", &self.failed_jobs)
            .finish_non_exhaustive()
    }
}

impl<C: Coordinator, F: TransportFactory> ExecutionLoop<C, F> {
    pub fn new(
        config: NodeConfig,
        coordinator: C,
        transports: F,
        shutdown: CancellationToken,
    ) -> Self {
        let client = CoordinatorClient::new(coordinator, config.node_id);
        let metrics = MetricsFile::new(config.metrics_path());
        Self {
            config,
            client,
            transports,
            stager_factory: immediate_reporting(),
            shutdown,
            metrics,
            state: LoopState::FetchingJob,
            stopping: false,
            node_finished: false,
            failed_jobs: 0,
        }
    }

    pub fn with_stager_factory(mut self, factory: StagerFactory) -> Self {
        self.stager_factory = factory;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn client(&self) -> &CoordinatorClient<C> {
        &self.client
    }

    pub fn metrics(&self) -> &MetricsFile {
        &self.metrics
    }

    /// Run jobs until there are none left, too many have failed, or a stop
    /// was requested. Reports the node as finished exactly once on the way
    /// out.
    pub async fn run(&mut self) -> Result<LoopExit> {
        info!(node_id = self.config.node_id, "execution loop started");

        let exit = match std::fs::create_dir_all(self.config.node_dir()) {
            Ok(()) => self.run_jobs().await,
            Err(e) => Err(DroidError::SetupError(format!(
                "creating node directory {}: {}",
                self.config.node_dir().display(),
                e
            ))),
        };

        self.finish_node().await;
        self.state = LoopState::Finished;

        match &exit {
            Ok(reason) => info!(?reason, "execution loop finished"),
            Err(e) => error!(error = %e, "execution loop failed"),
        }
        exit
    }

    async fn run_jobs(&mut self) -> Result<LoopExit> {
        let mut jobs_run = 0u32;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(LoopExit::Stopped);
            }

            self.state = LoopState::FetchingJob;
            let Some(job) = self.fetch_job().await else {
                if self.shutdown.is_cancelled() {
                    return Ok(LoopExit::Stopped);
                }
                return Ok(if jobs_run == 0 {
                    LoopExit::NoJob
                } else {
                    LoopExit::Completed
                });
            };
            jobs_run += 1;

            match self.run_one_job(job).await {
                JobOutcome::Stopped => return Ok(LoopExit::Stopped),
                JobOutcome::SetupFailed => self.failed_jobs += 1,
                JobOutcome::Completed { exit_code, failed } => {
                    if exit_code != 0 || failed {
                        warn!(exit_code, failed, "job did not complete cleanly");
                        self.failed_jobs += 1;
                    }
                }
            }

            if self.failed_jobs >= self.config.run_loop.max_failed_jobs {
                warn!(failed_jobs = self.failed_jobs, "too many failed jobs; not asking for more");
                return Ok(LoopExit::TooManyFailures);
            }
        }
    }

    async fn fetch_job(&mut self) -> Option<Value> {
        let result = tokio::select! {
            r = self.client.get_job() => r,
            _ = self.shutdown.cancelled() => return None,
        };

        match result {
            Ok(Some(job)) => {
                info!(job_id = %raw_job_id(&job), "got job");
                Some(job)
            }
            Ok(None) => {
                info!("coordinator has no job for this node");
                None
            }
            Err(e) => {
                warn!(error = %e, "failed to get a job");
                None
            }
        }
    }

    async fn run_one_job(&mut self, job: Value) -> JobOutcome {
        self.state = LoopState::SettingUp;
        let job_id = raw_job_id(&job);

        let mut active = match self.setup(job).await {
            Ok(active) => active,
            Err(e) => {
                error!(job_id = %job_id, error = %e, "job setup failed");
                self.report_job_state(&job_id, JobState::Failed).await;
                return JobOutcome::SetupFailed;
            }
        };

        self.state = LoopState::Running;
        if self.run_active(&mut active).await {
            return JobOutcome::Stopped;
        }

        self.drain(&mut active).await
    }

    async fn setup(&mut self, job: Value) -> Result<ActiveJob> {
        let job = JobDescription::from_value(job)?;
        let cores = job.validate()?;
        let node_dir = self.config.node_dir();

        if let Some(cmd) = &job.pre_setup {
            let code = run_hook("PreSetup", cmd, &node_dir).await?;
            if code != 0 {
                return Err(DroidError::SetupError(format!(
                    "PreSetup exited with {}",
                    code
                )));
            }
        }

        let transport = self
            .transports
            .open(&node_dir, &self.config.worker.socket_name)
            .map_err(|e| DroidError::SetupError(format!("opening worker socket: {}", e)))?;

        let mut launch = LaunchSpec::new(job.worker_cmd.clone(), node_dir);
        launch.aux_cmd = job.aux_cmd.clone();

        let settings = SupervisorSettings::from_config(&self.config, cores);
        let parser = DefaultMessageParser::new()?;
        let supervisor = WorkUnitSupervisor::start(&settings, &launch, transport, Box::new(parser))?;
        let stager = (self.stager_factory)(&job);

        info!(job_id = %job.job_id, cores, "job running");
        Ok(ActiveJob {
            job,
            supervisor,
            stager,
            started: Instant::now(),
            last_heartbeat: None,
            request_failures: 0,
            failed: false,
        })
    }

    /// Tick until the worker group is dead. Returns true if the job was
    /// stopped by a shutdown request instead.
    async fn run_active(&mut self, a: &mut ActiveJob) -> bool {
        while !a.supervisor.is_dead() {
            if self.shutdown.is_cancelled() {
                self.stop_job(a).await;
                return true;
            }

            self.replenish(a).await;
            if self.shutdown.is_cancelled() {
                continue;
            }

            if let Err(e) = a.supervisor.poll().await {
                error!(job_id = %a.job.job_id, error = %e, "supervisor failed");
                a.failed = true;
                if e.is_fatal_to_group() {
                    a.supervisor.terminate().await;
                }
            }

            self.report_outputs(a, false).await;
            sleep(self.config.run_loop.idle_sleep).await;
            self.heartbeat_if_due(a).await;
        }
        false
    }

    /// Ask for as many ranges as the supervisor can take.
    async fn replenish(&mut self, a: &mut ActiveJob) {
        let max_failures = self.config.coordinator.max_request_failures;

        loop {
            let needed = a.supervisor.needed_units();
            if needed == 0 || self.shutdown.is_cancelled() {
                return;
            }

            debug!(job_id = %a.job.job_id, needed, "requesting event ranges");
            let result = tokio::select! {
                r = self.client.get_event_ranges(&a.job.job_id, needed) => r,
                _ = self.shutdown.cancelled() => return,
            };

            match result {
                Ok(ranges) if ranges.is_empty() => {
                    a.request_failures = 0;
                    info!(job_id = %a.job.job_id, "coordinator has no more event ranges");
                    a.supervisor.insert_batch(WorkBatch::NoMoreWork);
                }
                Ok(ranges) => {
                    a.request_failures = 0;
                    info!(job_id = %a.job.job_id, count = ranges.len(), "got event ranges");
                    a.supervisor.insert_ranges(ranges);
                }
                Err(e) => {
                    a.request_failures += 1;
                    warn!(
                        job_id = %a.job.job_id,
                        failures = a.request_failures,
                        error = %e,
                        "event range request failed"
                    );
                    if a.request_failures >= max_failures {
                        warn!(job_id = %a.job.job_id, "giving up on event ranges; finishing job");
                        a.supervisor.insert_batch(WorkBatch::NoMoreWork);
                    }
                }
            }
        }
    }

    /// Drain completed results and report them. With `forced`, results held
    /// by the stager are reported too.
    async fn report_outputs(&mut self, a: &mut ActiveJob, forced: bool) {
        let drained = a.supervisor.take_outputs();
        let reportable = partition_outputs(drained, a.stager.as_mut(), a.job.yoda_to_os, forced);
        if reportable.is_empty() {
            return;
        }

        match self.client.update_event_ranges(&reportable).await {
            Ok(()) => debug!(count = reportable.len(), "results reported"),
            Err(e) => {
                warn!(error = %e, count = reportable.len(), "reporting results failed; dumping them");
                if let Err(e) =
                    dump_undelivered(&self.config.node_dir(), self.config.node_id, &reportable)
                {
                    error!(error = %e, "could not dump undelivered results");
                }
            }
        }
    }

    async fn heartbeat_if_due(&mut self, a: &mut ActiveJob) {
        let due = a
            .last_heartbeat
            .is_none_or(|t| t.elapsed() >= self.config.run_loop.heartbeat_interval);
        if due {
            self.heartbeat(a).await;
        }
    }

    async fn heartbeat(&mut self, a: &mut ActiveJob) {
        let metrics = HeartbeatMetrics::new(
            &a.job.job_id,
            self.config.node_id,
            a.started.elapsed().as_secs_f64(),
            a.supervisor.accounting(),
        );

        if let Err(e) = self.metrics.record(metrics.clone()) {
            warn!(error = %e, "could not write metrics file");
        }
        if let Err(e) = self.client.heartbeat(&metrics).await {
            warn!(error = %e, "heartbeat failed");
        }
        a.last_heartbeat = Some(Instant::now());
    }

    /// Worker group is gone: collect everything and close the job.
    async fn drain(&mut self, a: &mut ActiveJob) -> JobOutcome {
        self.state = LoopState::Draining;
        info!(job_id = %a.job.job_id, "draining job");

        self.heartbeat(a).await;
        a.supervisor.flush().await;
        a.stager.stop();
        self.report_outputs(a, true).await;
        self.run_post_run(a).await;
        self.heartbeat(a).await;

        let exit_code = a.supervisor.child_ret_status().unwrap_or(-1);
        let state = if a.failed {
            JobState::Failed
        } else {
            JobState::Finished
        };
        self.report_job_state(&a.job.job_id, state).await;

        info!(job_id = %a.job.job_id, exit_code, state = state.as_str(), "job finished");
        JobOutcome::Completed {
            exit_code,
            failed: a.failed,
        }
    }

    /// Stop sequence for a shutdown request. Runs at most once.
    async fn stop_job(&mut self, a: &mut ActiveJob) {
        if self.stopping {
            return;
        }
        self.stopping = true;
        self.state = LoopState::Stopping;
        info!(job_id = %a.job.job_id, "stop requested; killing worker group");

        a.supervisor.kill().await;
        self.heartbeat(a).await;
        a.supervisor.flush().await;
        a.stager.stop();
        self.report_outputs(a, true).await;
        self.run_post_run(a).await;

        info!(job_id = %a.job.job_id, "job stopped");
    }

    async fn run_post_run(&mut self, a: &mut ActiveJob) {
        let Some(cmd) = a.job.post_run.clone() else {
            return;
        };
        match run_hook("PostRun", &cmd, &self.config.node_dir()).await {
            Ok(0) => {}
            Ok(code) => warn!(job_id = %a.job.job_id, exit_code = code, "PostRun failed"),
            Err(e) => warn!(job_id = %a.job.job_id, error = %e, "PostRun could not be run"),
        }
    }

    async fn report_job_state(&mut self, job_id: &str, state: JobState) {
        if let Err(e) = self.client.finish_job(job_id, state).await {
            warn!(job_id, state = state.as_str(), error = %e, "finishJob failed");
        }
    }

    async fn finish_node(&mut self) {
        if self.node_finished {
            return;
        }
        self.node_finished = true;
        if let Err(e) = self.client.finish_node().await {
            warn!(error = %e, "finishNode failed");
        }
    }
}
