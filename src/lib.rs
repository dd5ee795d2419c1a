// src/lib.rs

pub mod bridge;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod process;
pub mod shutdown;
pub mod supervisor;
pub mod types;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::bridge::UnixSocketFactory;
use crate::cli::CliArgs;
use crate::config::NodeConfig;
use crate::config::loader::load_and_validate;
use crate::coordinator::{FileHandshakeTransport, RequestResponseChannel};
use crate::engine::{ExecutionLoop, LoopExit};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the coordinator channel over the file handshake
/// - the Unix-socket worker transport
/// - signal handling
/// - the execution loop
///
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let mut cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading config {}", args.config.display()))?;

    if let Some(id) = args.node_id {
        cfg.node_id = id;
    }
    if let Some(dir) = args.work_dir {
        cfg.work_dir = dir;
    }

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(0);
    }

    let transport = FileHandshakeTransport::new(&cfg.coordinator.exchange_dir)
        .with_context(|| {
            format!(
                "preparing exchange dir {}",
                cfg.coordinator.exchange_dir.display()
            )
        })?;
    let channel = RequestResponseChannel::new(transport, cfg.coordinator.poll_interval);

    let shutdown = crate::shutdown::install_shutdown_handler()
        .context("installing signal handlers")?;

    info!(node_id = cfg.node_id, node_dir = %cfg.node_dir().display(), "eventdroid starting");

    let mut execution = ExecutionLoop::new(cfg, channel, UnixSocketFactory, shutdown);
    let exit: LoopExit = execution.run().await?;

    Ok(exit.exit_code())
}

/// Simple dry-run output: print the resolved configuration.
fn print_dry_run(cfg: &NodeConfig) {
    println!("eventdroid dry-run");
    println!("  node.id = {}", cfg.node_id);
    println!("  node.work_dir = {}", cfg.work_dir.display());
    println!("  node dir = {}", cfg.node_dir().display());
    println!();

    println!("coordinator:");
    println!("  exchange_dir = {}", cfg.coordinator.exchange_dir.display());
    println!("  poll_interval = {:?}", cfg.coordinator.poll_interval);
    println!("  max_request_failures = {}", cfg.coordinator.max_request_failures);
    println!();

    let w = &cfg.worker;
    println!("worker:");
    println!("  socket = {}", cfg.socket_path().display());
    println!("  reader_backoff = {:?}", w.reader_backoff);
    println!("  liveness_interval = {:?}", w.liveness_interval);
    println!(
        "  termination = stop {:?}, term {:?}, kill {:?}",
        w.termination.stop_grace, w.termination.term_grace, w.termination.child_kill_grace
    );
    println!("  drain_timeout = {:?}", w.drain_timeout);
    println!();

    let l = &cfg.run_loop;
    println!("loop:");
    println!("  heartbeat_interval = {:?}", l.heartbeat_interval);
    println!("  idle_sleep = {:?}", l.idle_sleep);
    println!("  cpu_sample_interval = {:?}", l.cpu_sample_interval);
    println!("  max_failed_jobs = {}", l.max_failed_jobs);

    debug!("dry-run complete (nothing started)");
}
