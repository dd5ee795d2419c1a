// src/bridge/forwarder.rs

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bridge::reader::spawn_reader;
use crate::bridge::transport::{TransportWriter, WorkerTransport};
use crate::bridge::{BridgeCommand, BridgeEndpoints};
use crate::errors::{DroidError, Result};
use crate::process::WorkerProcesses;

/// Timings of the bridge task.
#[derive(Debug, Clone, Copy)]
pub struct BridgeSettings {
    pub reader_backoff: Duration,
    pub liveness_interval: Duration,
    pub child_kill_grace: Duration,
}

/// Spawn the bridge task that owns the worker processes and the socket.
///
/// It is the only writer to the worker: every outbound message goes through
/// its command queue, in order. The returned receiver yields the worker's
/// exit code once the task has torn everything down.
pub fn spawn_bridge(
    transport: Box<dyn WorkerTransport>,
    processes: WorkerProcesses,
    endpoints: BridgeEndpoints,
    settings: BridgeSettings,
) -> (JoinHandle<()>, oneshot::Receiver<i32>) {
    let (exit_tx, exit_rx) = oneshot::channel();
    let handle = tokio::spawn(run_bridge(transport, processes, endpoints, settings, exit_tx));
    (handle, exit_rx)
}

async fn run_bridge(
    transport: Box<dyn WorkerTransport>,
    mut processes: WorkerProcesses,
    endpoints: BridgeEndpoints,
    settings: BridgeSettings,
    exit_tx: oneshot::Sender<i32>,
) {
    let BridgeEndpoints {
        mut commands,
        inbound,
    } = endpoints;

    let stop_reader = CancellationToken::new();
    let mut reader: Option<JoinHandle<Result<()>>> = None;
    let mut writer: Option<Box<dyn TransportWriter>> = None;
    let mut connecting = transport.connect();

    let mut tick = interval(settings.liveness_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("bridge task started");

    let outcome: Result<()> = loop {
        tokio::select! {
            // Stop and closure are checked before any batch handling.
            biased;

            cmd = commands.recv() => match cmd {
                None | Some(BridgeCommand::Stop) => {
                    debug!("bridge received stop");
                    break Ok(());
                }
                Some(BridgeCommand::Send(message)) => {
                    let Some(w) = writer.as_mut() else {
                        break Err(DroidError::TransportError(
                            "message to send before the worker connected".to_string(),
                        ));
                    };
                    if let Err(e) = w.send(&message).await {
                        break Err(DroidError::TransportError(format!("writing to worker: {}", e)));
                    }
                    debug!(%message, "forwarded to worker");
                }
            },

            res = &mut connecting, if writer.is_none() => match res {
                Ok((r, w)) => {
                    reader = Some(spawn_reader(
                        r,
                        inbound.clone(),
                        settings.reader_backoff,
                        stop_reader.clone(),
                    ));
                    writer = Some(w);
                }
                Err(e) => break Err(DroidError::TransportError(format!("accepting worker connection: {}", e))),
            },

            _ = tick.tick() => {
                let reader_running = reader.as_ref().is_none_or(|h| !h.is_finished());
                if processes.is_child_dead(reader_running) {
                    info!(reader_running, "worker group is no longer alive");
                    break Ok(());
                }
            }
        }
    };

    if let Err(e) = &outcome {
        error!(error = %e, "bridge failed; tearing down worker group");
    }

    // The reader keeps running through teardown, then drains what is left.
    processes.terminate_child(settings.child_kill_grace).await;
    stop_reader.cancel();

    if let Some(handle) = reader {
        match timeout(settings.reader_backoff + settings.child_kill_grace, handle).await {
            Ok(Ok(Err(e))) => warn!(error = %e, "socket reader ended with error"),
            Ok(Err(e)) => warn!(error = %e, "socket reader task panicked"),
            Err(_) => warn!("socket reader did not stop in time"),
            Ok(Ok(Ok(()))) => {}
        }
    }

    let code = processes.exit_code();
    info!(exit_code = code, "bridge task finished");
    let _ = exit_tx.send(code);
}
