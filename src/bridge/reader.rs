// src/bridge/reader.rs

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bridge::transport::TransportReader;
use crate::errors::{DroidError, Result};

/// Spawn the task that moves worker messages onto the inbound queue.
///
/// The task polls the transport without blocking and backs off for
/// `backoff` whenever nothing is available. It ends when `stop` fires, when
/// the inbound receiver is gone, or when the transport fails; in the last
/// case the join result carries a `TransportError`.
///
/// On `stop`, whatever the worker already wrote is still moved onto the
/// inbound queue before the task returns.
pub fn spawn_reader(
    mut reader: Box<dyn TransportReader>,
    inbound: mpsc::UnboundedSender<String>,
    backoff: Duration,
    stop: CancellationToken,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        debug!("socket reader started");
        loop {
            if stop.is_cancelled() {
                drain_remaining(reader.as_mut(), &inbound);
                break;
            }

            match reader.try_recv() {
                Ok(Some(message)) => {
                    debug!(%message, "received from worker");
                    if inbound.send(message).is_err() {
                        info!("inbound queue closed; socket reader stopping");
                        break;
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = stop.cancelled() => {
                            drain_remaining(reader.as_mut(), &inbound);
                            break;
                        }
                        _ = sleep(backoff) => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "socket reader failed");
                    return Err(DroidError::TransportError(format!("reading from worker: {}", e)));
                }
            }
        }
        debug!("socket reader finished");
        Ok(())
    })
}

/// Move every message still buffered in the transport onto the inbound
/// queue. Stops at the first empty read, EOF or error.
fn drain_remaining(reader: &mut dyn TransportReader, inbound: &mpsc::UnboundedSender<String>) {
    let mut drained = 0usize;
    loop {
        match reader.try_recv() {
            Ok(Some(message)) => {
                if inbound.send(message).is_err() {
                    break;
                }
                drained += 1;
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "transport closed while draining");
                break;
            }
        }
    }
    if drained > 0 {
        info!(drained, "late worker messages kept after stop");
    }
}
