// src/bridge/mod.rs

//! Message bridge between the supervisor and the worker.
//!
//! - [`transport`]: the worker-facing socket abstraction.
//! - [`reader`]: task that moves worker messages onto the inbound queue.
//! - [`forwarder`]: the bridge task that owns the worker processes, writes
//!   outbound messages and watches liveness.
//!
//! The supervisor side only sees [`MessageBridge`]: an outbound command queue
//! and a non-blocking inbound queue.

pub mod forwarder;
pub mod reader;
pub mod transport;

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::errors::{DroidError, Result};

pub use forwarder::{BridgeSettings, spawn_bridge};
pub use transport::{
    BoxFuture, TransportFactory, TransportHalves, TransportReader, TransportWriter,
    UnixSocketFactory, UnixSocketTransport, WorkerTransport,
};

/// Outbound command for the bridge task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Write one framed message to the worker.
    Send(String),
    /// Tear down the worker group and exit.
    Stop,
}

/// The bridge-task side of the queues.
#[derive(Debug)]
pub struct BridgeEndpoints {
    pub commands: mpsc::UnboundedReceiver<BridgeCommand>,
    pub inbound: mpsc::UnboundedSender<String>,
}

/// Supervisor-side handle.
#[derive(Debug)]
pub struct MessageBridge {
    commands: mpsc::UnboundedSender<BridgeCommand>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl MessageBridge {
    pub fn new() -> (Self, BridgeEndpoints) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Self {
                commands: cmd_tx,
                inbound: in_rx,
            },
            BridgeEndpoints {
                commands: cmd_rx,
                inbound: in_tx,
            },
        )
    }

    /// Queue a message for the worker.
    ///
    /// Fails with `TransportError` once the bridge task has gone away.
    pub fn send(&self, message: String) -> Result<()> {
        self.commands
            .send(BridgeCommand::Send(message))
            .map_err(|_| DroidError::TransportError("bridge task is gone".to_string()))
    }

    /// Next message from the worker, if one is waiting.
    pub fn try_next(&mut self) -> Option<String> {
        match self.inbound.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// A sender the process group uses to push the stop sentinel.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<BridgeCommand> {
        self.commands.clone()
    }
}
