use std::io;
use std::path::Path;
use std::time::Duration;

use eventdroid::bridge::{
    BoxFuture, TransportFactory, TransportHalves, TransportReader, TransportWriter,
    WorkerTransport,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

/// In-memory stand-in for the worker socket.
///
/// The supervisor side is handed to the bridge; the test drives the
/// [`WorkerEnd`] as if it were the worker.
pub struct MemoryTransport {
    to_worker: mpsc::UnboundedSender<String>,
    from_worker: mpsc::UnboundedReceiver<String>,
}

/// The worker's side of a [`MemoryTransport`].
pub struct WorkerEnd {
    to_supervisor: mpsc::UnboundedSender<String>,
    from_supervisor: mpsc::UnboundedReceiver<String>,
}

pub fn memory_pair() -> (MemoryTransport, WorkerEnd) {
    let (to_worker, from_supervisor) = mpsc::unbounded_channel();
    let (to_supervisor, from_worker) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            to_worker,
            from_worker,
        },
        WorkerEnd {
            to_supervisor,
            from_supervisor,
        },
    )
}

impl WorkerTransport for MemoryTransport {
    fn connect(self: Box<Self>) -> BoxFuture<'static, io::Result<TransportHalves>> {
        Box::pin(async move {
            let reader: Box<dyn TransportReader> = Box::new(MemoryReader {
                rx: self.from_worker,
            });
            let writer: Box<dyn TransportWriter> = Box::new(MemoryWriter {
                tx: self.to_worker,
            });
            Ok((reader, writer))
        })
    }
}

struct MemoryReader {
    rx: mpsc::UnboundedReceiver<String>,
}

impl TransportReader for MemoryReader {
    fn try_recv(&mut self) -> io::Result<Option<String>> {
        match self.rx.try_recv() {
            Ok(msg) => Ok(Some(msg)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker end dropped",
            )),
        }
    }
}

struct MemoryWriter {
    tx: mpsc::UnboundedSender<String>,
}

impl TransportWriter for MemoryWriter {
    fn send<'a>(&'a mut self, message: &'a str) -> BoxFuture<'a, io::Result<()>> {
        let res = self
            .tx
            .send(message.to_string())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "worker end dropped"));
        Box::pin(async move { res })
    }
}

impl WorkerEnd {
    /// Emit a message as the worker.
    pub fn say(&self, message: &str) {
        let _ = self.to_supervisor.send(message.to_string());
    }

    pub fn ready(&self) {
        self.say("Ready for events");
    }

    /// Report a finished range in the worker's result format.
    pub fn finished(&self, id: &str) {
        self.say(&format!("/tmp/out/{}.pool.root,ID:{},CPU:1,WALL:1", id, id));
    }

    /// Next message from the supervisor, waiting up to `timeout`.
    pub async fn next(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, self.from_supervisor.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_next(&mut self) -> Option<String> {
        self.from_supervisor.try_recv().ok()
    }
}

/// Hands out one memory transport per job and passes the worker ends to the
/// test.
pub struct MemoryTransportFactory {
    ends: mpsc::UnboundedSender<WorkerEnd>,
}

impl MemoryTransportFactory {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkerEnd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { ends: tx }, rx)
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(&mut self, _node_dir: &Path, _socket_name: &str) -> io::Result<Box<dyn WorkerTransport>> {
        let (transport, end) = memory_pair();
        self.ends
            .send(end)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "test dropped the worker-end receiver"))?;
        Ok(Box::new(transport))
    }
}
