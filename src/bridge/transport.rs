// src/bridge/transport.rs

//! Worker-facing transport abstraction.
//!
//! The bridge talks to a `WorkerTransport` instead of a raw socket. This keeps
//! the production Unix-socket implementation separate from the in-memory one
//! the test suite uses.
//!
//! Framing is newline-delimited: one message per line in both directions.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixListener;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Inbound half: messages produced by the worker.
pub trait TransportReader: Send + 'static {
    /// Non-blocking receive. `Ok(None)` means nothing complete is available
    /// right now; an `Err` is fatal to the bridge.
    fn try_recv(&mut self) -> io::Result<Option<String>>;
}

/// Outbound half: batches and control messages for the worker.
pub trait TransportWriter: Send + 'static {
    fn send<'a>(&'a mut self, message: &'a str) -> BoxFuture<'a, io::Result<()>>;
}

pub type TransportHalves = (Box<dyn TransportReader>, Box<dyn TransportWriter>);

/// A not-yet-connected transport. `connect` resolves once the worker has
/// attached.
pub trait WorkerTransport: Send + 'static {
    fn connect(self: Box<Self>) -> BoxFuture<'static, io::Result<TransportHalves>>;
}

/// Produces one fresh transport per job.
pub trait TransportFactory: Send {
    fn open(&mut self, node_dir: &Path, socket_name: &str) -> io::Result<Box<dyn WorkerTransport>>;
}

/// Unix domain socket the worker connects to.
#[derive(Debug)]
pub struct UnixSocketTransport {
    listener: UnixListener,
    path: PathBuf,
}

impl UnixSocketTransport {
    /// Bind at `path`, removing a stale socket file left by a previous job.
    pub fn bind(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if path.exists() {
            debug!(path = %path.display(), "removing stale socket file");
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "worker socket bound");
        Ok(Self { listener, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkerTransport for UnixSocketTransport {
    fn connect(self: Box<Self>) -> BoxFuture<'static, io::Result<TransportHalves>> {
        Box::pin(async move {
            let (stream, _) = self.listener.accept().await?;
            info!(path = %self.path.display(), "worker connected");
            let (read, write) = stream.into_split();
            let reader: Box<dyn TransportReader> = Box::new(LineReader::new(read));
            let writer: Box<dyn TransportWriter> = Box::new(LineWriter { half: write });
            Ok((reader, writer))
        })
    }
}

/// Binds a [`UnixSocketTransport`] inside the node directory for each job.
#[derive(Debug, Default)]
pub struct UnixSocketFactory;

impl TransportFactory for UnixSocketFactory {
    fn open(&mut self, node_dir: &Path, socket_name: &str) -> io::Result<Box<dyn WorkerTransport>> {
        let transport = UnixSocketTransport::bind(node_dir.join(socket_name))?;
        Ok(Box::new(transport))
    }
}

/// Splits the inbound byte stream into lines without blocking.
struct LineReader {
    half: OwnedReadHalf,
    buf: Vec<u8>,
    closed: bool,
}

impl LineReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            buf: Vec::new(),
            closed: false,
        }
    }

    fn pop_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1]);
        Some(text.trim_end_matches('\r').to_string())
    }
}

impl TransportReader for LineReader {
    fn try_recv(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pop_line() {
            return Ok(Some(line));
        }
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker closed the socket",
            ));
        }

        let mut chunk = [0u8; 4096];
        loop {
            match self.half.try_read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    // Deliver a final unterminated message before reporting EOF.
                    if !self.buf.is_empty() {
                        self.buf.push(b'\n');
                    }
                    break;
                }
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        match self.pop_line() {
            Some(line) => Ok(Some(line)),
            None if self.closed => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "worker closed the socket",
            )),
            None => Ok(None),
        }
    }
}

struct LineWriter {
    half: OwnedWriteHalf,
}

impl TransportWriter for LineWriter {
    fn send<'a>(&'a mut self, message: &'a str) -> BoxFuture<'a, io::Result<()>> {
        Box::pin(async move {
            self.half.write_all(message.as_bytes()).await?;
            self.half.write_all(b"\n").await?;
            self.half.flush().await
        })
    }
}
