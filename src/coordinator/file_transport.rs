// src/coordinator/file_transport.rs

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::coordinator::channel::ChannelTransport;

pub const REQUEST_FILE: &str = "request.json";
pub const REPLY_FILE: &str = "reply.json";

/// File handshake in a directory shared with the coordinator.
///
/// Requests are written to a temporary file and renamed into place so the
/// coordinator never sees a partial request. A reply is consumed by removing
/// it once read.
#[derive(Debug, Clone)]
pub struct FileHandshakeTransport {
    dir: PathBuf,
}

impl FileHandshakeTransport {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn request_path(&self) -> PathBuf {
        self.dir.join(REQUEST_FILE)
    }

    pub fn reply_path(&self) -> PathBuf {
        self.dir.join(REPLY_FILE)
    }
}

impl ChannelTransport for FileHandshakeTransport {
    fn post(&mut self, request: &[u8]) -> io::Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", REQUEST_FILE));
        fs::write(&tmp, request)?;
        fs::rename(&tmp, self.request_path())?;
        debug!(path = %self.request_path().display(), "request file written");
        Ok(())
    }

    fn try_fetch(&mut self) -> io::Result<Option<Vec<u8>>> {
        let path = self.reply_path();
        match fs::read(&path) {
            Ok(bytes) => {
                fs::remove_file(&path)?;
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
