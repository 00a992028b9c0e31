//! # Storage
//!
//! Thin wrapper over the filesystem holding the per-cycle recording. The WAV
//! framer needs seek-and-overwrite semantics on the sink it writes (header
//! back-patching), and the uploader needs to read the same object back in
//! bounded windows. A missing root directory is created on first use.

use crate::error::{NodeError, NodeResult};
use std::fs::{self, File, OpenOptions};
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::debug;

/// Write buffer in front of the WAV sink; keeps the sample loop free of syscalls
/// except once every few thousand samples.
const SINK_BUFFER_BYTES: usize = 8 * 1024;

/// Named objects under a single root directory.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create (or truncate) `name` for writing.
    ///
    /// The returned sink is readable and seekable as well as writable so the
    /// caller can patch bytes it has already written.
    pub fn create(&self, name: &str) -> NodeResult<BufWriter<File>> {
        fs::create_dir_all(&self.root).map_err(|e| {
            NodeError::StorageOpen(format!("{}: {}", self.root.display(), e))
        })?;

        let path = self.path_of(name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| NodeError::StorageOpen(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Opened storage sink");
        Ok(BufWriter::with_capacity(SINK_BUFFER_BYTES, file))
    }

    /// Open `name` for streaming reads.
    pub async fn open_read(&self, name: &str) -> NodeResult<tokio::fs::File> {
        let path = self.path_of(name);
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| NodeError::StorageOpen(format!("{}: {}", path.display(), e)))
    }

    /// Size of `name` in bytes, `None` if it does not exist.
    pub fn size(&self, name: &str) -> Option<u64> {
        fs::metadata(self.path_of(name)).ok().map(|m| m.len())
    }
}
