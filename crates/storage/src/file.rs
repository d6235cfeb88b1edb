//! File-backed host store
//!
//! `FileStore` keeps committed state in memory (a [`MemoryStore`]) and
//! makes it durable with an append-only commit log in its directory:
//!
//! ```text
//! <dir>/
//! └── commit.log    # header + one CRC-framed frame per committed batch
//! ```
//!
//! A commit appends its frame before the batch becomes visible in memory;
//! the fsync policy comes from [`DurabilityMode`]. On open the log is
//! replayed. A torn final frame (crash mid-append) is truncated away, which
//! drops exactly the crank that never finished committing.
//!
//! A commit whose append or fsync fails is cut back out of the log before
//! the error is returned, so the next commit never lands behind a partial
//! or orphaned frame. If the cut itself fails the store refuses further
//! commits until it is reopened.
//!
//! [`FileStore::checkpoint`] rewrites the log as a single frame holding the
//! full state, reclaiming space freed by compaction and pruning. A store
//! with no commits checkpoints to a bare header.

use crate::batch::{Mutation, WriteBatch};
use crate::format::{decode_frames, encode_frame, encode_header, CommitRecord, FrameError};
use crate::memory::MemoryStore;
use crate::traits::HostStore;
use crate::view::{KvRead, ReadView};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use vatstore_core::{DurabilityMode, Error, Result};

/// File name of the commit log inside a store directory
pub const COMMIT_LOG_FILE: &str = "commit.log";

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Corruption(e.to_string())
    }
}

struct LogWriter {
    file: File,
    /// Length of the log through the last committed frame
    len: u64,
    commits_since_open: u64,
    poisoned: bool,
    #[cfg(test)]
    fail_next: Option<FailPoint>,
}

/// Injected failure for the next append
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum FailPoint {
    /// Write half the frame, then fail
    PartialWrite,
    /// Write the whole frame, then fail the fsync
    Sync,
}

impl LogWriter {
    fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(LogWriter {
            file,
            len,
            commits_since_open: 0,
            poisoned: false,
            #[cfg(test)]
            fail_next: None,
        })
    }

    fn write_frame(&mut self, frame: &[u8], sync: bool) -> Result<()> {
        if let Some(result) = self.injected(frame) {
            return result;
        }
        self.file.write_all(frame)?;
        if sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected(&mut self, _frame: &[u8]) -> Option<Result<()>> {
        None
    }

    #[cfg(test)]
    fn injected(&mut self, frame: &[u8]) -> Option<Result<()>> {
        let point = self.fail_next.take()?;
        let written = match point {
            FailPoint::PartialWrite => &frame[..frame.len() / 2],
            FailPoint::Sync => frame,
        };
        if let Err(e) = self.file.write_all(written) {
            return Some(Err(e.into()));
        }
        Some(Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("injected {:?} failure", point),
        ))))
    }

    /// Append a frame, cutting the log back to its last commit on failure
    fn append(&mut self, frame: &[u8], durability: DurabilityMode) -> Result<()> {
        if self.poisoned {
            return Err(Error::InvalidOperation(
                "commit log could not be restored after a failed append; reopen the store"
                    .to_string(),
            ));
        }
        let sync = durability.should_sync(self.commits_since_open + 1);
        match self.write_frame(frame, sync) {
            Ok(()) => {
                self.len += frame.len() as u64;
                self.commits_since_open += 1;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, len = self.len, "commit log append failed, truncating");
                if let Err(cut) = self.file.set_len(self.len).and_then(|_| self.file.sync_data()) {
                    warn!(error = %cut, "could not truncate commit log, refusing commits");
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }
}

/// Durable host store backed by a commit log
pub struct FileStore {
    dir: PathBuf,
    memory: MemoryStore,
    log: Mutex<LogWriter>,
    durability: DurabilityMode,
}

impl FileStore {
    /// Open or create a store in `dir`
    pub fn open(dir: impl AsRef<Path>, durability: DurabilityMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let path = dir.join(COMMIT_LOG_FILE);

        let (data, version) = if path.exists() {
            Self::recover(&path)?
        } else {
            let mut file = File::create(&path)?;
            file.write_all(&encode_header())?;
            file.sync_all()?;
            debug!(path = %path.display(), "created commit log");
            (BTreeMap::new(), 0)
        };

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok(FileStore {
            dir,
            memory: MemoryStore::from_map(data, version),
            log: Mutex::new(LogWriter::new(file)?),
            durability,
        })
    }

    fn recover(path: &Path) -> Result<(BTreeMap<String, Vec<u8>>, u64)> {
        let bytes = fs::read(path)?;
        let log = decode_frames(&bytes)?;

        if log.torn_tail {
            warn!(
                path = %path.display(),
                valid_len = log.valid_len,
                file_len = bytes.len(),
                "truncating torn commit log tail"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(log.valid_len as u64)?;
            file.sync_all()?;
        }

        let mut data = BTreeMap::new();
        let mut version = 0;
        for record in log.records {
            if record.version <= version {
                return Err(Error::Corruption(format!(
                    "commit log version {} follows {}",
                    record.version, version
                )));
            }
            version = record.version;
            for (key, mutation) in record.mutations {
                match mutation {
                    Mutation::Put(value) => {
                        data.insert(key, value);
                    }
                    Mutation::Delete => {
                        data.remove(&key);
                    }
                }
            }
        }

        info!(
            path = %path.display(),
            version,
            keys = data.len(),
            "recovered store from commit log"
        );
        Ok((data, version))
    }

    /// Directory holding the commit log
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configured fsync policy
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    /// Rewrite the log as one frame holding the current state
    pub fn checkpoint(&self) -> Result<()> {
        let mut log = self.log.lock();
        let view = self.memory.read_view();

        // Recovery expects the first frame at version 1
        let frame = if view.version() == 0 {
            Vec::new()
        } else {
            let mut batch = WriteBatch::new();
            for (key, value) in view.scan_prefix("")? {
                batch.put(key, value);
            }
            encode_frame(&CommitRecord::from_batch(&batch, view.version()))?
        };

        let path = self.dir.join(COMMIT_LOG_FILE);
        let tmp = self.dir.join(format!("{}.tmp", COMMIT_LOG_FILE));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&encode_header())?;
            file.write_all(&frame)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let commits_since_open = log.commits_since_open;
        *log = LogWriter::new(OpenOptions::new().append(true).open(&path)?)?;
        log.commits_since_open = commits_since_open;
        info!(version = view.version(), keys = view.len(), "checkpointed commit log");
        Ok(())
    }
}

impl HostStore for FileStore {
    fn read_view(&self) -> ReadView {
        self.memory.read_view()
    }

    fn commit(&self, batch: WriteBatch, base_version: u64) -> Result<u64> {
        let mut log = self.log.lock();
        let durability = self.durability;
        self.memory.apply_with(batch, base_version, |batch, version| {
            let frame = encode_frame(&CommitRecord::from_batch(batch, version))?;
            log.append(&frame, durability)
        })
    }

    fn flush(&self) -> Result<()> {
        let log = self.log.lock();
        log.file.sync_data()?;
        Ok(())
    }
}
