//! Main entry point for vatstore.
//!
//! This module provides the `VatStore` struct, which owns the host store
//! and hands out cranks, read views and export/import sessions.

use crate::error::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use vatstore_artifacts::{ArtifactReader, ArtifactStore, CompactionReport, Crank};
use vatstore_core::{ArtifactMode, DurabilityMode, StoreConfig};
use vatstore_export::{
    import_archive, import_contents, ArchiveReader, ArchiveWriter, ExportInfo, ExportSession,
    ImportSummary,
};
use vatstore_storage::{FileStore, HostStore, MemoryStore};

/// A vat artifact store.
///
/// Create one with [`VatStore::open`], [`VatStore::ephemeral`] or
/// [`VatStore::builder`].
///
/// # Example
///
/// ```ignore
/// use vatstore::prelude::*;
///
/// let store = VatStore::open("./kernel-store")?;
/// let v1 = VatId::new("v1")?;
///
/// let mut crank = store.begin_crank();
/// crank.init_vat(&v1)?;
/// crank.append_entry(&v1, 0, &TranscriptEntry::new(0, json!(["deliver", "start"])))?;
/// crank.commit()?;
///
/// store.export_to_file(ArtifactMode::Operational, Path::new("v1.vatexport.tar.zst"))?;
/// ```
pub struct VatStore {
    artifacts: ArtifactStore,
    file: Option<Arc<FileStore>>,
}

impl std::fmt::Debug for VatStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VatStore")
            .field("path", &self.path())
            .field("mode", &self.artifact_mode())
            .field("version", &self.version())
            .finish()
    }
}

impl VatStore {
    /// Open a file-backed store in the given directory.
    ///
    /// Uses default settings (strict durability, operational retention).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Create an ephemeral store with no disk I/O.
    ///
    /// | Method | Disk Files | Recovery |
    /// |--------|------------|----------|
    /// | `VatStore::ephemeral()` | None | No |
    /// | `VatStore::open(path)` | User dir | Yes |
    pub fn ephemeral() -> Result<Self> {
        Self::builder().open()
    }

    /// Create a builder for store configuration.
    pub fn builder() -> VatStoreBuilder {
        VatStoreBuilder::new()
    }

    /// The artifact layer
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The active configuration
    pub fn config(&self) -> &StoreConfig {
        self.artifacts.config()
    }

    /// Retention mode compaction and pruning honor
    pub fn artifact_mode(&self) -> ArtifactMode {
        self.config().artifact_mode
    }

    /// Directory of a file-backed store
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|file| file.dir())
    }

    /// Check if this store keeps nothing on disk.
    pub fn is_ephemeral(&self) -> bool {
        self.file.is_none()
    }

    /// Version of the last committed crank
    pub fn version(&self) -> u64 {
        self.artifacts.host().version()
    }

    /// Begin a crank; its writes commit together or not at all.
    pub fn begin_crank(&self) -> Crank<'_> {
        self.artifacts.begin_crank()
    }

    /// Read view of the last committed state
    pub fn reader(&self) -> ArtifactReader {
        self.artifacts.reader()
    }

    /// Compact every vat under the configured mode, in one commit.
    pub fn compact(&self) -> Result<CompactionReport> {
        Ok(self.artifacts.compact()?)
    }

    /// Begin a consistent export under `mode`.
    pub fn export(&self, mode: ArtifactMode) -> Result<ExportSession> {
        Ok(ExportSession::begin(&self.artifacts, mode)?)
    }

    /// Export under `mode` into an archive file.
    pub fn export_to_file(&self, mode: ArtifactMode, path: &Path) -> Result<ExportInfo> {
        let session = self.export(mode)?;
        let writer = ArchiveWriter::new(self.config().compression_level);
        Ok(writer.write(&session, path)?)
    }

    /// Export under `mode` into archive bytes.
    pub fn export_to_vec(&self, mode: ArtifactMode) -> Result<(Vec<u8>, ExportInfo)> {
        let session = self.export(mode)?;
        let writer = ArchiveWriter::new(self.config().compression_level);
        Ok(writer.write_to_vec(&session)?)
    }

    /// Import an archive file into this store, which must be empty.
    pub fn import_archive(&self, path: &Path) -> Result<ImportSummary> {
        Ok(import_archive(&self.artifacts, path)?)
    }

    /// Import archive bytes into this store, which must be empty.
    pub fn import_bytes(&self, data: &[u8]) -> Result<ImportSummary> {
        let contents = ArchiveReader::read_all_from_bytes(data)?;
        Ok(import_contents(&self.artifacts, contents)?)
    }

    /// Force buffered commits to disk.
    ///
    /// Only matters for batched or no-durability modes.
    pub fn flush(&self) -> Result<()> {
        Ok(self.artifacts.host().flush()?)
    }

    /// Rewrite the commit log as a single snapshot of the current state.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.file {
            Some(file) => Ok(file.checkpoint()?),
            None => Ok(()),
        }
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<()> {
        self.flush()?;
        info!(path = ?self.path(), version = self.version(), "closed vat store");
        Ok(())
    }
}

/// Builder for store configuration.
///
/// # Example
///
/// ```ignore
/// // Production: disk-backed, snapshots compressed, fsync every 32 cranks
/// let store = VatStore::builder()
///     .path("./kernel-store")
///     .batched(32)
///     .artifact_mode(ArtifactMode::Replay)
///     .open()?;
///
/// // Settings from a TOML file
/// let store = VatStore::builder()
///     .path("./kernel-store")
///     .config_file(Path::new("vatstore.toml"))?
///     .open()?;
///
/// // Unit testing: no disk at all
/// let store = VatStore::ephemeral()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct VatStoreBuilder {
    path: Option<PathBuf>,
    config: StoreConfig,
}

impl VatStoreBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the store directory. Without one the store is ephemeral.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Load the configuration from a TOML file.
    pub fn config_file(mut self, path: &Path) -> Result<Self> {
        self.config = StoreConfig::load(path)?;
        Ok(self)
    }

    /// Retention mode for compaction and pruning.
    pub fn artifact_mode(mut self, mode: ArtifactMode) -> Self {
        self.config.artifact_mode = mode;
        self
    }

    /// Store snapshot heaps compressed (default) or raw.
    pub fn compress_snapshots(mut self, compress: bool) -> Self {
        self.config.compress_snapshots = compress;
        self
    }

    /// zstd level for snapshots and export archives.
    pub fn compression_level(mut self, level: i32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Roll spans over automatically once they hold `entries` entries.
    pub fn max_span_entries(mut self, entries: u64) -> Self {
        self.config.max_span_entries = Some(entries);
        self
    }

    /// Compact a vat's transcript after every snapshot.
    pub fn compact_on_snapshot(mut self, enabled: bool) -> Self {
        self.config.compact_on_snapshot = enabled;
        self
    }

    /// Never fsync. Files are still written.
    pub fn no_durability(mut self) -> Self {
        self.config.durability = DurabilityMode::None;
        self
    }

    /// fsync every commit (default).
    pub fn strict(mut self) -> Self {
        self.config.durability = DurabilityMode::Strict;
        self
    }

    /// fsync every `batch_size` commits.
    pub fn batched(mut self, batch_size: usize) -> Self {
        self.config.durability = DurabilityMode::Batched { batch_size };
        self
    }

    /// Open the store.
    pub fn open(self) -> Result<VatStore> {
        self.config.validate()?;
        let (host, file): (Arc<dyn HostStore>, _) = match &self.path {
            Some(path) => {
                let file = Arc::new(FileStore::open(path, self.config.durability)?);
                let host: Arc<dyn HostStore> = file.clone();
                (host, Some(file))
            }
            None => (Arc::new(MemoryStore::new()) as Arc<dyn HostStore>, None),
        };
        let artifacts = ArtifactStore::new(host, self.config)?;
        info!(
            path = ?self.path,
            mode = %artifacts.config().artifact_mode,
            version = artifacts.host().version(),
            "opened vat store"
        );
        Ok(VatStore { artifacts, file })
    }
}

