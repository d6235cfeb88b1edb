//! Export archives
//!
//! An export can be packed into a single `.vatexport.tar.zst` file:
//!
//! ```text
//! <name>.vatexport.tar.zst
//! └── vatexport/
//!     ├── MANIFEST.json                 # ExportManifest, canonical JSON
//!     └── artifacts/
//!         ├── snapshot.v7.10            # one file per exported payload,
//!         ├── transcript.v7.10.15       # named by its artifact name
//!         └── bundle.b1-...
//! ```
//!
//! Tar headers carry no timestamps or owners and files appear in manifest
//! order, so the same store state and mode always produce identical bytes.

use crate::error::{ExportError, ExportResult};
use crate::exporter::ExportSession;
use crate::importer::{ImportSession, ImportSummary};
use crate::manifest::ExportManifest;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tar::{Archive, Builder, Header};
use tracing::{debug, info};
use vatstore_artifacts::{hash_span_bytes, ArtifactKind, ArtifactName, ArtifactStore};
use vatstore_core::{ContentHash, Error};

/// File extension of export archives
pub const EXPORT_EXTENSION: &str = ".vatexport.tar.zst";

/// Default zstd level for archives
pub const DEFAULT_ARCHIVE_LEVEL: i32 = 3;

/// Paths inside an export archive
pub mod paths {
    /// Root directory
    pub const ROOT: &str = "vatexport";
    /// Manifest file
    pub const MANIFEST: &str = "vatexport/MANIFEST.json";
    /// Directory holding one file per artifact
    pub const ARTIFACTS: &str = "vatexport/artifacts";

    /// Archive path of an artifact payload
    pub fn artifact(name: &str) -> String {
        format!("{}/{}", ARTIFACTS, name)
    }
}

/// Summary of a written archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportInfo {
    /// Digest of the manifest
    pub digest: ContentHash,
    /// Payload files written
    pub artifact_count: usize,
    /// Payload bytes before compression
    pub total_bytes: u64,
    /// Archive size in bytes
    pub archive_size: u64,
}

/// Writes export sessions as compressed tar archives
#[derive(Debug, Clone, Copy)]
pub struct ArchiveWriter {
    level: i32,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new(DEFAULT_ARCHIVE_LEVEL)
    }
}

impl ArchiveWriter {
    /// Writer compressing at `level`
    pub fn new(level: i32) -> Self {
        ArchiveWriter { level }
    }

    /// Write an archive to `path`
    pub fn write(&self, session: &ExportSession, path: &Path) -> ExportResult<ExportInfo> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        let (writer, mut info) = self.write_to(session, writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| ExportError::Io(e.into_error()))?;
        file.sync_all()?;
        info.archive_size = file.metadata()?.len();
        info!(
            path = %path.display(),
            artifacts = info.artifact_count,
            bytes = info.archive_size,
            "wrote export archive"
        );
        Ok(info)
    }

    /// Write an archive into memory
    pub fn write_to_vec(&self, session: &ExportSession) -> ExportResult<(Vec<u8>, ExportInfo)> {
        let (data, mut info) = self.write_to(session, Vec::new())?;
        info.archive_size = data.len() as u64;
        Ok((data, info))
    }

    fn write_to<W: Write>(&self, session: &ExportSession, writer: W) -> ExportResult<(W, ExportInfo)> {
        let encoder = zstd::Encoder::new(writer, self.level)
            .map_err(|e| ExportError::compression(format!("zstd init: {}", e)))?;
        let mut builder = Builder::new(encoder);

        let manifest = session.manifest();
        let manifest_json = manifest.to_json()?;
        append_file(&mut builder, paths::MANIFEST, &manifest_json)?;

        let mut artifact_count = 0;
        for result in session.payloads() {
            let (entry, bytes) = result?;
            append_file(&mut builder, &paths::artifact(&entry.name.to_string()), &bytes)?;
            artifact_count += 1;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| ExportError::archive(format!("finish tar: {}", e)))?;
        let writer = encoder
            .finish()
            .map_err(|e| ExportError::compression(format!("zstd finish: {}", e)))?;

        Ok((
            writer,
            ExportInfo {
                digest: ContentHash::of(&manifest_json),
                artifact_count,
                total_bytes: manifest.total_bytes(),
                archive_size: 0,
            },
        ))
    }
}

fn append_file<W: Write>(builder: &mut Builder<W>, path: &str, data: &[u8]) -> ExportResult<()> {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| ExportError::archive(format!("append {}: {}", path, e)))
}

/// Contents of an export archive
#[derive(Debug, Clone)]
pub struct ArchiveContents {
    /// The parsed manifest
    pub manifest: ExportManifest,
    /// Payloads keyed by artifact name
    pub artifacts: BTreeMap<ArtifactName, Vec<u8>>,
}

/// Reads and validates export archives
pub struct ArchiveReader;

impl ArchiveReader {
    /// Read and version-check the manifest of the archive at `path`
    pub fn read_manifest(path: &Path) -> ExportResult<ExportManifest> {
        let file = BufReader::new(File::open(path)?);
        Self::manifest_from(file)
    }

    /// Read the manifest from archive bytes
    pub fn read_manifest_from_bytes(data: &[u8]) -> ExportResult<ExportManifest> {
        Self::manifest_from(data)
    }

    /// Read every file of the archive at `path`
    pub fn read_all(path: &Path) -> ExportResult<ArchiveContents> {
        let file = BufReader::new(File::open(path)?);
        Self::contents_from(file)
    }

    /// Read every file from archive bytes
    pub fn read_all_from_bytes(data: &[u8]) -> ExportResult<ArchiveContents> {
        Self::contents_from(data)
    }

    /// Check every payload against the manifest without touching a store
    pub fn verify(contents: &ArchiveContents) -> ExportResult<()> {
        for entry in &contents.manifest.artifacts {
            let name = entry.name.to_string();
            let bytes = contents
                .artifacts
                .get(&entry.name)
                .ok_or_else(|| ExportError::missing_file(paths::artifact(&name)))?;
            let actual = match entry.kind {
                ArtifactKind::Transcript => hash_span_bytes(bytes)?,
                _ => ContentHash::of(bytes),
            };
            if actual != entry.hash {
                return Err(Error::hash_mismatch(name, entry.hash, actual).into());
            }
            if bytes.len() as u64 != entry.size {
                return Err(Error::inconsistent(
                    name,
                    format!("payload is {} bytes, manifest says {}", bytes.len(), entry.size),
                )
                .into());
            }
        }
        for name in contents.artifacts.keys() {
            if contents.manifest.artifact(name).is_none() {
                return Err(Error::inconsistent(name.to_string(), "file not listed in the manifest").into());
            }
        }
        Ok(())
    }

    fn manifest_from<R: Read>(reader: R) -> ExportResult<ExportManifest> {
        let decoder = zstd::Decoder::new(reader)
            .map_err(|e| ExportError::compression(format!("zstd decode: {}", e)))?;
        let mut archive = Archive::new(decoder);

        for entry in archive.entries().map_err(|e| ExportError::archive(e.to_string()))? {
            let mut entry = entry.map_err(|e| ExportError::archive(e.to_string()))?;
            let entry_path = entry
                .path()
                .map_err(|e| ExportError::archive(e.to_string()))?
                .to_string_lossy()
                .to_string();

            if entry_path == paths::MANIFEST {
                let mut data = Vec::new();
                entry
                    .read_to_end(&mut data)
                    .map_err(|e| ExportError::archive(format!("read manifest: {}", e)))?;
                return ExportManifest::from_json(&data);
            }
        }

        Err(ExportError::missing_file(paths::MANIFEST))
    }

    fn contents_from<R: Read>(reader: R) -> ExportResult<ArchiveContents> {
        let decoder = zstd::Decoder::new(reader)
            .map_err(|e| ExportError::compression(format!("zstd decode: {}", e)))?;
        let mut archive = Archive::new(decoder);
        let prefix = format!("{}/", paths::ARTIFACTS);
        let mut manifest = None;
        let mut artifacts = BTreeMap::new();

        for entry in archive.entries().map_err(|e| ExportError::archive(e.to_string()))? {
            let mut entry = entry.map_err(|e| ExportError::archive(e.to_string()))?;
            let entry_path = entry
                .path()
                .map_err(|e| ExportError::archive(e.to_string()))?
                .to_string_lossy()
                .to_string();

            let mut data = Vec::new();
            entry
                .read_to_end(&mut data)
                .map_err(|e| ExportError::archive(format!("read {}: {}", entry_path, e)))?;

            if entry_path == paths::MANIFEST {
                manifest = Some(ExportManifest::from_json(&data)?);
            } else if let Some(name) = entry_path.strip_prefix(&prefix) {
                let name: ArtifactName = name.parse()?;
                if artifacts.insert(name, data).is_some() {
                    return Err(ExportError::archive(format!("duplicate file {}", entry_path)));
                }
            } else {
                return Err(ExportError::archive(format!("unexpected file {}", entry_path)));
            }
        }

        let manifest = manifest.ok_or_else(|| ExportError::missing_file(paths::MANIFEST))?;
        debug!(artifacts = artifacts.len(), "read export archive");
        Ok(ArchiveContents {
            manifest,
            artifacts,
        })
    }
}

/// Import an archive's contents into an empty store
///
/// Every payload is verified before anything is committed; on any error
/// the store is left unchanged.
pub fn import_contents(store: &ArtifactStore, contents: ArchiveContents) -> ExportResult<ImportSummary> {
    ArchiveReader::verify(&contents)?;
    let ArchiveContents {
        manifest,
        artifacts,
    } = contents;
    let mut session = ImportSession::begin(store, manifest)?;
    for (name, bytes) in &artifacts {
        session.import_artifact(name, bytes)?;
    }
    Ok(session.finalize()?)
}

/// Import the archive at `path` into an empty store
pub fn import_archive(store: &ArtifactStore, path: &Path) -> ExportResult<ImportSummary> {
    let contents = ArchiveReader::read_all(path)?;
    let summary = import_contents(store, contents)?;
    info!(path = %path.display(), artifacts = summary.artifacts, "imported export archive");
    Ok(summary)
}
