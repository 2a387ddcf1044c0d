// dbbackupd/src/backup/archive.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tar::Builder;
use tracing::{info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::artifact::{Artifact, ArtifactKind};
use crate::config::ArchiveFormat;
use crate::errors::BackupError;
use crate::utils::{format_size, with_deadline};

/// Packs a single file into its own archive.
#[async_trait]
pub trait Archiver: Send + Sync {
    /// Returns the path of the archive written for `source`.
    async fn compress(&self, source: &Path) -> Result<PathBuf>;
}

pub fn archiver_for(format: ArchiveFormat) -> Arc<dyn Archiver> {
    match format {
        ArchiveFormat::Zip => Arc::new(ZipArchiver),
        ArchiveFormat::TarGz => Arc::new(TarGzArchiver),
    }
}

/// Writes `<source>.zip` holding `source` under its base name (deflated).
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipArchiver;

#[async_trait]
impl Archiver for ZipArchiver {
    async fn compress(&self, source: &Path) -> Result<PathBuf> {
        let source = source.to_path_buf();
        let dest = archive_path_for(&source, ArchiveFormat::Zip);
        tokio::task::spawn_blocking(move || create_single_file_zip(&source, &dest))
            .await
            .context("Archive task panicked or was cancelled")?
    }
}

/// Writes `<source>.tar.gz` holding `source` under its base name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarGzArchiver;

#[async_trait]
impl Archiver for TarGzArchiver {
    async fn compress(&self, source: &Path) -> Result<PathBuf> {
        let source = source.to_path_buf();
        let dest = archive_path_for(&source, ArchiveFormat::TarGz);
        tokio::task::spawn_blocking(move || create_single_file_tar_gz(&source, &dest))
            .await
            .context("Archive task panicked or was cancelled")?
    }
}

pub fn archive_path_for(source: &Path, format: ArchiveFormat) -> PathBuf {
    let mut name = source.as_os_str().to_os_string();
    name.push(".");
    name.push(format.extension());
    PathBuf::from(name)
}

/// Base name under which `source` is stored inside its archive.
fn entry_name(source: &Path) -> Result<String> {
    if !source.is_file() {
        return Err(anyhow::anyhow!(
            "Source for archival is not a file: {}",
            source.display()
        ));
    }
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("Source has no file name: {}", source.display()))
}

/// Creates a zip archive containing exactly one deflated file.
pub fn create_single_file_zip(source: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    let entry_name = entry_name(source)?;
    let mut input = File::open(source)
        .with_context(|| format!("Failed to open {} for archival", source.display()))?;
    let source_len = input.metadata().map(|m| m.len()).unwrap_or(0);

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!(
            "Failed to create archive file: {}",
            archive_dest_path.display()
        )
    })?;
    let mut writer = ZipWriter::new(archive_file);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source_len >= u64::from(u32::MAX));

    writer
        .start_file(entry_name, options)
        .with_context(|| format!("Failed to start zip entry for {}", source.display()))?;
    std::io::copy(&mut input, &mut writer)
        .with_context(|| format!("Failed to append file {} to archive", source.display()))?;

    let archive_file = writer.finish().with_context(|| {
        format!(
            "Failed to finish zip archive: {}",
            archive_dest_path.display()
        )
    })?;
    archive_file
        .sync_all()
        .with_context(|| format!("Failed to flush archive: {}", archive_dest_path.display()))?;

    Ok(archive_dest_path.to_path_buf())
}

/// Creates a GZipped TAR archive containing exactly one file.
///
/// The entry is stored under the file's base name, without any directory
/// components. The archive is flushed to disk before returning.
pub fn create_single_file_tar_gz(source: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    let entry_name = entry_name(source)?;

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!(
            "Failed to create archive file: {}",
            archive_dest_path.display()
        )
    })?;
    let enc = GzEncoder::new(archive_file, Compression::default());
    let mut tar_builder = Builder::new(enc);

    tar_builder
        .append_path_with_name(source, entry_name)
        .with_context(|| format!("Failed to append file {} to archive", source.display()))?;

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to get inner encoder from tar builder for archive: {}",
            archive_dest_path.display()
        )
    })?;

    let archive_file = encoder.finish().with_context(|| {
        format!(
            "Failed to finish Gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;
    archive_file
        .sync_all()
        .with_context(|| format!("Failed to flush archive: {}", archive_dest_path.display()))?;

    Ok(archive_dest_path.to_path_buf())
}

/// Archives one dump and removes the dump once the archive is on disk.
pub async fn archive_artifact(
    archiver: &dyn Archiver,
    dump: &Artifact,
    deadline: Duration,
) -> std::result::Result<Artifact, BackupError> {
    let written = with_deadline(&format!("compress {}", dump.file_name()), deadline, async {
        let archive_path = archiver.compress(&dump.path).await?;
        let metadata = tokio::fs::metadata(&archive_path)
            .await
            .with_context(|| format!("Archive {} was not written", archive_path.display()))?;
        Ok((archive_path, metadata.len()))
    })
    .await;

    let (archive_path, size_bytes) = written.map_err(|e| BackupError::Compress {
        path: dump.path.clone(),
        message: format!("{:#}", e),
    })?;
    info!(
        "🗜 Compressed {} (size: {})",
        archive_path.display(),
        format_size(size_bytes)
    );

    if let Err(source) = tokio::fs::remove_file(&dump.path).await {
        let err = BackupError::LocalDelete {
            path: dump.path.clone(),
            source,
        };
        warn!("⚠️ {}", err);
    }

    Ok(Artifact {
        path: archive_path,
        size_bytes,
        kind: ArtifactKind::Archive,
        owner: dump.owner.clone(),
    })
}
